//! API server entry point.
//!
//! Serves the order HTTP API and runs the fulfillment event consumer until
//! SIGINT or SIGTERM.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use messaging::{Broker, ConsumerService, ConsumerSettings, HandlerRegistry, MessageBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn"));

    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load .env and configuration
    let _ = dotenvy::dotenv();
    let config = Config::from_env()?;

    // 2. Initialize tracing
    init_tracing(config.log_format);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = api::routes::metrics::install_recorder()?;

    // 4. Broker and outbound publisher
    let broker: Arc<dyn MessageBroker> = Arc::new(Broker::from_config(&config.broker)?);
    let publisher = api::create_publisher(&config, broker.clone())?;
    tracing::info!(
        broker = %config.broker.kind,
        publisher = ?config.publisher.kind,
        "messaging configured"
    );

    // 5. Order store
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await?;
            let store = PostgresOrderStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL order store");
            run(store, config, broker, publisher, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            run(InMemoryOrderStore::new(), config, broker, publisher, metrics_handle).await
        }
    }
}

async fn run<S: OrderStore + 'static>(
    store: S,
    config: Config,
    broker: Arc<dyn MessageBroker>,
    publisher: Arc<dyn domain::EventPublisher>,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let state = api::create_state(store, &config, broker.clone(), publisher);

    // 6. Start the consumer
    let shutdown = CancellationToken::new();
    let registry = HandlerRegistry::with_order_handlers(state.order_service.clone(), &config.inbound);
    let consumer = ConsumerService::new(
        broker,
        registry,
        ConsumerSettings::from_broker_config(&config.broker),
    );
    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown).await {
            tracing::error!(error = %e, "consumer stopped");
        }
    });

    // 7. Serve until a shutdown signal arrives
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Stop the consumer and close the broker
    shutdown.cancel();
    if let Err(e) = consumer_handle.await {
        tracing::error!(error = %e, "consumer task panicked");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
