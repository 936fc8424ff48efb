//! HTTP API server for the order sync system.
//!
//! Provides REST endpoints for order management on top of the domain
//! service, with structured logging (tracing) and Prometheus metrics. The
//! binary also runs the fulfillment event consumer alongside the server.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, put};
use domain::{EventPublisher, OrderEventPublisher, OrderService, PublishError};
use messaging::{BrokerEventPublisher, HttpEventPublisher, MessageBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, PublisherKind};
use routes::orders::AppState;

/// Capacity of the broker publisher's request channel.
const PUBLISH_QUEUE_CAPACITY: usize = 256;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/orders",
            get(routes::orders::list::<S>).post(routes::orders::create::<S>),
        )
        .route("/orders/stats", get(routes::orders::stats::<S>))
        .route("/orders/status/{status}", get(routes::orders::by_status::<S>))
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S>).delete(routes::orders::delete::<S>),
        )
        .route("/orders/{id}/status", put(routes::orders::update_status::<S>))
        .route("/customers/{id}/orders", get(routes::orders::by_customer::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the outbound event transport selected by configuration.
///
/// The broker transport spawns its writer task, so this must run inside a
/// Tokio runtime.
pub fn create_publisher(
    config: &Config,
    broker: Arc<dyn MessageBroker>,
) -> Result<Arc<dyn EventPublisher>, PublishError> {
    let timeout = config.publisher.timeout;
    match config.publisher.kind {
        PublisherKind::Broker => Ok(Arc::new(BrokerEventPublisher::spawn(
            broker,
            timeout,
            PUBLISH_QUEUE_CAPACITY,
        ))),
        PublisherKind::Http => {
            let Some(relay_url) = config.publisher.relay_url.as_deref() else {
                return Err(PublishError::Connection(
                    "EVENT_RELAY_URL is not set".to_string(),
                ));
            };
            Ok(Arc::new(HttpEventPublisher::new(relay_url, timeout)?))
        }
    }
}

/// Wires the order service over `store` and returns the shared state.
pub fn create_state<S: OrderStore + 'static>(
    store: S,
    config: &Config,
    broker: Arc<dyn MessageBroker>,
    publisher: Arc<dyn EventPublisher>,
) -> Arc<AppState<S>> {
    let events = OrderEventPublisher::new(publisher, config.topology.clone());
    let order_service = Arc::new(OrderService::new(store, config.pricing.clone(), events));

    Arc::new(AppState {
        order_service,
        broker,
    })
}
