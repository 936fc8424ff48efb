//! NATS JetStream integration tests.
//!
//! One JetStream-enabled server is started for the whole file. Every test
//! works on its own exchange, so each gets its own stream and the tests can
//! run concurrently:
//!
//! ```bash
//! cargo test -p messaging --test nats_integration
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    Address, CreateOrder, CustomerId, EventTopology, NoOpEventPublisher, OrderEventPublisher,
    OrderService, OrderStatus, PricingConfig, RequestContext,
};
use messaging::{
    ConsumerService, ConsumerSettings, Delivery, DeliveryHandler, HandlerOutcome,
    HandlerRegistry, InboundRoutingKeys, MessageBroker, NatsBroker, RedeliveryPolicy,
    RetryConfig, Subscription,
};
use order_store::InMemoryOrderStore;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::nats::Nats;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEAD_LETTER_KEY: &str = "dead-letter";

/// Server shared by every test in this file.
struct TestServer {
    _container: ContainerAsync<Nats>,
    url: String,
}

static SERVER: OnceCell<TestServer> = OnceCell::const_new();

async fn server() -> &'static TestServer {
    SERVER
        .get_or_init(|| async {
            let container = Nats::default()
                .with_cmd(["--jetstream"])
                .start()
                .await
                .unwrap();
            let url = format!(
                "nats://{}:{}",
                container.get_host().await.unwrap(),
                container.get_host_port_ipv4(4222).await.unwrap()
            );

            TestServer {
                _container: container,
                url,
            }
        })
        .await
}

async fn connected_broker() -> NatsBroker {
    let broker = NatsBroker::new(server().await.url.as_str());
    broker.connect().await.unwrap();
    broker
}

/// Records every delivery and settles it by payload:
/// `flaky` fails on its first delivery, `poison` always fails,
/// anything else succeeds.
#[derive(Default)]
struct RecordingHandler {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingHandler {
    async fn attempts_for(&self, payload: &str) -> Vec<u32> {
        self.deliveries
            .lock()
            .await
            .iter()
            .filter(|d| d.payload == payload.as_bytes())
            .map(|d| d.attempt)
            .collect()
    }
}

#[async_trait]
impl DeliveryHandler for RecordingHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        self.deliveries.lock().await.push(delivery.clone());
        match delivery.payload.as_slice() {
            b"flaky" if delivery.attempt == 1 => HandlerOutcome::Retry("not yet".into()),
            b"poison" => HandlerOutcome::Retry("cannot process".into()),
            _ => HandlerOutcome::Ack,
        }
    }
}

fn subscription(exchange: &str, queue: &str, keys: &[&str]) -> Subscription {
    Subscription {
        exchange: exchange.to_string(),
        queue: queue.to_string(),
        routing_keys: keys.iter().map(|k| k.to_string()).collect(),
        redelivery: RedeliveryPolicy {
            max_deliveries: 3,
            dead_letter_routing_key: DEAD_LETTER_KEY.to_string(),
        },
    }
}

fn spawn_subscriber(
    broker: &NatsBroker,
    subscription: Subscription,
    handler: Arc<RecordingHandler>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let broker = broker.clone();
    tokio::spawn(async move {
        broker
            .subscribe(&subscription, handler, shutdown)
            .await
            .unwrap();
    })
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn acked_messages_are_not_redelivered() {
    let exchange = "nats-ack";
    let broker = connected_broker().await;
    let sub = subscription(exchange, "nats-ack.worker", &["job.run"]);

    let handler = Arc::new(RecordingHandler::default());
    let shutdown = CancellationToken::new();
    let task = spawn_subscriber(&broker, sub.clone(), handler.clone(), shutdown.clone());

    broker.publish(exchange, "job.run", b"first".to_vec()).await.unwrap();
    wait_until(|| async { handler.attempts_for("first").await == [1] }).await;

    let delivery = handler.deliveries.lock().await[0].clone();
    assert_eq!(delivery.routing_key, "job.run");

    shutdown.cancel();
    task.await.unwrap();

    // Resubscribing the same durable queue only sees new messages
    let handler = Arc::new(RecordingHandler::default());
    let shutdown = CancellationToken::new();
    let task = spawn_subscriber(&broker, sub, handler.clone(), shutdown.clone());

    broker.publish(exchange, "job.run", b"second".to_vec()).await.unwrap();
    wait_until(|| async { handler.attempts_for("second").await == [1] }).await;
    assert!(handler.attempts_for("first").await.is_empty());

    shutdown.cancel();
    task.await.unwrap();
    broker.close().await.unwrap();
}

#[tokio::test]
async fn retried_messages_come_back_with_higher_attempt() {
    let exchange = "nats-retry";
    let broker = connected_broker().await;

    let handler = Arc::new(RecordingHandler::default());
    let shutdown = CancellationToken::new();
    let task = spawn_subscriber(
        &broker,
        subscription(exchange, "nats-retry.worker", &["job.run"]),
        handler.clone(),
        shutdown.clone(),
    );

    broker.publish(exchange, "job.run", b"flaky".to_vec()).await.unwrap();
    wait_until(|| async { handler.attempts_for("flaky").await == [1, 2] }).await;

    shutdown.cancel();
    task.await.unwrap();
    broker.close().await.unwrap();
}

#[tokio::test]
async fn exhausted_messages_land_on_the_dead_letter_subject() {
    let exchange = "nats-dlq";
    let broker = connected_broker().await;
    let shutdown = CancellationToken::new();

    let dead_letters = Arc::new(RecordingHandler::default());
    let dlq_task = spawn_subscriber(
        &broker,
        subscription(exchange, "nats-dlq.dead-letters", &[DEAD_LETTER_KEY]),
        dead_letters.clone(),
        shutdown.clone(),
    );

    let handler = Arc::new(RecordingHandler::default());
    let task = spawn_subscriber(
        &broker,
        subscription(exchange, "nats-dlq.worker", &["job.*"]),
        handler.clone(),
        shutdown.clone(),
    );

    broker.publish(exchange, "job.run", b"poison".to_vec()).await.unwrap();
    wait_until(|| async { dead_letters.attempts_for("poison").await == [1] }).await;

    // Terminated after the third delivery
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handler.attempts_for("poison").await, [1, 2, 3]);

    let dead = dead_letters.deliveries.lock().await[0].clone();
    assert_eq!(dead.routing_key, DEAD_LETTER_KEY);

    shutdown.cancel();
    task.await.unwrap();
    dlq_task.await.unwrap();
    broker.close().await.unwrap();
}

#[tokio::test]
async fn consumer_service_applies_fulfillment_events() {
    let exchange = "nats-orders";
    let broker = connected_broker().await;
    assert!(broker.is_healthy().await);

    let events = OrderEventPublisher::new(
        Arc::new(NoOpEventPublisher),
        EventTopology {
            exchange: exchange.to_string(),
            ..Default::default()
        },
    );
    let service = Arc::new(OrderService::new(
        InMemoryOrderStore::new(),
        PricingConfig::default(),
        events,
    ));
    let order = service
        .create_order(
            CreateOrder::for_customer(CustomerId::new(), Address::default()),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    let shared: Arc<dyn MessageBroker> = Arc::new(broker.clone());
    let consumer = ConsumerService::new(
        shared,
        HandlerRegistry::with_order_handlers(service.clone(), &InboundRoutingKeys::default()),
        ConsumerSettings {
            exchange: exchange.to_string(),
            queue: "nats-orders.fulfillment".to_string(),
            redelivery: RedeliveryPolicy::default(),
            retry: RetryConfig::bounded(10, Duration::from_millis(50)),
        },
    );
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let payload = format!(r#"{{"orderId":"{}","correlationId":"nats-1"}}"#, order.id);
    broker
        .publish(exchange, "payment.processed", payload.into_bytes())
        .await
        .unwrap();

    wait_until(|| {
        let service = service.clone();
        async move {
            service
                .get_by_id(order.id)
                .await
                .unwrap()
                .is_some_and(|o| o.status == OrderStatus::Confirmed)
        }
    })
    .await;

    shutdown.cancel();
    task.await.unwrap().unwrap();
}
