//! Broker adapter abstraction.
//!
//! The model is a topic exchange: publishers send to an exchange under a
//! routing key, and a durable queue bound to a set of routing keys receives
//! copies. Consumption uses manual acknowledgement. Failed deliveries are
//! requeued until the [`RedeliveryPolicy`] ceiling, then published to a
//! dead-letter routing key and acknowledged.

mod memory;
mod nats;
mod stub;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use memory::{DeadLetter, InMemoryBroker, QueuedMessage};
pub use nats::NatsBroker;
pub use stub::StubBroker;

use crate::error::BrokerError;

/// Closed set of broker bindings known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerKind {
    InMemory,
    Nats,
    Kafka,
    RabbitMq,
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerKind::InMemory => "memory",
            BrokerKind::Nats => "nats",
            BrokerKind::Kafka => "kafka",
            BrokerKind::RabbitMq => "rabbitmq",
        }
    }

    /// Returns true if a working adapter exists for this kind.
    pub fn is_implemented(&self) -> bool {
        matches!(self, BrokerKind::InMemory | BrokerKind::Nats)
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BrokerKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" => Ok(BrokerKind::InMemory),
            "nats" | "jetstream" => Ok(BrokerKind::Nats),
            "kafka" => Ok(BrokerKind::Kafka),
            "rabbitmq" | "rabbit" | "amqp" => Ok(BrokerKind::RabbitMq),
            other => Err(BrokerError::UnknownKind(other.to_string())),
        }
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// What a consumer decided about a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processed, or deliberately dropped.
    Ack,
    /// Failed in a way that may succeed on redelivery.
    Retry(String),
    /// Failed permanently.
    Reject(String),
}

/// What the adapter does with a delivery after the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
    DeadLetter,
}

/// Bounded redelivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Deliveries allowed before a retried message is dead-lettered.
    pub max_deliveries: u32,
    /// Routing key dead-lettered messages are published under.
    pub dead_letter_routing_key: String,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            dead_letter_routing_key: "order-sync.dead-letter".to_string(),
        }
    }
}

impl RedeliveryPolicy {
    /// Decides how to settle a delivery given the handler outcome.
    pub fn settle(&self, outcome: &HandlerOutcome, attempt: u32) -> Settlement {
        match outcome {
            HandlerOutcome::Ack => Settlement::Ack,
            HandlerOutcome::Reject(_) => Settlement::DeadLetter,
            HandlerOutcome::Retry(_) if attempt >= self.max_deliveries => Settlement::DeadLetter,
            HandlerOutcome::Retry(_) => Settlement::Requeue,
        }
    }
}

/// A durable queue bound to routing keys on an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub exchange: String,
    pub queue: String,
    pub routing_keys: Vec<String>,
    pub redelivery: RedeliveryPolicy,
}

/// Callback invoked for every delivery on a subscription.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome;
}

/// Contract every broker adapter implements.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Identifies the adapter.
    fn broker_type(&self) -> BrokerKind;

    /// Opens the connection. Calling it on a connected broker is a no-op.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Publishes a payload to an exchange under a routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError>;

    /// Declares the exchange and queue, binds the routing keys and consumes.
    ///
    /// Messages are processed one at a time. Returns `Ok(())` when `shutdown`
    /// is cancelled and an error when the connection or stream fails.
    async fn subscribe(
        &self,
        subscription: &Subscription,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), BrokerError>;

    /// Returns true if the connection is usable.
    async fn is_healthy(&self) -> bool;

    /// Closes the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Settings for selecting and wiring a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub redelivery: RedeliveryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::InMemory,
            url: "nats://127.0.0.1:4222".to_string(),
            exchange: "order-sync".to_string(),
            queue: "order-sync.fulfillment".to_string(),
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

/// The implemented broker bindings.
#[derive(Clone)]
pub enum Broker {
    InMemory(InMemoryBroker),
    Nats(NatsBroker),
}

impl Broker {
    /// Builds the adapter selected by configuration.
    ///
    /// Placeholder bindings are refused here so a misconfigured process
    /// fails at startup rather than on first publish.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        match config.kind {
            BrokerKind::InMemory => Ok(Broker::InMemory(InMemoryBroker::new())),
            BrokerKind::Nats => Ok(Broker::Nats(NatsBroker::new(config.url.clone()))),
            kind => Err(BrokerError::NotImplemented(kind)),
        }
    }

    fn inner(&self) -> &dyn MessageBroker {
        match self {
            Broker::InMemory(broker) => broker,
            Broker::Nats(broker) => broker,
        }
    }
}

#[async_trait]
impl MessageBroker for Broker {
    fn broker_type(&self) -> BrokerKind {
        self.inner().broker_type()
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.inner().connect().await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.inner().publish(exchange, routing_key, payload).await
    }

    async fn subscribe(
        &self,
        subscription: &Subscription,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), BrokerError> {
        self.inner().subscribe(subscription, handler, shutdown).await
    }

    async fn is_healthy(&self) -> bool {
        self.inner().is_healthy().await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner().close().await
    }
}

/// Records a dead-lettered delivery in logs and metrics.
pub(crate) fn log_dead_letter(delivery: &Delivery, outcome: &HandlerOutcome) {
    let reason = match outcome {
        HandlerOutcome::Retry(reason) | HandlerOutcome::Reject(reason) => reason.as_str(),
        HandlerOutcome::Ack => "",
    };
    metrics::counter!("broker_dead_letters_total").increment(1);
    tracing::error!(
        routing_key = %delivery.routing_key,
        attempt = delivery.attempt,
        reason,
        "dead-lettering message"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_kind_parses_aliases() {
        assert_eq!("NATS".parse::<BrokerKind>().unwrap(), BrokerKind::Nats);
        assert_eq!("in-memory".parse::<BrokerKind>().unwrap(), BrokerKind::InMemory);
        assert_eq!("amqp".parse::<BrokerKind>().unwrap(), BrokerKind::RabbitMq);
        assert!(matches!(
            "redis".parse::<BrokerKind>(),
            Err(BrokerError::UnknownKind(_))
        ));
    }

    #[test]
    fn stub_kinds_are_refused_at_configuration() {
        for kind in [BrokerKind::Kafka, BrokerKind::RabbitMq] {
            let config = BrokerConfig {
                kind,
                ..Default::default()
            };
            assert!(matches!(
                Broker::from_config(&config),
                Err(BrokerError::NotImplemented(k)) if k == kind
            ));
        }
    }

    #[test]
    fn implemented_kinds_build() {
        let broker = Broker::from_config(&BrokerConfig::default()).unwrap();
        assert_eq!(broker.broker_type(), BrokerKind::InMemory);

        let config = BrokerConfig {
            kind: BrokerKind::Nats,
            ..Default::default()
        };
        assert_eq!(
            Broker::from_config(&config).unwrap().broker_type(),
            BrokerKind::Nats
        );
    }

    #[test]
    fn settlement_respects_redelivery_ceiling() {
        let policy = RedeliveryPolicy {
            max_deliveries: 3,
            ..Default::default()
        };
        let retry = HandlerOutcome::Retry("boom".into());

        assert_eq!(policy.settle(&HandlerOutcome::Ack, 1), Settlement::Ack);
        assert_eq!(policy.settle(&retry, 1), Settlement::Requeue);
        assert_eq!(policy.settle(&retry, 2), Settlement::Requeue);
        assert_eq!(policy.settle(&retry, 3), Settlement::DeadLetter);
        assert_eq!(
            policy.settle(&HandlerOutcome::Reject("bad".into()), 1),
            Settlement::DeadLetter
        );
    }
}
