//! Placeholder bindings for Kafka and RabbitMQ.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{BrokerKind, DeliveryHandler, MessageBroker, Subscription};
use crate::error::BrokerError;

/// Tracks connection state but cannot move messages.
///
/// [`super::Broker::from_config`] never builds one; it exists so the kind
/// has an adapter to report against.
#[derive(Debug, Clone)]
pub struct StubBroker {
    kind: BrokerKind,
    connected: Arc<AtomicBool>,
}

impl StubBroker {
    pub fn new(kind: BrokerKind) -> Self {
        Self {
            kind,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl MessageBroker for StubBroker {
    fn broker_type(&self) -> BrokerKind {
        self.kind
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        tracing::warn!(broker = %self.kind, "connecting placeholder broker");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        _exchange: &str,
        _routing_key: &str,
        _payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        Err(BrokerError::NotImplemented(self.kind))
    }

    async fn subscribe(
        &self,
        _subscription: &Subscription,
        _handler: Arc<dyn DeliveryHandler>,
        _shutdown: CancellationToken,
    ) -> Result<(), BrokerError> {
        Err(BrokerError::NotImplemented(self.kind))
    }

    async fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Delivery, HandlerOutcome, RedeliveryPolicy};

    struct Noop;

    #[async_trait]
    impl DeliveryHandler for Noop {
        async fn handle(&self, _delivery: &Delivery) -> HandlerOutcome {
            HandlerOutcome::Ack
        }
    }

    #[tokio::test]
    async fn tracks_connection_but_refuses_traffic() {
        let broker = StubBroker::new(BrokerKind::Kafka);
        assert_eq!(broker.broker_type(), BrokerKind::Kafka);
        assert!(!broker.is_healthy().await);

        broker.connect().await.unwrap();
        assert!(broker.is_healthy().await);

        assert!(matches!(
            broker.publish("ex", "k", vec![]).await,
            Err(BrokerError::NotImplemented(BrokerKind::Kafka))
        ));

        let subscription = Subscription {
            exchange: "ex".into(),
            queue: "q".into(),
            routing_keys: vec!["k".into()],
            redelivery: RedeliveryPolicy::default(),
        };
        assert!(matches!(
            broker
                .subscribe(&subscription, Arc::new(Noop), CancellationToken::new())
                .await,
            Err(BrokerError::NotImplemented(BrokerKind::Kafka))
        ));

        broker.close().await.unwrap();
        assert!(!broker.is_healthy().await);
    }
}
