//! Consumer service: owns the broker connection for inbound events.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::{
    BrokerConfig, Delivery, DeliveryHandler, HandlerOutcome, MessageBroker, RedeliveryPolicy,
    Subscription,
};
use crate::error::{ConsumerError, HandlerError};
use crate::handler::HandlerRegistry;
use crate::retry::{RetryConfig, RetryError, retry_with_backoff};

/// Where and how the consumer binds.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub exchange: String,
    pub queue: String,
    pub redelivery: RedeliveryPolicy,
    pub retry: RetryConfig,
}

impl ConsumerSettings {
    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self {
            exchange: config.exchange.clone(),
            queue: config.queue.clone(),
            redelivery: config.redelivery.clone(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Routes deliveries through the registry and classifies the result.
struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl DeliveryHandler for Dispatcher {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        let start = Instant::now();

        let Some(result) = self
            .registry
            .dispatch(&delivery.routing_key, &delivery.payload)
            .await
        else {
            metrics::counter!("consumer_messages_total", "outcome" => "unrouted").increment(1);
            tracing::warn!(routing_key = %delivery.routing_key, "no handler for routing key, dropping message");
            return HandlerOutcome::Ack;
        };

        metrics::histogram!(
            "consumer_handler_duration_seconds",
            "routing_key" => delivery.routing_key.clone()
        )
        .record(start.elapsed().as_secs_f64());

        let (outcome, label) = classify(result);
        metrics::counter!("consumer_messages_total", "outcome" => label).increment(1);

        match &outcome {
            HandlerOutcome::Ack => {
                tracing::debug!(routing_key = %delivery.routing_key, attempt = delivery.attempt, label, "message acknowledged");
            }
            HandlerOutcome::Retry(reason) => {
                tracing::warn!(routing_key = %delivery.routing_key, attempt = delivery.attempt, reason, "handler failed, requeueing");
            }
            HandlerOutcome::Reject(reason) => {
                tracing::error!(routing_key = %delivery.routing_key, attempt = delivery.attempt, reason, "handler failed permanently");
            }
        }
        outcome
    }
}

fn classify(result: Result<(), HandlerError>) -> (HandlerOutcome, &'static str) {
    match result {
        Ok(()) => (HandlerOutcome::Ack, "processed"),
        // Redelivery cannot make the order appear
        Err(HandlerError::OrderNotFound(_)) => (HandlerOutcome::Ack, "not_found"),
        Err(e) if e.is_permanent() => (HandlerOutcome::Reject(e.to_string()), "rejected"),
        Err(e) => (HandlerOutcome::Retry(e.to_string()), "retried"),
    }
}

/// Binds every registered routing key and feeds deliveries to handlers.
pub struct ConsumerService {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<HandlerRegistry>,
    settings: ConsumerSettings,
}

impl ConsumerService {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: HandlerRegistry,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            broker,
            registry: Arc::new(registry),
            settings,
        }
    }

    pub fn subscription(&self) -> Subscription {
        Subscription {
            exchange: self.settings.exchange.clone(),
            queue: self.settings.queue.clone(),
            routing_keys: self.registry.routing_keys(),
            redelivery: self.settings.redelivery.clone(),
        }
    }

    /// Consumes until `shutdown` is cancelled, reconnecting after failures.
    ///
    /// Closes the broker before returning.
    #[tracing::instrument(skip_all, fields(queue = %self.settings.queue, broker = %self.broker.broker_type()))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        if self.registry.is_empty() {
            return Err(ConsumerError::NoHandlers);
        }

        let subscription = self.subscription();
        let handler: Arc<dyn DeliveryHandler> = Arc::new(Dispatcher {
            registry: self.registry.clone(),
        });

        loop {
            // 1. Connect with backoff
            let connected =
                retry_with_backoff(&self.settings.retry, &shutdown, |_| self.broker.connect())
                    .await;
            match connected {
                Ok(()) => {}
                Err(RetryError::Cancelled) => break,
                Err(RetryError::Exhausted { attempts, error }) => {
                    return Err(ConsumerError::ConnectFailed {
                        attempts,
                        source: error,
                    });
                }
            }

            // 2. Consume until cancelled or the subscription fails
            tracing::info!(routing_keys = ?subscription.routing_keys, "consumer started");
            match self
                .broker
                .subscribe(&subscription, handler.clone(), shutdown.clone())
                .await
            {
                Ok(()) => break,
                Err(e) if shutdown.is_cancelled() => {
                    tracing::debug!(error = %e, "subscription ended during shutdown");
                    break;
                }
                Err(e) => {
                    metrics::counter!("consumer_reconnects_total").increment(1);
                    tracing::warn!(error = %e, "subscription failed, reconnecting");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry.initial_delay) => {}
                    }
                }
            }
        }

        // 3. Release the connection; unacknowledged messages are redelivered
        if let Err(e) = self.broker.close().await {
            tracing::warn!(error = %e, "failed to close broker connection");
        }
        tracing::info!("consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, OrderStatus, Version};
    use domain::DomainError;

    use super::*;

    #[test]
    fn classification() {
        assert_eq!(classify(Ok(())).0, HandlerOutcome::Ack);
        assert_eq!(
            classify(Err(HandlerError::OrderNotFound(OrderId::new()))).0,
            HandlerOutcome::Ack
        );

        let illegal = HandlerError::Domain(DomainError::IllegalTransition {
            order_id: OrderId::new(),
            from: OrderStatus::Delivered,
            to: OrderStatus::Cancelled,
        });
        assert!(matches!(classify(Err(illegal)).0, HandlerOutcome::Reject(_)));

        let conflict = HandlerError::Domain(DomainError::ConcurrentModification {
            order_id: OrderId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        });
        assert!(matches!(classify(Err(conflict)).0, HandlerOutcome::Retry(_)));

        let decode = HandlerError::Decode {
            event: "OrderCompleted",
            source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        };
        assert!(matches!(classify(Err(decode)).0, HandlerOutcome::Retry(_)));
    }

    #[test]
    fn settings_follow_broker_config() {
        let config = BrokerConfig::default();
        let settings = ConsumerSettings::from_broker_config(&config);
        assert_eq!(settings.exchange, "order-sync");
        assert_eq!(settings.queue, "order-sync.fulfillment");
        assert_eq!(settings.redelivery.max_deliveries, 5);
    }
}
