//! Outbound event publication.
//!
//! [`EventPublisher`] is the transport-agnostic port; the messaging crate
//! provides broker and HTTP implementations. [`OrderEventPublisher`] turns
//! order mutations into payloads, routes them through an [`EventTopology`]
//! and never lets a publish failure reach the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use common::{Order, OrderStatus};

use crate::order::{
    OrderCreatedEvent, OrderDeletedEvent, OrderStatusChangedEvent, RequestContext,
};

/// Errors a transport can report when publishing.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The transport could not reach the broker or relay.
    #[error("Event publish connection error: {0}")]
    Connection(String),

    /// The payload could not be serialized.
    #[error("Event serialization error: {0}")]
    Serialization(String),

    /// The broker or relay refused the message.
    #[error("Event publish rejected: {0}")]
    Rejected(String),

    /// No confirmation arrived in time.
    #[error("Event publish timed out after {0} ms")]
    Timeout(u64),
}

impl From<serde_json::Error> for PublishError {
    fn from(e: serde_json::Error) -> Self {
        PublishError::Serialization(e.to_string())
    }
}

/// Port for publishing events to an exchange under a routing key.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one JSON document.
    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        (**self).publish_event(exchange, routing_key, payload).await
    }
}

/// No-op event publisher.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish_event(
        &self,
        _exchange: &str,
        _routing_key: &str,
        _payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}

/// A message captured by [`InMemoryEventPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
}

/// In-memory event publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    messages: Arc<RwLock<Vec<PublishedMessage>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryEventPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail with a connection error.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns all messages published so far.
    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.read().await.clone()
    }

    /// Returns the messages published under a routing key.
    pub async fn messages_for(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Returns the number of published messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Connection("broker unreachable".to_string()));
        }
        self.messages.write().await.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Exchange and routing keys used for outbound order events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopology {
    pub exchange: String,
    pub order_created: String,
    pub order_updated: String,
    pub order_cancelled: String,
    pub order_shipped: String,
    pub order_delivered: String,
    pub order_deleted: String,
}

impl Default for EventTopology {
    fn default() -> Self {
        Self {
            exchange: "order-sync".to_string(),
            order_created: "order.created".to_string(),
            order_updated: "order.updated".to_string(),
            order_cancelled: "order.cancelled".to_string(),
            order_shipped: "order.shipped".to_string(),
            order_delivered: "order.delivered".to_string(),
            order_deleted: "order.deleted".to_string(),
        }
    }
}

impl EventTopology {
    /// Routing key for a status change into `status`.
    pub fn status_routing_key(&self, status: OrderStatus) -> &str {
        match status {
            OrderStatus::Cancelled => &self.order_cancelled,
            OrderStatus::Shipped => &self.order_shipped,
            OrderStatus::Delivered => &self.order_delivered,
            _ => &self.order_updated,
        }
    }
}

/// Publishes order lifecycle events, logging and counting failures
/// instead of returning them.
#[derive(Clone)]
pub struct OrderEventPublisher {
    transport: Arc<dyn EventPublisher>,
    topology: EventTopology,
}

impl OrderEventPublisher {
    pub fn new(transport: Arc<dyn EventPublisher>, topology: EventTopology) -> Self {
        Self {
            transport,
            topology,
        }
    }

    /// Returns the routing topology.
    pub fn topology(&self) -> &EventTopology {
        &self.topology
    }

    pub async fn order_created(&self, order: &Order, ctx: &RequestContext) {
        let event = OrderCreatedEvent::from_order(order, &ctx.correlation_id);
        let routing_key = self.topology.order_created.clone();
        self.publish(&routing_key, &event, ctx).await;
    }

    pub async fn status_changed(&self, order: &Order, previous: OrderStatus, ctx: &RequestContext) {
        let event = OrderStatusChangedEvent::from_order(order, previous, &ctx.correlation_id);
        let routing_key = self.topology.status_routing_key(order.status).to_string();
        self.publish(&routing_key, &event, ctx).await;
    }

    pub async fn order_deleted(&self, order: &Order, ctx: &RequestContext) {
        let event = OrderDeletedEvent::from_order(order, ctx.actor.clone(), &ctx.correlation_id);
        let routing_key = self.topology.order_deleted.clone();
        self.publish(&routing_key, &event, ctx).await;
    }

    async fn publish<E: Serialize>(&self, routing_key: &str, event: &E, ctx: &RequestContext) {
        let exchange = &self.topology.exchange;

        let result = match stamped(event) {
            Ok(payload) => {
                self.transport
                    .publish_event(exchange, routing_key, payload)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                metrics::counter!("order_events_published_total", "routing_key" => routing_key.to_string())
                    .increment(1);
                tracing::debug!(%exchange, %routing_key, correlation_id = %ctx.correlation_id, "event published");
            }
            Err(e) => {
                metrics::counter!("order_events_publish_failures_total", "routing_key" => routing_key.to_string())
                    .increment(1);
                tracing::warn!(
                    %exchange,
                    %routing_key,
                    correlation_id = %ctx.correlation_id,
                    error = %e,
                    "failed to publish event"
                );
            }
        }
    }
}

/// Serializes an event and adds a `timestamp` field.
fn stamped<E: Serialize>(event: &E) -> Result<serde_json::Value, PublishError> {
    let mut payload = serde_json::to_value(event)?;
    if let serde_json::Value::Object(map) = &mut payload {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
    }
    Ok(payload)
}
