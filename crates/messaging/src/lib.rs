//! Messaging for the order sync system.
//!
//! This crate provides:
//! - [`MessageBroker`] adapters: in-process, NATS JetStream, and placeholders
//! - [`EventPublisher`](domain::EventPublisher) transports over a broker or an HTTP relay
//! - Inbound fulfillment events and the [`HandlerRegistry`] that routes them
//! - [`ConsumerService`], which keeps a subscription alive across failures

pub mod broker;
pub mod consumer;
pub mod error;
pub mod events;
pub mod handler;
pub mod publisher;
pub mod retry;

pub use broker::{
    Broker, BrokerConfig, BrokerKind, DeadLetter, Delivery, DeliveryHandler, HandlerOutcome,
    InMemoryBroker, MessageBroker, NatsBroker, QueuedMessage, RedeliveryPolicy, Settlement,
    StubBroker, Subscription,
};
pub use consumer::{ConsumerService, ConsumerSettings};
pub use error::{BrokerError, ConsumerError, HandlerError};
pub use events::{
    FulfillmentEvent, InventoryReserved, OrderCompleted, OrderFailed, PaymentProcessed,
    ShippingPrepared, decode_event,
};
pub use handler::{
    CONSUMER_ACTOR, EventHandler, HandlerRegistry, InboundRoutingKeys, OrderStatusHandler,
};
pub use publisher::{BrokerEventPublisher, HttpEventPublisher};
pub use retry::{RetryConfig, RetryError, retry_with_backoff};
