//! Messaging error types.

use thiserror::Error;

use common::OrderId;
use domain::DomainError;

use crate::broker::BrokerKind;

/// Errors reported by broker adapters.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached or the connection dropped.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// An operation was attempted before `connect`.
    #[error("Broker not connected")]
    NotConnected,

    /// Declaring or consuming from a queue failed.
    #[error("Broker subscription error: {0}")]
    Subscribe(String),

    /// The broker refused a published message.
    #[error("Broker publish error: {0}")]
    Publish(String),

    /// The broker binding exists only as a placeholder.
    #[error("Broker type {0} is not implemented")]
    NotImplemented(BrokerKind),

    /// The broker type name is not recognised.
    #[error("Unknown broker type: {0}")]
    UnknownKind(String),
}

/// Errors produced while handling one inbound message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload is not a valid event of the expected type.
    #[error("Failed to decode {event} payload: {source}")]
    Decode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The event refers to an order that doesn't exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order service rejected the update.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl HandlerError {
    /// Returns true if redelivering the message cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            HandlerError::Domain(DomainError::IllegalTransition { .. })
        )
    }
}

/// Errors that stop the consumer service.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// No connection could be established within the retry budget.
    #[error("Gave up connecting to broker after {attempts} attempts: {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    /// The registry has no handlers, so there is nothing to bind.
    #[error("No event handlers registered")]
    NoHandlers,
}
