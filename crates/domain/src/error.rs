//! Domain error types.

use common::{OrderId, OrderStatus, Version};
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The requested status change is not allowed from the current status.
    #[error("Illegal status transition for order {order_id}: {from} -> {to}")]
    IllegalTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Another writer updated the order after it was loaded.
    #[error(
        "Order {order_id} was modified concurrently: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// A monetary amount of the order doesn't fit in a decimal.
    #[error("Order amounts exceed the supported range")]
    AmountOverflow,

    /// An error occurred in the order store.
    #[error("Order store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcurrencyConflict {
                order_id,
                expected,
                actual,
            } => DomainError::ConcurrentModification {
                order_id,
                expected,
                actual,
            },
            other => DomainError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_becomes_concurrent_modification() {
        let order_id = OrderId::new();
        let err: DomainError = StoreError::ConcurrencyConflict {
            order_id,
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();

        assert!(matches!(
            err,
            DomainError::ConcurrentModification { order_id: id, .. } if id == order_id
        ));
    }

    #[test]
    fn other_store_errors_are_wrapped() {
        let err: DomainError = StoreError::DuplicateOrderNumber("ORD-1".into()).into();
        assert!(matches!(
            err,
            DomainError::Store(StoreError::DuplicateOrderNumber(_))
        ));
    }
}
