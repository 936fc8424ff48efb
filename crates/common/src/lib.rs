//! Shared types for the order sync system.
//!
//! Identifiers, the optimistic concurrency [`Version`], the order record and
//! its status axes live here so that both the store and the domain layer can
//! depend on them without depending on each other's internals.

pub mod order;
pub mod status;
pub mod types;

pub use order::{Address, Order, OrderItem};
pub use status::{OrderStatus, ParseStatusError, PaymentStatus, ShippingStatus};
pub use types::{CorrelationId, CustomerId, OrderId, OrderItemId, ProductId, Version};
