//! Domain layer for the order sync system.
//!
//! This crate provides:
//! - Pricing and order-number generation
//! - The order status transition table
//! - Outbound event payloads and the [`EventPublisher`] port
//! - [`OrderService`], the facade used by the HTTP layer and the event consumer

pub mod error;
pub mod order;
pub mod pricing;
pub mod publisher;

pub use common::{
    Address, CorrelationId, CustomerId, Order, OrderId, OrderItem, OrderStatus, PaymentStatus,
    ProductId, ShippingStatus, Version,
};
pub use error::DomainError;
pub use order::{
    CreateOrder, NewOrderItem, OrderCreatedEvent, OrderDeletedEvent, OrderService,
    OrderStatusChangedEvent, RequestContext, Transition, can_transition, check_transition,
};
pub use pricing::{PricingConfig, Totals, compute_totals, generate_order_number, round_money};
pub use publisher::{
    EventPublisher, EventTopology, InMemoryEventPublisher, NoOpEventPublisher,
    OrderEventPublisher, PublishError, PublishedMessage,
};
