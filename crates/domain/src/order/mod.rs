//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod lifecycle;
mod service;

pub use aggregate::{apply_status, build_order};
pub use commands::{CreateOrder, NewOrderItem, RequestContext};
pub use events::{
    AddressPayload, OrderCreatedEvent, OrderDeletedEvent, OrderItemPayload,
    OrderStatusChangedEvent,
};
pub use lifecycle::{Transition, can_transition, check_transition};
pub use service::OrderService;
