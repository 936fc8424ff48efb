//! Order persistence.
//!
//! The [`OrderStore`] trait is the contract the domain layer depends on.
//! Two implementations ship with the crate: [`InMemoryOrderStore`] for tests
//! and single-process deployments, and [`PostgresOrderStore`] backed by sqlx.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{Order, OrderId, OrderStatus, Version};
pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use query::{OrderFilter, Page};
pub use store::{OrderStats, OrderStore, UpdateOptions};
