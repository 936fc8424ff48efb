use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use common::CustomerId;

use crate::{Order, OrderFilter, OrderId, OrderStatus, Page, Result, Version};

/// Options for updating an order.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Version the caller loaded the order at.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl UpdateOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stored order to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }
}

/// Aggregate figures over all stored orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub orders_by_status: BTreeMap<OrderStatus, u64>,

    /// Sum of `total_amount` over orders that are not cancelled.
    pub total_revenue: Decimal,

    /// `total_revenue` divided by the number of non-cancelled orders.
    pub average_order_value: Decimal,
}

impl OrderStats {
    /// Computes statistics from a set of orders.
    ///
    /// Revenue saturates at `Decimal::MAX`.
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut stats = OrderStats::default();
        let mut revenue_orders = 0u64;

        for order in orders {
            stats.total_orders += 1;
            *stats.orders_by_status.entry(order.status).or_insert(0) += 1;
            if order.status != OrderStatus::Cancelled {
                stats.total_revenue = stats.total_revenue.saturating_add(order.total_amount);
                revenue_orders += 1;
            }
        }

        stats.average_order_value = average(stats.total_revenue, revenue_orders);
        stats
    }

    /// Returns a copy with monetary figures rounded to 2 decimal places.
    pub fn rounded(&self) -> Self {
        let round =
            |value: Decimal| value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self {
            total_orders: self.total_orders,
            orders_by_status: self.orders_by_status.clone(),
            total_revenue: round(self.total_revenue),
            average_order_value: round(self.average_order_value),
        }
    }

    /// Returns the number of orders in a given status.
    pub fn count(&self, status: OrderStatus) -> u64 {
        self.orders_by_status.get(&status).copied().unwrap_or(0)
    }
}

pub(crate) fn average(revenue: Decimal, count: u64) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        revenue / Decimal::from(count)
    }
}

/// Core trait for order store implementations.
///
/// An order store persists orders together with their line items.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order with its items.
    ///
    /// Fails with `DuplicateOrderNumber` if the order number is taken and
    /// `AlreadyExists` if the ID is taken.
    async fn create(&self, order: &Order) -> Result<()>;

    /// Retrieves an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Retrieves all orders of a customer, newest first.
    async fn get_by_customer_id(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    /// Retrieves all orders in a status, newest first.
    async fn get_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    /// Writes the mutable fields of an order.
    ///
    /// If `options.expected_version` is set, the operation will fail with
    /// `ConcurrencyConflict` if the stored version doesn't match.
    ///
    /// Returns the new version of the order after the update.
    async fn update(&self, order: &Order, options: UpdateOptions) -> Result<Version>;

    /// Deletes an order and its items.
    ///
    /// Returns false if the order didn't exist.
    async fn delete(&self, id: OrderId) -> Result<bool>;

    /// Retrieves one page of orders matching a filter, newest first.
    async fn get_paged(&self, filter: &OrderFilter) -> Result<Page<Order>>;

    /// Computes statistics over all stored orders.
    async fn stats(&self) -> Result<OrderStats>;
}
