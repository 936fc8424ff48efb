use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::CustomerId;

use crate::{
    Order, OrderFilter, OrderId, OrderStatus, Page, Result, StoreError, Version,
    store::{OrderStats, OrderStore, UpdateOptions},
};

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
}

/// In-memory order store implementation.
///
/// Provides the same interface and constraints as the PostgreSQL
/// implementation, including order-number uniqueness and version checks.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Clears all orders.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        tables.orders.clear();
        tables.order_numbers.clear();
    }

    fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.id.as_uuid().cmp(&a.id.as_uuid()))
        });
        orders
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::AlreadyExists(order.id));
        }
        if tables.order_numbers.contains_key(&order.order_number) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number.clone()));
        }

        tables
            .order_numbers
            .insert(order.order_number.clone(), order.id);
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_by_customer_id(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let orders = tables
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(orders))
    }

    async fn get_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let orders = tables
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        Ok(Self::newest_first(orders))
    }

    async fn update(&self, order: &Order, options: UpdateOptions) -> Result<Version> {
        let mut tables = self.tables.write().await;

        let stored = tables
            .orders
            .get_mut(&order.id)
            .ok_or(StoreError::NotFound(order.id))?;

        if let Some(expected) = options.expected_version
            && stored.version != expected
        {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id,
                expected,
                actual: stored.version,
            });
        }

        let new_version = stored.version.next();

        // Items, identity and creation audit are immutable
        stored.status = order.status;
        stored.payment_status = order.payment_status;
        stored.shipping_status = order.shipping_status;
        stored.subtotal = order.subtotal;
        stored.tax_amount = order.tax_amount;
        stored.shipping_cost = order.shipping_cost;
        stored.discount_amount = order.discount_amount;
        stored.total_amount = order.total_amount;
        stored.shipping_address = order.shipping_address.clone();
        stored.billing_address = order.billing_address.clone();
        stored.updated_at = order.updated_at;
        stored.updated_by = order.updated_by.clone();
        stored.version = new_version;

        Ok(new_version)
    }

    async fn delete(&self, id: OrderId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.orders.remove(&id) {
            Some(order) => {
                tables.order_numbers.remove(&order.order_number);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_paged(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        let tables = self.tables.read().await;
        let matching: Vec<_> = tables
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();

        let total = matching.len() as u64;
        let items = Self::newest_first(matching)
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();

        Ok(Page {
            items,
            total,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    async fn stats(&self) -> Result<OrderStats> {
        let tables = self.tables.read().await;
        Ok(OrderStats::from_orders(tables.orders.values()))
    }
}
