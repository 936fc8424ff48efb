//! Order service: the single entry point for order reads and mutations.
//!
//! Both the HTTP layer and the event consumer call into this service.
//! Writes are persisted first and published second; a publish failure
//! never fails the call.

use std::time::Instant;

use chrono::Utc;

use common::{CustomerId, Order, OrderId, OrderStatus};
use order_store::{OrderFilter, OrderStats, OrderStore, Page, UpdateOptions};

use crate::error::DomainError;
use crate::pricing::PricingConfig;
use crate::publisher::OrderEventPublisher;

use super::{CreateOrder, RequestContext, Transition, apply_status, build_order, check_transition};

/// Service for managing orders.
pub struct OrderService<S: OrderStore> {
    store: S,
    pricing: PricingConfig,
    events: OrderEventPublisher,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a new order service.
    pub fn new(store: S, pricing: PricingConfig, events: OrderEventPublisher) -> Self {
        Self {
            store,
            pricing,
            events,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the pricing rules in effect.
    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Creates, persists and announces a new order.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id, correlation_id = %ctx.correlation_id))]
    pub async fn create_order(
        &self,
        cmd: CreateOrder,
        ctx: &RequestContext,
    ) -> Result<Order, DomainError> {
        let start = Instant::now();

        // 1. Price and build the aggregate
        let order = build_order(cmd, &self.pricing, ctx, Utc::now())?;

        // 2. Persist
        self.store.create(&order).await?;

        // 3. Announce; failures are logged by the publisher
        self.events.order_created(&order, ctx).await;

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_create_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "order created"
        );

        Ok(order)
    }

    /// Moves an order to a new status.
    ///
    /// Returns None if the order doesn't exist. Setting the status the
    /// order already has returns the order unchanged without writing or
    /// publishing anything.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        ctx: &RequestContext,
    ) -> Result<Option<Order>, DomainError> {
        // 1. Load
        let Some(mut order) = self.store.get_by_id(order_id).await? else {
            tracing::debug!(%order_id, "order not found");
            return Ok(None);
        };

        // 2. Check the transition table
        match check_transition(order.status, status) {
            Transition::Unchanged => {
                tracing::debug!(%order_id, %status, "status unchanged");
                return Ok(Some(order));
            }
            Transition::Illegal => {
                metrics::counter!("order_status_rejected_total").increment(1);
                return Err(DomainError::IllegalTransition {
                    order_id,
                    from: order.status,
                    to: status,
                });
            }
            Transition::Apply => {}
        }

        // 3. Mutate and persist against the loaded version
        let loaded_version = order.version;
        let previous = apply_status(&mut order, status, ctx, Utc::now());
        order.version = self
            .store
            .update(&order, UpdateOptions::expect_version(loaded_version))
            .await?;

        // 4. Announce with the status the order actually had
        self.events.status_changed(&order, previous, ctx).await;

        metrics::counter!("order_status_updates_total", "status" => status.as_str())
            .increment(1);
        tracing::info!(%order_id, from = %previous, to = %status, "order status updated");

        Ok(Some(order))
    }

    /// Deletes an order.
    ///
    /// Returns false if the order doesn't exist.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id))]
    pub async fn delete_order(
        &self,
        order_id: OrderId,
        ctx: &RequestContext,
    ) -> Result<bool, DomainError> {
        let Some(order) = self.store.get_by_id(order_id).await? else {
            return Ok(false);
        };

        if !self.store.delete(order_id).await? {
            return Ok(false);
        }

        self.events.order_deleted(&order, ctx).await;
        metrics::counter!("orders_deleted_total").increment(1);
        tracing::info!(%order_id, "order deleted");

        Ok(true)
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_id(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        Ok(self.store.get_by_id(order_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Order>, DomainError> {
        Ok(self.store.get_by_customer_id(customer_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, DomainError> {
        Ok(self.store.get_by_status(status).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_paged(&self, filter: OrderFilter) -> Result<Page<Order>, DomainError> {
        Ok(self.store.get_paged(&filter).await?)
    }

    /// Returns order statistics with monetary figures rounded to cents.
    #[tracing::instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<OrderStats, DomainError> {
        Ok(self.store.stats().await?.rounded())
    }
}
