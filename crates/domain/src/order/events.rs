//! Outbound integration events.
//!
//! These are projections of the order at the moment of a mutation. They are
//! published, never persisted, and serialize to flat camelCase JSON with
//! monetary amounts as numbers rounded to cents.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use common::{Address, CorrelationId, CustomerId, Order, OrderId, OrderItem, OrderStatus, ProductId};

use crate::pricing::round_money;

/// Address as it appears in event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPayload {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl From<&Address> for AddressPayload {
    fn from(address: &Address) -> Self {
        Self {
            line1: address.line1.clone(),
            line2: address.line2.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            postal_code: address.postal_code.clone(),
            country: address.country.clone(),
        }
    }
}

/// Line item as it appears in `OrderCreated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemPayload {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
}

impl From<&OrderItem> for OrderItemPayload {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: round_money(item.unit_price),
            total_price: round_money(item.total_price),
        }
    }
}

/// Published after an order is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: OrderId,
    pub correlation_id: CorrelationId,
    pub customer_id: CustomerId,
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemPayload>,
    pub shipping_address: AddressPayload,
    pub billing_address: AddressPayload,
}

impl OrderCreatedEvent {
    pub fn from_order(order: &Order, correlation_id: &CorrelationId) -> Self {
        Self {
            order_id: order.id,
            correlation_id: correlation_id.clone(),
            customer_id: order.customer_id,
            order_number: order.order_number.clone(),
            total_amount: round_money(order.total_amount),
            currency: order.currency.clone(),
            created_at: order.created_at,
            items: order.items.iter().map(OrderItemPayload::from).collect(),
            shipping_address: (&order.shipping_address).into(),
            billing_address: (&order.billing_address).into(),
        }
    }
}

/// Published after an order's status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChangedEvent {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: CustomerId,

    /// Status the order had before this change.
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,

    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub correlation_id: CorrelationId,
}

impl OrderStatusChangedEvent {
    pub fn from_order(
        order: &Order,
        previous_status: OrderStatus,
        correlation_id: &CorrelationId,
    ) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_id: order.customer_id,
            previous_status,
            new_status: order.status,
            updated_at: order.updated_at,
            updated_by: order.updated_by.clone(),
            correlation_id: correlation_id.clone(),
        }
    }
}

/// Published after an order is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDeletedEvent {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: CustomerId,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: Option<String>,
    pub correlation_id: CorrelationId,
}

impl OrderDeletedEvent {
    pub fn from_order(
        order: &Order,
        deleted_by: Option<String>,
        correlation_id: &CorrelationId,
    ) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_id: order.customer_id,
            deleted_at: Utc::now(),
            deleted_by,
            correlation_id: correlation_id.clone(),
        }
    }
}
