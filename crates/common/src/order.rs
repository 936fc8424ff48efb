//! The order record shared by the store and the domain layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    CustomerId, OrderId, OrderItemId, OrderStatus, PaymentStatus, ProductId, ShippingStatus,
    Version,
};

/// Postal address attached to an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// A line item owned by exactly one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,

    /// Reference to the catalog product.
    pub product_id: ProductId,

    /// Product name as it was when the order was placed.
    pub product_name: String,

    pub unit_price: Decimal,

    pub quantity: u32,

    /// `unit_price × quantity`, computed once at creation.
    pub total_price: Decimal,
}

impl OrderItem {
    /// Creates a line item and computes its total price.
    ///
    /// The total saturates at `Decimal::MAX`; use [`OrderItem::try_new`]
    /// for caller-supplied amounts.
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Self {
        Self {
            id: OrderItemId::new(),
            product_id,
            product_name: product_name.into(),
            unit_price,
            quantity,
            total_price: unit_price.saturating_mul(Decimal::from(quantity)),
        }
    }

    /// Creates a line item, or returns None if its total overflows.
    pub fn try_new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Option<Self> {
        let total_price = unit_price.checked_mul(Decimal::from(quantity))?;
        Some(Self {
            id: OrderItemId::new(),
            product_id,
            product_name: product_name.into(),
            unit_price,
            quantity,
            total_price,
        })
    }
}

/// Order aggregate root as persisted.
///
/// Monetary fields are kept at full precision; rounding happens where
/// values leave the system (statistics, HTTP responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    /// Human-readable unique number, `PREFIX-YYYYMMDD-XXXXXXXX`.
    pub order_number: String,

    pub customer_id: CustomerId,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,

    /// ISO 4217 currency code.
    pub currency: String,

    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,

    pub shipping_address: Address,
    pub billing_address: Address,

    /// Line items in the order they were supplied.
    pub items: Vec<OrderItem>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,

    /// Optimistic concurrency token.
    pub version: Version,
}

impl Order {
    /// Returns the number of line items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the total quantity across all line items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
