//! Inputs to the order service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use common::{Address, CorrelationId, CustomerId, OrderItem, ProductId};

use crate::error::DomainError;

/// Who asked for a change and which request/event chain it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,

    /// Actor recorded in the audit fields.
    pub actor: Option<String>,
}

impl RequestContext {
    /// Creates a context with a fresh correlation ID and no actor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context continuing an existing correlation chain.
    pub fn with_correlation(correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            actor: None,
        }
    }

    /// Sets the acting user or system.
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// A line item as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl NewOrderItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            unit_price,
            quantity,
        }
    }

    pub(crate) fn into_item(self) -> Result<OrderItem, DomainError> {
        OrderItem::try_new(
            self.product_id,
            self.product_name,
            self.unit_price,
            self.quantity,
        )
        .ok_or(DomainError::AmountOverflow)
    }
}

/// Command to create a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    /// The customer placing the order.
    pub customer_id: CustomerId,

    /// ISO 4217 code; the configured default applies when absent.
    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub items: Vec<NewOrderItem>,

    pub shipping_address: Address,
    pub billing_address: Address,
}

impl CreateOrder {
    /// Creates a command with no items and the same address for shipping and billing.
    pub fn for_customer(customer_id: CustomerId, address: Address) -> Self {
        Self {
            customer_id,
            currency: None,
            items: Vec::new(),
            shipping_address: address.clone(),
            billing_address: address,
        }
    }

    /// Adds a line item.
    pub fn with_item(mut self, item: NewOrderItem) -> Self {
        self.items.push(item);
        self
    }

    /// Sets the currency.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}
