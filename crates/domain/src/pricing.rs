//! Order totals and order numbers.
//!
//! Everything here is pure: no I/O and no clock reads except in
//! [`generate_order_number`], which takes today's UTC date.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use common::OrderItem;

use crate::error::DomainError;

/// Pricing rules applied when an order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Fraction of the subtotal charged as tax, e.g. `0.08`.
    pub tax_rate: Decimal,

    /// Orders with a subtotal strictly above this ship for free.
    pub free_shipping_threshold: Decimal,

    /// Flat shipping cost charged below the threshold.
    pub default_shipping_cost: Decimal,

    /// Currency used when the caller doesn't supply one.
    pub default_currency: String,

    /// Prefix of generated order numbers.
    pub order_number_prefix: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(8, 2),
            free_shipping_threshold: Decimal::new(100, 0),
            default_shipping_cost: Decimal::new(10, 0),
            default_currency: "USD".to_string(),
            order_number_prefix: "ORD".to_string(),
        }
    }
}

/// Monetary fields of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

/// Rounds a monetary amount to cents, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes the totals of a new order.
///
/// `total = subtotal + tax + shipping - discount`, where the subtotal is the
/// sum of item totals and no discount is applied at creation. An order
/// without items is not charged shipping, so all of its totals are zero.
///
/// Returns [`DomainError::AmountOverflow`] if any amount exceeds the
/// decimal range.
pub fn compute_totals(items: &[OrderItem], config: &PricingConfig) -> Result<Totals, DomainError> {
    let subtotal = items
        .iter()
        .try_fold(Decimal::ZERO, |sum, item| {
            item.unit_price
                .checked_mul(Decimal::from(item.quantity))
                .and_then(|line| sum.checked_add(line))
        })
        .ok_or(DomainError::AmountOverflow)?;

    let tax_amount = subtotal
        .checked_mul(config.tax_rate)
        .map(round_money)
        .ok_or(DomainError::AmountOverflow)?;

    let shipping_cost = if items.is_empty() || subtotal > config.free_shipping_threshold {
        Decimal::ZERO
    } else {
        config.default_shipping_cost
    };

    let discount_amount = Decimal::ZERO;

    let total_amount = subtotal
        .checked_add(tax_amount)
        .and_then(|total| total.checked_add(shipping_cost))
        .and_then(|total| total.checked_sub(discount_amount))
        .ok_or(DomainError::AmountOverflow)?;

    Ok(Totals {
        subtotal,
        tax_amount,
        shipping_cost,
        discount_amount,
        total_amount,
    })
}

/// Generates an order number for today: `PREFIX-YYYYMMDD-XXXXXXXX`.
pub fn generate_order_number(prefix: &str) -> String {
    generate_order_number_at(prefix, Utc::now())
}

/// Generates an order number for the UTC date of `at`.
///
/// The suffix is 8 uppercase hex digits from a random `u32`. Collisions are
/// not retried here; the store's uniqueness constraint reports them.
pub fn generate_order_number_at(prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{:08X}",
        prefix,
        at.format("%Y%m%d"),
        rand::random::<u32>()
    )
}
