//! Construction and mutation of the order aggregate.

use chrono::{DateTime, Utc};

use common::{Order, OrderId, OrderStatus, PaymentStatus, ShippingStatus, Version};

use crate::error::DomainError;
use crate::pricing::{PricingConfig, compute_totals, generate_order_number_at};

use super::{CreateOrder, RequestContext};

/// Builds a new order from a command, pricing it with `pricing`.
///
/// The order starts in `Created` with payment and shipping pending, at the
/// first version. Fails with [`DomainError::AmountOverflow`] if the prices
/// are too large to total.
pub fn build_order(
    cmd: CreateOrder,
    pricing: &PricingConfig,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<Order, DomainError> {
    let items = cmd
        .items
        .into_iter()
        .map(|item| item.into_item())
        .collect::<Result<Vec<_>, _>>()?;
    let totals = compute_totals(&items, pricing)?;

    let currency = cmd
        .currency
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| pricing.default_currency.clone());

    Ok(Order {
        id: OrderId::new(),
        order_number: generate_order_number_at(&pricing.order_number_prefix, now),
        customer_id: cmd.customer_id,
        status: OrderStatus::Created,
        payment_status: PaymentStatus::Pending,
        shipping_status: ShippingStatus::Pending,
        currency,
        subtotal: totals.subtotal,
        tax_amount: totals.tax_amount,
        shipping_cost: totals.shipping_cost,
        discount_amount: totals.discount_amount,
        total_amount: totals.total_amount,
        shipping_address: cmd.shipping_address,
        billing_address: cmd.billing_address,
        items,
        created_at: now,
        updated_at: now,
        created_by: ctx.actor.clone(),
        updated_by: ctx.actor.clone(),
        version: Version::first(),
    })
}

/// Sets a new status and stamps the audit fields.
///
/// Returns the status the order had before. Transition rules are checked by
/// the caller.
pub fn apply_status(
    order: &mut Order,
    status: OrderStatus,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> OrderStatus {
    let previous = order.status;
    order.status = status;
    order.updated_at = now;
    order.updated_by = ctx.actor.clone();
    previous
}
