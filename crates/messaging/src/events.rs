//! Inbound fulfillment events.
//!
//! Upstream producers disagree on key casing (`orderId`, `OrderId`,
//! `order_id`), so payloads are decoded after folding every object key to
//! lowercase with `_` and `-` removed. Field renames below use that folded
//! form.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use common::{OrderId, OrderStatus};

use crate::error::HandlerError;

/// An upstream signal that moves one order to one status.
pub trait FulfillmentEvent: DeserializeOwned + Send + Sync + 'static {
    /// Event name used in logs and errors.
    const NAME: &'static str;

    /// Status the order moves to when this event arrives.
    const TARGET_STATUS: OrderStatus;

    fn order_id(&self) -> OrderId;

    fn correlation_id(&self) -> Option<&str>;
}

/// The order reached the customer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderCompleted {
    #[serde(rename = "orderid")]
    pub order_id: OrderId,
    #[serde(rename = "correlationid", default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "completedat", default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fulfillment gave up on the order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderFailed {
    #[serde(rename = "orderid")]
    pub order_id: OrderId,
    #[serde(rename = "correlationid", default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "reason", alias = "failurereason", default)]
    pub reason: Option<String>,
}

/// Payment for the order was captured.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentProcessed {
    #[serde(rename = "orderid")]
    pub order_id: OrderId,
    #[serde(rename = "correlationid", default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "paymentid", default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Stock was reserved for the order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InventoryReserved {
    #[serde(rename = "orderid")]
    pub order_id: OrderId,
    #[serde(rename = "correlationid", default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "reservationid", default)]
    pub reservation_id: Option<String>,
}

/// The parcel was handed to a carrier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShippingPrepared {
    #[serde(rename = "orderid")]
    pub order_id: OrderId,
    #[serde(rename = "correlationid", default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "trackingnumber", default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
}

macro_rules! fulfillment_event {
    ($ty:ty, $name:literal, $status:expr) => {
        impl FulfillmentEvent for $ty {
            const NAME: &'static str = $name;
            const TARGET_STATUS: OrderStatus = $status;

            fn order_id(&self) -> OrderId {
                self.order_id
            }

            fn correlation_id(&self) -> Option<&str> {
                self.correlation_id.as_deref()
            }
        }
    };
}

fulfillment_event!(OrderCompleted, "OrderCompleted", OrderStatus::Delivered);
fulfillment_event!(OrderFailed, "OrderFailed", OrderStatus::Cancelled);
fulfillment_event!(PaymentProcessed, "PaymentProcessed", OrderStatus::Confirmed);
fulfillment_event!(InventoryReserved, "InventoryReserved", OrderStatus::Processing);
fulfillment_event!(ShippingPrepared, "ShippingPrepared", OrderStatus::Shipped);

/// Decodes a payload into `E`, matching keys case-insensitively.
pub fn decode_event<E: FulfillmentEvent>(payload: &[u8]) -> Result<E, HandlerError> {
    let decode_error = |source: serde_json::Error| HandlerError::Decode {
        event: E::NAME,
        source,
    };
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(decode_error)?;
    serde_json::from_value(fold_keys(value)).map_err(decode_error)
}

fn fold_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (fold_key(&key), fold_keys(value)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
        serde_json::Value::Array(items) => items.into_iter().map(fold_keys).collect(),
        other => other,
    }
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_in_any_casing() {
        let id = OrderId::new();
        for key in ["orderId", "OrderId", "order_id", "ORDER-ID", "orderid"] {
            let payload = format!(r#"{{"{key}": "{id}", "correlationId": "c-1"}}"#);
            let event: OrderCompleted = decode_event(payload.as_bytes()).unwrap();
            assert_eq!(event.order_id, id);
            assert_eq!(event.correlation_id(), Some("c-1"));
        }
    }

    #[test]
    fn event_specific_fields_are_decoded() {
        let id = OrderId::new();
        let payload = format!(
            r#"{{"OrderId":"{id}","PaymentId":"pay_1","Amount":80.20,"extra":true}}"#
        );
        let event: PaymentProcessed = decode_event(payload.as_bytes()).unwrap();
        assert_eq!(event.payment_id.as_deref(), Some("pay_1"));
        assert_eq!(event.amount, Some(Decimal::new(8020, 2)));
        assert_eq!(event.correlation_id(), None);

        let payload = format!(r#"{{"order_id":"{id}","failure_reason":"out of stock"}}"#);
        let event: OrderFailed = decode_event(payload.as_bytes()).unwrap();
        assert_eq!(event.reason.as_deref(), Some("out of stock"));

        let payload = format!(r#"{{"orderId":"{id}","trackingNumber":"1Z999","carrier":"UPS"}}"#);
        let event: ShippingPrepared = decode_event(payload.as_bytes()).unwrap();
        assert_eq!(event.tracking_number.as_deref(), Some("1Z999"));
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        let payloads: [&[u8]; 3] = [
            b"not json",
            br#"{"correlationId":"c"}"#,
            br#"{"orderId":"nope"}"#,
        ];
        for payload in payloads {
            let result = decode_event::<InventoryReserved>(payload);
            assert!(matches!(
                result,
                Err(HandlerError::Decode { event: "InventoryReserved", .. })
            ));
        }
    }

    #[test]
    fn each_event_targets_one_status() {
        assert_eq!(OrderCompleted::TARGET_STATUS, OrderStatus::Delivered);
        assert_eq!(OrderFailed::TARGET_STATUS, OrderStatus::Cancelled);
        assert_eq!(PaymentProcessed::TARGET_STATUS, OrderStatus::Confirmed);
        assert_eq!(InventoryReserved::TARGET_STATUS, OrderStatus::Processing);
        assert_eq!(ShippingPrepared::TARGET_STATUS, OrderStatus::Shipped);
    }
}
