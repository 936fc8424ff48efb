//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::{EventTopology, PricingConfig};
use messaging::{BrokerConfig, BrokerKind, InboundRoutingKeys, RedeliveryPolicy};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be parsed.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A variable required by another setting is missing.
    #[error("{key} must be set when {because}")]
    Missing {
        key: &'static str,
        because: &'static str,
    },

    /// The selected broker has no working adapter.
    #[error("Broker type {0} is not supported; use memory or nats")]
    UnsupportedBroker(BrokerKind),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which transport carries outbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublisherKind {
    #[default]
    Broker,
    Http,
}

/// Outbound event transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub kind: PublisherKind,
    /// Base URL of the relay service when `kind` is `Http`.
    pub relay_url: Option<String>,
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Broker,
            relay_url: None,
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `TAX_RATE`, `FREE_SHIPPING_THRESHOLD`, `DEFAULT_SHIPPING_COST`,
///   `DEFAULT_CURRENCY`, `ORDER_NUMBER_PREFIX`
/// - `BROKER_TYPE`, `BROKER_URL`, `BROKER_EXCHANGE`, `BROKER_QUEUE`,
///   `BROKER_MAX_DELIVERIES`, `BROKER_DEAD_LETTER_KEY`
/// - `EVENT_PUBLISHER` (`broker` or `http`), `EVENT_RELAY_URL`,
///   `EVENT_PUBLISH_TIMEOUT_MS`
/// - `ROUTING_KEY_<NAME>` for every outbound and inbound routing key
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub pricing: PricingConfig,
    pub broker: BrokerConfig,
    pub publisher: PublisherConfig,
    pub topology: EventTopology,
    pub inbound: InboundRoutingKeys,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_format: LogFormat::Text,
            database_url: None,
            pricing: PricingConfig::default(),
            broker: BrokerConfig::default(),
            publisher: PublisherConfig::default(),
            topology: EventTopology::default(),
            inbound: InboundRoutingKeys::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset or empty variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Config::default();

        // 1. Server
        let host = env.string("HOST").unwrap_or(defaults.host);
        let port = env.parse("PORT")?.unwrap_or(defaults.port);
        let log_format = match env.string("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Text,
            Some(f) if f == "text" || f == "pretty" => LogFormat::Text,
            Some(f) if f == "json" => LogFormat::Json,
            Some(f) => return Err(invalid("LOG_FORMAT", f, "expected text or json")),
        };

        // 2. Pricing
        let p = defaults.pricing;
        let pricing = PricingConfig {
            tax_rate: env.decimal("TAX_RATE")?.unwrap_or(p.tax_rate),
            free_shipping_threshold: env
                .decimal("FREE_SHIPPING_THRESHOLD")?
                .unwrap_or(p.free_shipping_threshold),
            default_shipping_cost: env
                .decimal("DEFAULT_SHIPPING_COST")?
                .unwrap_or(p.default_shipping_cost),
            default_currency: env.string("DEFAULT_CURRENCY").unwrap_or(p.default_currency),
            order_number_prefix: env
                .string("ORDER_NUMBER_PREFIX")
                .unwrap_or(p.order_number_prefix),
        };

        // 3. Broker; placeholder bindings are refused here
        let b = defaults.broker;
        let kind = match env.string("BROKER_TYPE") {
            Some(raw) => raw
                .parse::<BrokerKind>()
                .map_err(|e| invalid("BROKER_TYPE", raw, e.to_string()))?,
            None => b.kind,
        };
        if !kind.is_implemented() {
            return Err(ConfigError::UnsupportedBroker(kind));
        }
        let broker = BrokerConfig {
            kind,
            url: env.string("BROKER_URL").unwrap_or(b.url),
            exchange: env.string("BROKER_EXCHANGE").unwrap_or(b.exchange),
            queue: env.string("BROKER_QUEUE").unwrap_or(b.queue),
            redelivery: RedeliveryPolicy {
                max_deliveries: match env.parse::<u32>("BROKER_MAX_DELIVERIES")? {
                    Some(0) => return Err(invalid("BROKER_MAX_DELIVERIES", "0", "must be at least 1")),
                    Some(n) => n,
                    None => b.redelivery.max_deliveries,
                },
                dead_letter_routing_key: env
                    .string("BROKER_DEAD_LETTER_KEY")
                    .unwrap_or(b.redelivery.dead_letter_routing_key),
            },
        };

        // 4. Publisher
        let publisher_kind = match env.string("EVENT_PUBLISHER").as_deref().map(str::to_ascii_lowercase) {
            None => PublisherKind::Broker,
            Some(k) if k == "broker" => PublisherKind::Broker,
            Some(k) if k == "http" => PublisherKind::Http,
            Some(k) => return Err(invalid("EVENT_PUBLISHER", k, "expected broker or http")),
        };
        let relay_url = env.string("EVENT_RELAY_URL");
        if publisher_kind == PublisherKind::Http && relay_url.is_none() {
            return Err(ConfigError::Missing {
                key: "EVENT_RELAY_URL",
                because: "EVENT_PUBLISHER=http",
            });
        }
        let publisher = PublisherConfig {
            kind: publisher_kind,
            relay_url,
            timeout: env
                .parse::<u64>("EVENT_PUBLISH_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.publisher.timeout),
        };

        // 5. Routing keys
        let t = defaults.topology;
        let topology = EventTopology {
            exchange: broker.exchange.clone(),
            order_created: env.string("ROUTING_KEY_ORDER_CREATED").unwrap_or(t.order_created),
            order_updated: env.string("ROUTING_KEY_ORDER_UPDATED").unwrap_or(t.order_updated),
            order_cancelled: env
                .string("ROUTING_KEY_ORDER_CANCELLED")
                .unwrap_or(t.order_cancelled),
            order_shipped: env.string("ROUTING_KEY_ORDER_SHIPPED").unwrap_or(t.order_shipped),
            order_delivered: env
                .string("ROUTING_KEY_ORDER_DELIVERED")
                .unwrap_or(t.order_delivered),
            order_deleted: env.string("ROUTING_KEY_ORDER_DELETED").unwrap_or(t.order_deleted),
        };
        let i = defaults.inbound;
        let inbound = InboundRoutingKeys {
            order_completed: env
                .string("ROUTING_KEY_ORDER_COMPLETED")
                .unwrap_or(i.order_completed),
            order_failed: env.string("ROUTING_KEY_ORDER_FAILED").unwrap_or(i.order_failed),
            payment_processed: env
                .string("ROUTING_KEY_PAYMENT_PROCESSED")
                .unwrap_or(i.payment_processed),
            inventory_reserved: env
                .string("ROUTING_KEY_INVENTORY_RESERVED")
                .unwrap_or(i.inventory_reserved),
            shipping_prepared: env
                .string("ROUTING_KEY_SHIPPING_PREPARED")
                .unwrap_or(i.shipping_prepared),
        };

        Ok(Self {
            host,
            port,
            log_format,
            database_url: env.string("DATABASE_URL"),
            pricing,
            broker,
            publisher,
            topology,
            inbound,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, raw, e.to_string())))
            .transpose()
    }

    fn decimal(&self, key: &'static str) -> Result<Option<Decimal>, ConfigError> {
        match self.parse::<Decimal>(key)? {
            Some(d) if d.is_sign_negative() => Err(invalid(key, d.to_string(), "must not be negative")),
            other => Ok(other),
        }
    }
}

fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.pricing, PricingConfig::default());
        assert_eq!(config.broker.kind, BrokerKind::InMemory);
        assert_eq!(config.broker.redelivery.max_deliveries, 5);
        assert_eq!(config.broker.redelivery.dead_letter_routing_key, "order-sync.dead-letter");
        assert_eq!(config.publisher.kind, PublisherKind::Broker);
        assert_eq!(config.topology, EventTopology::default());
        assert_eq!(config.inbound, InboundRoutingKeys::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("TAX_RATE", "0.2"),
            ("ORDER_NUMBER_PREFIX", "SO"),
            ("BROKER_TYPE", "nats"),
            ("BROKER_EXCHANGE", "shop"),
            ("BROKER_MAX_DELIVERIES", "2"),
            ("EVENT_PUBLISHER", "http"),
            ("EVENT_RELAY_URL", "http://relay:9000"),
            ("EVENT_PUBLISH_TIMEOUT_MS", "250"),
            ("ROUTING_KEY_ORDER_SHIPPED", "shipment.sent"),
            ("ROUTING_KEY_PAYMENT_PROCESSED", "payments.captured"),
        ])
        .unwrap();

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.pricing.tax_rate, Decimal::new(2, 1));
        assert_eq!(config.pricing.order_number_prefix, "SO");
        assert_eq!(config.broker.kind, BrokerKind::Nats);
        assert_eq!(config.broker.redelivery.max_deliveries, 2);
        assert_eq!(config.topology.exchange, "shop");
        assert_eq!(config.topology.order_shipped, "shipment.sent");
        assert_eq!(config.inbound.payment_processed, "payments.captured");
        assert_eq!(config.publisher.kind, PublisherKind::Http);
        assert_eq!(config.publisher.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_stub_brokers_are_rejected() {
        for kind in ["kafka", "rabbitmq"] {
            let err = load(&[("BROKER_TYPE", kind)]).unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedBroker(_)));
        }
        assert!(matches!(
            load(&[("BROKER_TYPE", "carrier-pigeon")]).unwrap_err(),
            ConfigError::Invalid { key: "BROKER_TYPE", .. }
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("PORT", "http")]).unwrap_err(),
            ConfigError::Invalid { key: "PORT", .. }
        ));
        assert!(matches!(
            load(&[("TAX_RATE", "-0.1")]).unwrap_err(),
            ConfigError::Invalid { key: "TAX_RATE", .. }
        ));
        assert!(matches!(
            load(&[("BROKER_MAX_DELIVERIES", "0")]).unwrap_err(),
            ConfigError::Invalid { key: "BROKER_MAX_DELIVERIES", .. }
        ));
        assert!(matches!(
            load(&[("EVENT_PUBLISHER", "http")]).unwrap_err(),
            ConfigError::Missing { key: "EVENT_RELAY_URL", .. }
        ));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("PORT", "  "), ("BROKER_TYPE", "")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.broker.kind, BrokerKind::InMemory);
    }
}
