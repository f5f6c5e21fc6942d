//! Application configuration loaded from environment variables.

use std::time::Duration;

use message_log::PartitionRef;
use saga::{SagaConfig, topics};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for human-readable
/// - `KAFKA_BROKERS`: broker list; unset runs against the in-memory log
/// - `DATABASE_URL`: PostgreSQL for consumer offsets; unset keeps them in memory
/// - `CATALOG_URL`: catalog service base URL; unset uses the built-in demo catalog
/// - `COORDINATOR_ID`: consumer name offsets are stored under (default `"payment"`)
/// - `RESPONSE_TOPIC` / `RESPONSE_PARTITION`: where receipts are read (default `payment`/0)
/// - `CATALOG_TIMEOUT_MS`, `PUBLISH_TIMEOUT_MS`, `RESPONSE_TIMEOUT_MS`: per-call bounds
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub kafka_brokers: Option<String>,
    pub database_url: Option<String>,
    pub catalog_url: Option<String>,
    pub coordinator_id: String,
    pub response_topic: String,
    pub response_partition: i32,
    pub catalog_timeout: Duration,
    pub publish_timeout: Duration,
    pub response_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            kafka_brokers: non_empty("KAFKA_BROKERS"),
            database_url: non_empty("DATABASE_URL"),
            catalog_url: non_empty("CATALOG_URL"),
            coordinator_id: non_empty("COORDINATOR_ID").unwrap_or(defaults.coordinator_id),
            response_topic: non_empty("RESPONSE_TOPIC").unwrap_or(defaults.response_topic),
            response_partition: lookup("RESPONSE_PARTITION")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.response_partition),
            catalog_timeout: millis("CATALOG_TIMEOUT_MS", defaults.catalog_timeout),
            publish_timeout: millis("PUBLISH_TIMEOUT_MS", defaults.publish_timeout),
            response_timeout: millis("RESPONSE_TIMEOUT_MS", defaults.response_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the coordinator configuration.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            consumer: self.coordinator_id.clone(),
            response_partition: PartitionRef::new(
                self.response_topic.as_str(),
                self.response_partition,
            ),
            catalog_timeout: self.catalog_timeout,
            publish_timeout: self.publish_timeout,
            response_timeout: self.response_timeout,
            ..SagaConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            kafka_brokers: None,
            database_url: None,
            catalog_url: None,
            coordinator_id: topics::PAYMENT_CONSUMER.to_string(),
            response_topic: topics::PAYMENT_TOPIC.to_string(),
            response_partition: 0,
            catalog_timeout: saga.catalog_timeout,
            publish_timeout: saga.publish_timeout,
            response_timeout: saga.response_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.kafka_brokers.is_none());
        assert_eq!(config.coordinator_id, "payment");
        assert_eq!(config.response_topic, "payment");
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("KAFKA_BROKERS", "kafka:9092"),
            ("RESPONSE_PARTITION", "2"),
            ("RESPONSE_TIMEOUT_MS", "1500"),
        ]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.kafka_brokers.as_deref(), Some("kafka:9092"));
        assert_eq!(config.response_partition, 2);
        assert_eq!(config.response_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_blank_and_malformed_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("DATABASE_URL", "  "),
            ("CATALOG_TIMEOUT_MS", "soon"),
        ]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.catalog_timeout, Config::default().catalog_timeout);
    }

    #[test]
    fn test_saga_config_carries_response_partition_and_timeouts() {
        let config = from_pairs(&[
            ("COORDINATOR_ID", "payment-eu"),
            ("RESPONSE_TOPIC", "receipts"),
            ("RESPONSE_PARTITION", "3"),
            ("PUBLISH_TIMEOUT_MS", "250"),
        ]);
        let saga = config.saga_config();

        assert_eq!(saga.consumer, "payment-eu");
        assert_eq!(saga.response_partition, PartitionRef::new("receipts", 3));
        assert_eq!(saga.publish_timeout, Duration::from_millis(250));
        assert_eq!(saga.player_topic, "player");
        assert_eq!(saga.inventory_topic, "inventory");
    }
}
