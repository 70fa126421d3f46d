//! # Transport Configuration
//!
//! Serde-backed configuration for the queue transport. Values come from
//! optional TOML/YAML files and `SQLBUS__`-prefixed environment variables
//! (see [`loader`]), and are validated once at startup so misconfiguration
//! fails the endpoint instead of individual messages.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sqlbus_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! println!("endpoint: {}", config.endpoint.name);
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::defaults;
use crate::error::{TransportError, TransportResult};

pub use loader::ConfigLoader;

/// Root transport configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Database connection settings
    pub database: DatabaseConfig,

    /// Local endpoint identity
    pub endpoint: EndpointConfig,

    /// Schema/catalog defaults and per-queue overrides
    pub addressing: AddressingConfig,

    /// Delayed delivery store and maturation loop
    pub delayed_delivery: DelayedDeliveryConfig,

    /// Native publish/subscribe store
    pub subscriptions: SubscriptionConfig,

    /// Background purge of expired rows
    pub expiry: ExpiryConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/sqlbus_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Local endpoint identity
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Logical endpoint name; the input queue table unless overridden
    pub name: String,
    /// Optional instance discriminator appended to the input queue name
    pub discriminator: Option<String>,
    /// Queue receiving poison rows
    pub error_queue: String,
    /// Endpoints that only send have no input queue and no delayed store
    pub send_only: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "sqlbus".to_string(),
            discriminator: None,
            error_queue: defaults::ERROR_QUEUE.to_string(),
            send_only: false,
        }
    }
}

/// Address resolution defaults and overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AddressingConfig {
    pub default_schema: String,
    /// Defaults to the connected database when unset
    pub default_catalog: Option<String>,
    /// Table name to schema
    pub schema_overrides: HashMap<String, String>,
    /// Table name to catalog
    pub catalog_overrides: HashMap<String, String>,
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            default_schema: defaults::SCHEMA.to_string(),
            default_catalog: None,
            schema_overrides: HashMap::new(),
            catalog_overrides: HashMap::new(),
        }
    }
}

/// Delayed delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DelayedDeliveryConfig {
    pub table_suffix: String,
    pub processing_interval_ms: u64,
    pub batch_size: u32,
}

impl Default for DelayedDeliveryConfig {
    fn default() -> Self {
        Self {
            table_suffix: defaults::DELAYED_TABLE_SUFFIX.to_string(),
            processing_interval_ms: defaults::MATURATION_INTERVAL_MS,
            batch_size: defaults::MATURATION_BATCH_SIZE,
        }
    }
}

impl DelayedDeliveryConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }
}

/// Subscription store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub table_name: String,
    /// Schema of the subscription table; the default schema when unset
    pub schema: Option<String>,
    /// Zero disables caching
    pub cache_ttl_seconds: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            table_name: defaults::SUBSCRIPTION_TABLE.to_string(),
            schema: None,
            cache_ttl_seconds: defaults::SUBSCRIPTION_CACHE_TTL_SECONDS,
        }
    }
}

impl SubscriptionConfig {
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_seconds > 0).then(|| Duration::from_secs(self.cache_ttl_seconds))
    }
}

/// Expired row purge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub purge_on_startup: bool,
    pub purge_batch_size: u32,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            purge_on_startup: true,
            purge_batch_size: defaults::EXPIRED_PURGE_BATCH_SIZE,
        }
    }
}

impl TransportConfig {
    /// Configuration tuned for tests: fast maturation, short cache lifetime
    pub fn for_test(database_url: impl Into<String>, endpoint_name: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig {
                url: database_url.into(),
                max_connections: 5,
                acquire_timeout_seconds: 10,
            },
            endpoint: EndpointConfig {
                name: endpoint_name.into(),
                ..EndpointConfig::default()
            },
            delayed_delivery: DelayedDeliveryConfig {
                processing_interval_ms: 100,
                ..DelayedDeliveryConfig::default()
            },
            subscriptions: SubscriptionConfig {
                cache_ttl_seconds: 1,
                ..SubscriptionConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject settings that would otherwise fail per message at runtime
    pub fn validate(&self) -> TransportResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(TransportError::configuration(
                "database.url",
                "database url must not be empty",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(TransportError::configuration(
                "database.max_connections",
                "must be greater than zero",
            ));
        }
        if self.endpoint.name.trim().is_empty() {
            return Err(TransportError::configuration(
                "endpoint.name",
                "endpoint name must not be empty",
            ));
        }
        if self.endpoint.error_queue.trim().is_empty() {
            return Err(TransportError::configuration(
                "endpoint.error_queue",
                "error queue must not be empty",
            ));
        }
        if self.addressing.default_schema.trim().is_empty() {
            return Err(TransportError::configuration(
                "addressing.default_schema",
                "default schema must not be empty",
            ));
        }
        if self.delayed_delivery.batch_size == 0 {
            return Err(TransportError::configuration(
                "delayed_delivery.batch_size",
                "must be greater than zero",
            ));
        }
        if self.delayed_delivery.processing_interval_ms == 0 {
            return Err(TransportError::configuration(
                "delayed_delivery.processing_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.delayed_delivery.table_suffix.trim().is_empty() {
            return Err(TransportError::configuration(
                "delayed_delivery.table_suffix",
                "must not be empty",
            ));
        }
        if self.subscriptions.table_name.trim().is_empty() {
            return Err(TransportError::configuration(
                "subscriptions.table_name",
                "must not be empty",
            ));
        }
        if self.expiry.purge_batch_size == 0 {
            return Err(TransportError::configuration(
                "expiry.purge_batch_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
