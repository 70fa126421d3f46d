//! # Transport Constants
//!
//! Reserved header keys and default table naming used across the transport.
//! Every reserved header lives under the `SqlBus.` prefix so it cannot collide
//! with application headers.

/// Reserved header names
pub mod headers {
    /// Prefix shared by every header the transport owns
    pub const RESERVED_PREFIX: &str = "SqlBus.";

    /// Real destination of a delayed message. Its presence marks a matured
    /// delayed message; its absence marks a normal one.
    pub const FORWARD_DESTINATION: &str = "SqlBus.ForwardDestination";

    /// Correlation identifier, mirrored into the `correlation_id` column
    pub const CORRELATION_ID: &str = "SqlBus.CorrelationId";

    /// Reply address, mirrored into the `reply_to_address` column
    pub const REPLY_TO_ADDRESS: &str = "SqlBus.ReplyToAddress";

    /// Set to "false" for non-durable messages
    pub const RECOVERABLE: &str = "SqlBus.Recoverable";
}

/// Default names and sizes
pub mod defaults {
    /// Default schema when neither configuration nor the address names one
    pub const SCHEMA: &str = "public";

    /// Suffix appended to the endpoint's input queue name for its delayed table
    pub const DELAYED_TABLE_SUFFIX: &str = "Delayed";

    /// Default subscription routing table
    pub const SUBSCRIPTION_TABLE: &str = "SubscriptionRouting";

    /// Default error queue
    pub const ERROR_QUEUE: &str = "error";

    /// Rows moved per maturation batch
    pub const MATURATION_BATCH_SIZE: u32 = 100;

    /// Milliseconds between maturation ticks
    pub const MATURATION_INTERVAL_MS: u64 = 1000;

    /// Seconds a subscriber list stays cached
    pub const SUBSCRIPTION_CACHE_TTL_SECONDS: u64 = 5;

    /// Expired rows deleted per purge batch
    pub const EXPIRED_PURGE_BATCH_SIZE: u32 = 10_000;

    /// Upper bound used when peeking for approximate queue length. Peek
    /// never reports more than this.
    pub const PEEK_BATCH_SIZE: u32 = 50;
}

/// Environment variable names
pub mod env {
    /// Primary environment selector
    pub const ENVIRONMENT: &str = "SQLBUS_ENV";

    /// Secondary environment selector
    pub const APP_ENVIRONMENT: &str = "APP_ENV";

    /// Prefix for configuration overrides (`SQLBUS__ENDPOINT__NAME=orders`)
    pub const CONFIG_PREFIX: &str = "SQLBUS";
}
