//! # Transport Error Types
//!
//! Structured error handling for the queue transport using thiserror.
//! Every failure surfaces typed by kind so callers can tell a transient
//! connectivity problem from cancellation, poison rows, or caller mistakes.

use thiserror::Error;

/// SQLSTATE raised by PostgreSQL when a referenced table does not exist
const UNDEFINED_TABLE: &str = "42P01";

/// Transport error taxonomy
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid queue address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unsupported delivery constraint combination: {message}")]
    UnsupportedConstraintCombination { message: String },

    #[error("Poison message {message_id} received from {queue}: {reason}")]
    PoisonMessage {
        queue: String,
        message_id: String,
        reason: String,
    },

    #[error("Transient connectivity failure during {operation}: {message}")]
    TransientConnectivity { operation: String, message: String },

    #[error("Operation cancelled: {operation}")]
    OperationCancelled { operation: String },

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },
}

impl TransportError {
    /// Create an invalid address error
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported constraint combination error
    pub fn unsupported_constraints(message: impl Into<String>) -> Self {
        Self::UnsupportedConstraintCombination {
            message: message.into(),
        }
    }

    /// Create a poison message error
    pub fn poison_message(
        queue: impl Into<String>,
        message_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PoisonMessage {
            queue: queue.into(),
            message_id: message_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient connectivity error
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientConnectivity {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::OperationCancelled {
            operation: operation.into(),
        }
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue: queue.into(),
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the caller's retry policy should treat this failure as transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConnectivity { .. })
    }

    /// Whether this failure is a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::OperationCancelled { .. })
    }
}

/// Conversion from sqlx::Error to TransportError
impl From<sqlx::Error> for TransportError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(UNDEFINED_TABLE) {
                    TransportError::queue_not_found(db_err.message().to_string())
                } else {
                    TransportError::database(db_err.to_string())
                }
            }
            sqlx::Error::Io(e) => TransportError::transient("io", e.to_string()),
            sqlx::Error::Tls(e) => TransportError::transient("tls", e.to_string()),
            sqlx::Error::Protocol(msg) => TransportError::transient("protocol", msg),
            sqlx::Error::PoolTimedOut => {
                TransportError::transient("database_pool", "timed out acquiring a connection")
            }
            sqlx::Error::PoolClosed => {
                TransportError::transient("database_pool", "connection pool is closed")
            }
            sqlx::Error::WorkerCrashed => {
                TransportError::transient("database_pool", "connection worker crashed")
            }
            sqlx::Error::Configuration(config_err) => {
                TransportError::configuration("database", config_err.to_string())
            }
            other => TransportError::database(other.to_string()),
        }
    }
}

/// Conversion from serde_json::Error to TransportError
impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::serialization(err.to_string())
    }
}

/// Conversion from config::ConfigError to TransportError
impl From<config::ConfigError> for TransportError {
    fn from(err: config::ConfigError) -> Self {
        TransportError::configuration("config", err.to_string())
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
