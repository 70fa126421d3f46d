//! # Database Access
//!
//! Connection factory abstraction over the SQLx pool and the cancellation
//! helper every connection-acquiring operation goes through.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sqlbus_core::config::DatabaseConfig;
//! use sqlbus_core::database::{ConnectionFactory, PgConnectionFactory};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = PgConnectionFactory::connect(&DatabaseConfig::default()).await?;
//! let token = CancellationToken::new();
//! let mut tx = factory.begin(&token).await?;
//! sqlx::query("SELECT 1").execute(&mut *tx).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;

pub use connection::{cancellable, ConnectionFactory, PgConnectionFactory};
