use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{TransportError, TransportResult};

/// Supplies open database connections.
///
/// Whoever opens a connection owns it; connections are never shared between
/// concurrent units of work.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a ready connection
    async fn open_connection(
        &self,
        cancellation: &CancellationToken,
    ) -> TransportResult<PoolConnection<Postgres>>;

    /// Open a connection with a transaction already started on it
    async fn begin(
        &self,
        cancellation: &CancellationToken,
    ) -> TransportResult<Transaction<'static, Postgres>>;
}

/// Pool-backed connection factory
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    pool: PgPool,
}

impl PgConnectionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> TransportResult<Self> {
        info!(
            max_connections = config.max_connections,
            "Connecting transport connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Name of the connected database, the default catalog
    pub async fn current_database(&self) -> TransportResult<String> {
        let name = sqlx::query_scalar::<_, String>("SELECT current_database()")
            .fetch_one(&self.pool)
            .await?;
        debug!(database = %name, "Resolved current database");
        Ok(name)
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn open_connection(
        &self,
        cancellation: &CancellationToken,
    ) -> TransportResult<PoolConnection<Postgres>> {
        cancellable(cancellation, "open_connection", async {
            Ok(self.pool.acquire().await?)
        })
        .await
    }

    async fn begin(
        &self,
        cancellation: &CancellationToken,
    ) -> TransportResult<Transaction<'static, Postgres>> {
        cancellable(cancellation, "begin_transaction", async {
            Ok(self.pool.begin().await?)
        })
        .await
    }
}

/// Run `operation` unless `cancellation` fires first.
///
/// On cancellation the operation future is dropped, so any transaction it
/// holds rolls back without committing.
pub async fn cancellable<T, F>(
    cancellation: &CancellationToken,
    operation: &str,
    future: F,
) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    if cancellation.is_cancelled() {
        return Err(TransportError::cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(TransportError::cancelled(operation)),
        result = future => result,
    }
}
