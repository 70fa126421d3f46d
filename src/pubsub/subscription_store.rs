//! Subscription persistence in a routing table.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::addressing::CanonicalQueueAddress;
use crate::database::{cancellable, ConnectionFactory};
use crate::error::TransportResult;
use crate::queue::queue_creator::ensure_table;

/// Topic-level subscription storage
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Record that `endpoint` at `address` wants `topic`; idempotent
    async fn subscribe(
        &self,
        endpoint: &str,
        address: &str,
        topic: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()>;

    async fn unsubscribe(
        &self,
        endpoint: &str,
        topic: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()>;

    /// Distinct subscriber addresses across all of `topics`
    async fn get_subscribers(
        &self,
        topics: &[String],
        cancellation: &CancellationToken,
    ) -> TransportResult<Vec<String>>;
}

/// Subscription table keyed by `(endpoint, topic)`
pub struct PostgreSqlSubscriptionStore {
    table: CanonicalQueueAddress,
    connection_factory: Arc<dyn ConnectionFactory>,
    subscribe_sql: String,
    unsubscribe_sql: String,
    create_sql: String,
}

impl std::fmt::Debug for PostgreSqlSubscriptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgreSqlSubscriptionStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PostgreSqlSubscriptionStore {
    pub fn new(table: CanonicalQueueAddress, connection_factory: Arc<dyn ConnectionFactory>) -> Self {
        let qualified = table.qualified_table_name();

        let subscribe_sql = format!(
            r#"
            INSERT INTO {qualified} (queue_address, endpoint, topic)
            VALUES ($1, $2, $3)
            ON CONFLICT (endpoint, topic) DO UPDATE SET queue_address = EXCLUDED.queue_address
            "#
        );
        let unsubscribe_sql = format!("DELETE FROM {qualified} WHERE endpoint = $1 AND topic = $2");
        let create_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {qualified} (
                queue_address TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                topic TEXT NOT NULL,
                PRIMARY KEY (endpoint, topic)
            );
            "#
        );

        Self {
            table,
            connection_factory,
            subscribe_sql,
            unsubscribe_sql,
            create_sql,
        }
    }

    pub fn table(&self) -> &CanonicalQueueAddress {
        &self.table
    }

    pub async fn create_if_necessary(&self, cancellation: &CancellationToken) -> TransportResult<bool> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        cancellable(
            cancellation,
            "create_subscription_table",
            ensure_table(&mut conn, &self.table, &self.create_sql),
        )
        .await
    }

    /// One parameter per topic so the whole set is a single round trip
    fn get_subscribers_sql(&self, topic_count: usize) -> String {
        let placeholders = (1..=topic_count)
            .map(|index| format!("${index}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT DISTINCT queue_address FROM {} WHERE topic IN ({placeholders})",
            self.table.qualified_table_name()
        )
    }
}

#[async_trait]
impl SubscriptionStore for PostgreSqlSubscriptionStore {
    async fn subscribe(
        &self,
        endpoint: &str,
        address: &str,
        topic: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        cancellable(cancellation, "subscribe", async {
            sqlx::query(&self.subscribe_sql)
                .bind(address)
                .bind(endpoint)
                .bind(topic)
                .execute(&mut *conn)
                .await?;
            Ok(())
        })
        .await?;

        info!(endpoint = %endpoint, address = %address, topic = %topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        endpoint: &str,
        topic: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        cancellable(cancellation, "unsubscribe", async {
            sqlx::query(&self.unsubscribe_sql)
                .bind(endpoint)
                .bind(topic)
                .execute(&mut *conn)
                .await?;
            Ok(())
        })
        .await?;

        info!(endpoint = %endpoint, topic = %topic, "Unsubscribed");
        Ok(())
    }

    async fn get_subscribers(
        &self,
        topics: &[String],
        cancellation: &CancellationToken,
    ) -> TransportResult<Vec<String>> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }

        let sql = self.get_subscribers_sql(topics.len());
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        let subscribers = cancellable(cancellation, "get_subscribers", async {
            let mut query = sqlx::query_scalar::<_, String>(&sql);
            for topic in topics {
                query = query.bind(topic);
            }
            Ok(query.fetch_all(&mut *conn).await?)
        })
        .await?;

        debug!(
            topics = ?topics,
            subscribers = subscribers.len(),
            "Loaded subscribers"
        );
        Ok(subscribers)
    }
}
