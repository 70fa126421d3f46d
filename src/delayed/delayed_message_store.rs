//! # Delayed Message Store
//!
//! Scheduling table for messages that must not be delivered before a due time.
//!
//! A delayed send writes one row here in the same transaction as the rest of
//! the dispatch, with the real destination recorded in the
//! [`FORWARD_DESTINATION`](crate::constants::headers::FORWARD_DESTINATION)
//! header. Maturation moves due rows into the endpoint's input queue with a
//! single `DELETE ... RETURNING` feeding an `INSERT`, so a crash can neither
//! lose nor duplicate a message.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use crate::addressing::CanonicalQueueAddress;
use crate::constants::headers;
use crate::dispatch::DelayedDelivery;
use crate::error::TransportResult;
use crate::queue::queue_creator::{ensure_table, index_name};
use crate::queue::table_based_queue::duration_to_millis;
use crate::queue::{serialize_headers, OutgoingMessage};

#[derive(Debug, Clone)]
pub struct DelayedMessageStore {
    table: CanonicalQueueAddress,
    input_queue: CanonicalQueueAddress,
    store_sql: String,
    move_matured_sql: String,
    create_sql: String,
}

impl DelayedMessageStore {
    /// `table` holds scheduled rows; matured rows land in `input_queue`
    pub fn new(table: CanonicalQueueAddress, input_queue: CanonicalQueueAddress) -> Self {
        let delayed = table.qualified_table_name();
        let input = input_queue.qualified_table_name();

        let store_sql = format!(
            r#"
            INSERT INTO {delayed} (message_id, headers, body, due)
            VALUES (
                $1, $2, $3,
                CASE WHEN $4::TIMESTAMPTZ IS NOT NULL THEN $4::TIMESTAMPTZ
                     ELSE clock_timestamp() + ($5::BIGINT * INTERVAL '1 millisecond') END
            )
            "#
        );

        // Rows are inserted in due order so the input queue's seq follows it
        let move_matured_sql = format!(
            r#"
            WITH matured AS (
                DELETE FROM {delayed}
                WHERE seq IN (
                    SELECT seq FROM {delayed}
                    WHERE due <= clock_timestamp()
                    ORDER BY due, seq
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING seq, message_id, headers, body, due
            )
            INSERT INTO {input} (id, correlation_id, reply_to_address, recoverable, expires, headers, body)
            SELECT message_id,
                   headers::jsonb ->> '{correlation}',
                   headers::jsonb ->> '{reply_to}',
                   COALESCE(LOWER(headers::jsonb ->> '{recoverable}') <> 'false', TRUE),
                   NULL,
                   headers,
                   body
            FROM matured
            ORDER BY due, seq
            "#,
            correlation = headers::CORRELATION_ID,
            reply_to = headers::REPLY_TO_ADDRESS,
            recoverable = headers::RECOVERABLE,
        );

        let create_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {delayed} (
                seq BIGSERIAL NOT NULL,
                message_id UUID NOT NULL,
                headers TEXT NOT NULL,
                body BYTEA,
                due TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {due_index} ON {delayed} (due);
            "#,
            due_index = index_name(table.table(), "due_idx"),
        );

        Self {
            table,
            input_queue,
            store_sql,
            move_matured_sql,
            create_sql,
        }
    }

    pub fn table(&self) -> &CanonicalQueueAddress {
        &self.table
    }

    pub fn input_queue(&self) -> &CanonicalQueueAddress {
        &self.input_queue
    }

    /// Schedule `message` for `destination`. Runs on the caller's connection
    /// so the schedule commits or rolls back with the rest of the dispatch.
    pub async fn store(
        &self,
        conn: &mut PgConnection,
        message: &OutgoingMessage,
        delivery: &DelayedDelivery,
        destination: &CanonicalQueueAddress,
    ) -> TransportResult<()> {
        let mut message_headers = message.headers.clone();
        message_headers.insert(
            headers::FORWARD_DESTINATION.to_string(),
            Some(destination.address().to_string()),
        );
        let serialized = serialize_headers(&message_headers)?;

        let (due_at, delay_ms): (Option<DateTime<Utc>>, Option<i64>) = match delivery {
            DelayedDelivery::NotBefore(at) => (Some(*at), None),
            DelayedDelivery::With(delay) => (None, Some(duration_to_millis(*delay))),
        };

        sqlx::query(&self.store_sql)
            .bind(message.message_id)
            .bind(serialized)
            .bind(&message.body)
            .bind(due_at)
            .bind(delay_ms)
            .execute(&mut *conn)
            .await?;

        debug!(
            table = %self.table,
            message_id = %message.message_id,
            destination = %destination,
            due_at = ?due_at,
            delay_ms = ?delay_ms,
            "Stored delayed message"
        );
        Ok(())
    }

    /// Move up to `batch_size` due rows into the input queue
    pub async fn move_matured(
        &self,
        conn: &mut PgConnection,
        batch_size: u32,
    ) -> TransportResult<u64> {
        let result = sqlx::query(&self.move_matured_sql)
            .bind(i64::from(batch_size))
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn create_if_necessary(&self, conn: &mut PgConnection) -> TransportResult<bool> {
        ensure_table(conn, &self.table, &self.create_sql).await
    }
}
