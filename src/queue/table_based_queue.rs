//! # Table-Based Queue
//!
//! One PostgreSQL table treated as a multi-producer/multi-consumer queue.
//!
//! ## Protocol
//!
//! - **Send** is a single insert. Expiry is computed by the database at write
//!   time (`clock_timestamp() + ttbr`), so reader clock skew cannot revive an
//!   expired message.
//! - **Receive** locks the oldest unlocked row with `FOR UPDATE SKIP LOCKED`
//!   and deletes it in the same statement, returning the deleted data. Seeing
//!   a row and removing it are one event; concurrent receivers never share a
//!   row and never block on each other's locks.
//! - **Peek** counts live rows without locking them, so it never hides a row
//!   from a receiver. Rows held by in-flight receives are still counted, and
//!   the count saturates at [`PEEK_BATCH_SIZE`](defaults::PEEK_BATCH_SIZE).
//!   It only feeds backpressure heuristics.
//! - **Purge** deletes everything.
//!
//! Scan order follows the `seq` column, so delivery is roughly FIFO but skipped
//! locked rows make ordering best-effort.

use sqlx::{FromRow, PgConnection, Row};
use std::time::Duration;
use tracing::{debug, warn};

use super::message::{serialize_headers, MessageRow, OutgoingMessage, ReceiveOutcome};
use super::queue_creator::{ensure_table, index_name};
use crate::addressing::CanonicalQueueAddress;
use crate::constants::defaults;
use crate::error::TransportResult;

/// SQL statements bound to one queue table
#[derive(Debug, Clone)]
pub struct TableBasedQueue {
    address: CanonicalQueueAddress,
    send_sql: String,
    send_raw_sql: String,
    receive_sql: String,
    peek_sql: String,
    purge_sql: String,
    purge_expired_sql: String,
    create_sql: String,
}

impl TableBasedQueue {
    pub fn new(address: CanonicalQueueAddress) -> Self {
        let table = address.qualified_table_name();

        let send_sql = format!(
            r#"
            INSERT INTO {table} (id, correlation_id, reply_to_address, recoverable, expires, headers, body)
            VALUES (
                $1, $2, $3, $4,
                CASE WHEN $5::BIGINT IS NULL THEN NULL
                     ELSE clock_timestamp() + ($5::BIGINT * INTERVAL '1 millisecond') END,
                $6, $7
            )
            "#
        );

        let send_raw_sql = format!(
            r#"
            INSERT INTO {table} (id, correlation_id, reply_to_address, recoverable, expires, headers, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#
        );

        let receive_sql = format!(
            r#"
            WITH message AS (
                SELECT seq FROM {table}
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM {table} AS queued
            USING message
            WHERE queued.seq = message.seq
            RETURNING queued.id, queued.correlation_id, queued.reply_to_address,
                      queued.recoverable, queued.expires, queued.headers, queued.body,
                      (queued.expires IS NOT NULL AND queued.expires < clock_timestamp()) AS expired
            "#
        );

        let peek_sql = format!(
            r#"
            SELECT COUNT(*) FROM (
                SELECT 1 FROM {table}
                WHERE expires IS NULL OR expires > clock_timestamp()
                LIMIT $1
            ) AS live
            "#
        );

        let purge_sql = format!("DELETE FROM {table}");

        let purge_expired_sql = format!(
            r#"
            DELETE FROM {table}
            WHERE seq IN (
                SELECT seq FROM {table}
                WHERE expires < clock_timestamp()
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            "#
        );

        let create_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                seq BIGSERIAL NOT NULL,
                id UUID NOT NULL,
                correlation_id TEXT,
                reply_to_address TEXT,
                recoverable BOOLEAN NOT NULL DEFAULT TRUE,
                expires TIMESTAMPTZ,
                headers TEXT NOT NULL,
                body BYTEA
            );
            CREATE INDEX IF NOT EXISTS {seq_index} ON {table} (seq);
            CREATE INDEX IF NOT EXISTS {expires_index} ON {table} (expires) WHERE expires IS NOT NULL;
            "#,
            seq_index = index_name(address.table(), "seq_idx"),
            expires_index = index_name(address.table(), "expires_idx"),
        );

        Self {
            address,
            send_sql,
            send_raw_sql,
            receive_sql,
            peek_sql,
            purge_sql,
            purge_expired_sql,
            create_sql,
        }
    }

    pub fn address(&self) -> &CanonicalQueueAddress {
        &self.address
    }

    /// Insert one message row. `time_to_be_received` of `None` never expires.
    pub async fn send(
        &self,
        conn: &mut PgConnection,
        message: &OutgoingMessage,
        time_to_be_received: Option<Duration>,
    ) -> TransportResult<()> {
        let headers = serialize_headers(&message.headers)?;
        let ttbr_ms = time_to_be_received.map(duration_to_millis);

        sqlx::query(&self.send_sql)
            .bind(message.message_id)
            .bind(message.correlation_id())
            .bind(message.reply_to_address())
            .bind(message.recoverable())
            .bind(ttbr_ms)
            .bind(headers)
            .bind(&message.body)
            .execute(&mut *conn)
            .await?;

        debug!(
            queue = %self.address,
            message_id = %message.message_id,
            ttbr_ms = ?ttbr_ms,
            "Sent message"
        );
        Ok(())
    }

    /// Insert a row verbatim, used to move poison rows to an error queue
    pub async fn send_raw(&self, conn: &mut PgConnection, row: &MessageRow) -> TransportResult<()> {
        sqlx::query(&self.send_raw_sql)
            .bind(row.id)
            .bind(&row.correlation_id)
            .bind(&row.reply_to_address)
            .bind(row.recoverable)
            .bind(row.expires)
            .bind(&row.headers)
            .bind(&row.body)
            .execute(&mut *conn)
            .await?;

        debug!(queue = %self.address, row_id = %row.id, "Forwarded raw row");
        Ok(())
    }

    /// Remove and return the next live row.
    ///
    /// Must run inside the caller's transaction: if it never commits, the row
    /// comes back. Expired rows met on the way are deleted and skipped.
    pub async fn receive(&self, conn: &mut PgConnection) -> TransportResult<ReceiveOutcome> {
        loop {
            let Some(pg_row) = sqlx::query(&self.receive_sql)
                .fetch_optional(&mut *conn)
                .await?
            else {
                return Ok(ReceiveOutcome::Empty);
            };

            let row = MessageRow::from_row(&pg_row)?;
            let expired: bool = pg_row.try_get("expired")?;

            if expired {
                debug!(
                    queue = %self.address,
                    row_id = %row.id,
                    expires = ?row.expires,
                    "Dropped expired message"
                );
                continue;
            }

            return Ok(match row.try_into_message() {
                Ok(message) => ReceiveOutcome::Delivered(message),
                Err(e) => {
                    warn!(
                        queue = %self.address,
                        row_id = %row.id,
                        error = %e,
                        "Received poison message"
                    );
                    ReceiveOutcome::Poison {
                        reason: e.to_string(),
                        row,
                    }
                }
            });
        }
    }

    /// Approximate number of live rows, capped at
    /// [`PEEK_BATCH_SIZE`](defaults::PEEK_BATCH_SIZE).
    ///
    /// Takes no row locks. Rows that concurrent receives are about to delete
    /// are included.
    pub async fn peek(&self, conn: &mut PgConnection) -> TransportResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&self.peek_sql)
            .bind(i64::from(defaults::PEEK_BATCH_SIZE))
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Delete every row; returns how many were removed
    pub async fn purge(&self, conn: &mut PgConnection) -> TransportResult<u64> {
        let result = sqlx::query(&self.purge_sql).execute(&mut *conn).await?;
        warn!(
            queue = %self.address,
            purged = result.rows_affected(),
            "Purged queue"
        );
        Ok(result.rows_affected())
    }

    /// Delete up to `batch_size` expired rows
    pub async fn purge_expired(
        &self,
        conn: &mut PgConnection,
        batch_size: u32,
    ) -> TransportResult<u64> {
        let result = sqlx::query(&self.purge_expired_sql)
            .bind(i64::from(batch_size))
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() > 0 {
            debug!(
                queue = %self.address,
                purged = result.rows_affected(),
                "Purged expired messages"
            );
        }
        Ok(result.rows_affected())
    }

    /// Create the table and its indexes unless they exist
    pub async fn create_if_necessary(&self, conn: &mut PgConnection) -> TransportResult<bool> {
        ensure_table(conn, &self.address, &self.create_sql).await
    }
}

/// Longest interval handed to the database, roughly 100 years. Anything
/// longer overflows `timestamptz` arithmetic and is treated as this.
pub(crate) const MAX_INTERVAL_MILLIS: i64 = 3_155_760_000_000;

pub(crate) fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis())
        .unwrap_or(i64::MAX)
        .min(MAX_INTERVAL_MILLIS)
}
