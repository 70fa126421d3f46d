//! # Receive Cycle
//!
//! One receive-and-process unit of work: the part of the message pump that
//! must be transactional. The pump itself (concurrency, backoff, retry
//! policy) belongs to the caller, which calls
//! [`MessageReceiver::receive_once`] in a loop.
//!
//! Within one transaction the cycle
//! 1. removes the next row from the input queue,
//! 2. forwards it raw to the error queue if it cannot be parsed,
//! 3. lets delayed-delivery interception forward it if it belongs elsewhere,
//! 4. otherwise runs the handler with the receive's connection, so anything
//!    the handler dispatches with [`TransactionContext::ConnectionBound`]
//!    commits or rolls back together with the receive.

use async_trait::async_trait;
use sqlx::PgConnection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::database::{cancellable, ConnectionFactory};
use crate::delayed::{DelayedMessageForwarder, InterceptOutcome};
use crate::dispatch::TransactionContext;
use crate::error::{TransportError, TransportResult};
use crate::queue::{IncomingMessage, ReceiveOutcome, TableBasedQueue};

/// Application logic invoked for each locally delivered message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returning an error rolls back the receive; the message becomes
    /// available again.
    async fn handle(
        &self,
        message: IncomingMessage,
        context: TransactionContext<'_>,
        cancellation: &CancellationToken,
    ) -> TransportResult<()>;
}

/// Result of one committed receive cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveResult {
    Empty,
    Processed { message_id: Uuid },
    Forwarded { message_id: Uuid, destination: String },
    PoisonForwarded { row_id: Uuid, error_queue: String },
}

pub struct MessageReceiver {
    input_queue: Arc<TableBasedQueue>,
    error_queue: Arc<TableBasedQueue>,
    connection_factory: Arc<dyn ConnectionFactory>,
    forwarder: Option<Arc<DelayedMessageForwarder>>,
    purge_batch_size: u32,
}

impl std::fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("input_queue", self.input_queue.address())
            .field("error_queue", self.error_queue.address())
            .field("delayed_forwarding", &self.forwarder.is_some())
            .finish()
    }
}

impl MessageReceiver {
    pub fn new(
        input_queue: Arc<TableBasedQueue>,
        error_queue: Arc<TableBasedQueue>,
        connection_factory: Arc<dyn ConnectionFactory>,
        purge_batch_size: u32,
    ) -> Self {
        Self {
            input_queue,
            error_queue,
            connection_factory,
            forwarder: None,
            purge_batch_size,
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<DelayedMessageForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn input_queue(&self) -> &TableBasedQueue {
        &self.input_queue
    }

    /// Run one receive cycle in its own transaction.
    ///
    /// Cancellation drops the transaction uncommitted and surfaces as
    /// [`OperationCancelled`](crate::error::TransportError::OperationCancelled).
    pub async fn receive_once(
        &self,
        handler: &dyn MessageHandler,
        cancellation: &CancellationToken,
    ) -> TransportResult<ReceiveResult> {
        let mut tx = self.connection_factory.begin(cancellation).await?;

        let result = cancellable(cancellation, "receive", async {
            let result = self.process(&mut *tx, handler, cancellation).await?;
            // Expired rows dropped on the way are only gone once this commits
            tx.commit().await?;
            Ok(result)
        })
        .await;

        match &result {
            Err(e) if e.is_cancelled() => {
                debug!(queue = %self.input_queue.address(), "Receive cancelled");
            }
            Err(e) => {
                debug!(
                    queue = %self.input_queue.address(),
                    error = %e,
                    "Receive rolled back"
                );
            }
            Ok(_) => {}
        }
        result
    }

    async fn process(
        &self,
        conn: &mut PgConnection,
        handler: &dyn MessageHandler,
        cancellation: &CancellationToken,
    ) -> TransportResult<ReceiveResult> {
        let message = match self.input_queue.receive(conn).await? {
            ReceiveOutcome::Empty => return Ok(ReceiveResult::Empty),
            ReceiveOutcome::Poison { row, reason } => {
                if let Err(e) = self.error_queue.send_raw(conn, &row).await {
                    if e.is_transient() || e.is_cancelled() {
                        return Err(e);
                    }
                    error!(
                        queue = %self.input_queue.address(),
                        row_id = %row.id,
                        destination = %self.error_queue.address(),
                        error = %e,
                        "Failed to move poison message to error queue"
                    );
                    // The row stays in the input queue once this rolls back
                    return Err(TransportError::poison_message(
                        self.input_queue.address().address(),
                        row.id.to_string(),
                        format!("{reason}; error queue unavailable: {e}"),
                    ));
                }
                warn!(
                    queue = %self.input_queue.address(),
                    row_id = %row.id,
                    destination = %self.error_queue.address(),
                    reason = %reason,
                    "Moved poison message to error queue"
                );
                return Ok(ReceiveResult::PoisonForwarded {
                    row_id: row.id,
                    error_queue: self.error_queue.address().address().to_string(),
                });
            }
            ReceiveOutcome::Delivered(message) => message,
        };

        let message_id = message.message_id;
        let message = match &self.forwarder {
            Some(forwarder) => match forwarder.intercept(message, conn, cancellation).await? {
                InterceptOutcome::ProcessLocally(message) => message,
                InterceptOutcome::Forwarded { destination } => {
                    return Ok(ReceiveResult::Forwarded {
                        message_id,
                        destination,
                    });
                }
            },
            None => message,
        };

        handler
            .handle(message, TransactionContext::ConnectionBound(conn), cancellation)
            .await?;

        debug!(
            queue = %self.input_queue.address(),
            message_id = %message_id,
            "Processed message"
        );
        Ok(ReceiveResult::Processed { message_id })
    }

    /// Approximate number of messages waiting
    pub async fn peek(&self, cancellation: &CancellationToken) -> TransportResult<i64> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        cancellable(cancellation, "peek", self.input_queue.peek(&mut conn)).await
    }

    /// Delete expired rows in batches until none remain
    pub async fn purge_expired_messages(
        &self,
        cancellation: &CancellationToken,
    ) -> TransportResult<u64> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        let mut total = 0;
        loop {
            let purged = cancellable(
                cancellation,
                "purge_expired",
                self.input_queue
                    .purge_expired(&mut conn, self.purge_batch_size),
            )
            .await?;
            total += purged;
            if purged == 0 || purged < u64::from(self.purge_batch_size) {
                break;
            }
        }
        if total > 0 {
            debug!(
                queue = %self.input_queue.address(),
                purged = total,
                "Purged expired messages"
            );
        }
        Ok(total)
    }

    /// Delete every message in the input queue
    pub async fn purge(&self, cancellation: &CancellationToken) -> TransportResult<u64> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;
        cancellable(cancellation, "purge", self.input_queue.purge(&mut conn)).await
    }
}
