//! # Message Dispatcher
//!
//! Single outbound entry point. A batch is validated, multicast operations are
//! expanded into one unicast per subscriber, destinations are resolved and
//! deduplicated, and each consistency group is written inside exactly one
//! transaction:
//!
//! | Group      | Context                | Transaction                         |
//! |------------|------------------------|-------------------------------------|
//! | `Isolated` | any                    | new, committed independently        |
//! | `Default`  | `None`                 | new, committed by dispatch          |
//! | `Default`  | `ConnectionBound`      | the receive's own transaction       |
//! | `Default`  | `AmbientDistributed`   | the shared ambient transaction      |
//!
//! Delayed operations are written to the endpoint's delayed store on the same
//! connection instead of the destination queue.

use futures::future::try_join_all;
use sqlx::PgConnection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::operations::TransportOperations;
use super::sorter::{sort_operations, ResolvedOperation};
use super::transaction_context::TransactionContext;
use crate::addressing::QueueAddressTranslator;
use crate::database::{cancellable, ConnectionFactory};
use crate::delayed::DelayedMessageStore;
use crate::error::{TransportError, TransportResult};
use crate::pubsub::PolymorphicSubscriptionStore;
use crate::queue::TableBasedQueueCache;

pub struct MessageDispatcher {
    translator: Arc<QueueAddressTranslator>,
    queues: Arc<TableBasedQueueCache>,
    connection_factory: Arc<dyn ConnectionFactory>,
    delayed_store: Option<Arc<DelayedMessageStore>>,
    subscriptions: Option<Arc<PolymorphicSubscriptionStore>>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("delayed_delivery", &self.delayed_store.is_some())
            .field("subscriptions", &self.subscriptions.is_some())
            .finish_non_exhaustive()
    }
}

impl MessageDispatcher {
    pub fn new(
        translator: Arc<QueueAddressTranslator>,
        queues: Arc<TableBasedQueueCache>,
        connection_factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            translator,
            queues,
            connection_factory,
            delayed_store: None,
            subscriptions: None,
        }
    }

    pub fn with_delayed_store(mut self, store: Arc<DelayedMessageStore>) -> Self {
        self.delayed_store = Some(store);
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Arc<PolymorphicSubscriptionStore>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    /// Dispatch one batch.
    ///
    /// Any failure inside a group rolls back that whole group. Failures are
    /// not retried here.
    pub async fn dispatch(
        &self,
        operations: TransportOperations,
        context: TransactionContext<'_>,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        if operations.is_empty() {
            return Ok(());
        }
        self.check_capabilities(&operations)?;

        let TransportOperations {
            mut unicast,
            multicast,
        } = operations;

        if let Some(subscriptions) = &self.subscriptions {
            let lookups = multicast.iter().map(|operation| {
                subscriptions.get_subscribers(&operation.message_type, cancellation)
            });
            let resolved = try_join_all(lookups).await?;

            for (operation, subscribers) in multicast.iter().zip(resolved) {
                if subscribers.is_empty() {
                    debug!(
                        message_type = %operation.message_type,
                        message_id = %operation.message.message_id,
                        "No subscribers for published message"
                    );
                }
                unicast.extend(operation.expand(&subscribers));
            }
        }

        let sorted = sort_operations(unicast, &self.translator)?;

        if !sorted.isolated.is_empty() {
            let mut tx = self.connection_factory.begin(cancellation).await?;
            cancellable(cancellation, "dispatch_isolated", async {
                self.write_all(&mut *tx, &sorted.isolated).await?;
                tx.commit().await?;
                Ok(())
            })
            .await?;
            debug!(operations = sorted.isolated.len(), "Dispatched isolated operations");
        }

        if !sorted.default.is_empty() {
            self.dispatch_default(&sorted.default, context, cancellation)
                .await?;
        }

        Ok(())
    }

    async fn dispatch_default(
        &self,
        operations: &[ResolvedOperation],
        context: TransactionContext<'_>,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        match context {
            TransactionContext::None => {
                let mut tx = self.connection_factory.begin(cancellation).await?;
                cancellable(cancellation, "dispatch", async {
                    self.write_all(&mut *tx, operations).await?;
                    tx.commit().await?;
                    Ok(())
                })
                .await?;
            }
            TransactionContext::ConnectionBound(conn) => {
                cancellable(cancellation, "dispatch", self.write_all(conn, operations)).await?;
            }
            TransactionContext::AmbientDistributed(ambient) => {
                let mut enlistment = ambient.enlist().await;
                let conn = enlistment.connection()?;
                cancellable(cancellation, "dispatch", self.write_all(conn, operations)).await?;
            }
        }

        debug!(operations = operations.len(), "Dispatched operations");
        Ok(())
    }

    async fn write_all(
        &self,
        conn: &mut PgConnection,
        operations: &[ResolvedOperation],
    ) -> TransportResult<()> {
        for operation in operations {
            self.write(conn, operation).await?;
        }
        Ok(())
    }

    async fn write(&self, conn: &mut PgConnection, operation: &ResolvedOperation) -> TransportResult<()> {
        let result = match (&operation.constraints.delay, &self.delayed_store) {
            (Some(delivery), Some(store)) => {
                store
                    .store(conn, &operation.message, delivery, &operation.destination)
                    .await
            }
            (Some(_), None) => Err(delayed_delivery_unavailable()),
            (None, _) => {
                let queue = self.queues.get(&operation.destination);
                queue
                    .send(
                        conn,
                        &operation.message,
                        operation.constraints.time_to_be_received(),
                    )
                    .await
            }
        };

        result.map_err(|e| match e {
            TransportError::QueueNotFound { .. } => {
                TransportError::queue_not_found(operation.destination.address())
            }
            other => other,
        })
    }

    /// Fail before any I/O when the batch needs something this endpoint lacks
    fn check_capabilities(&self, operations: &TransportOperations) -> TransportResult<()> {
        operations.validate()?;

        let needs_delayed = operations
            .unicast
            .iter()
            .map(|operation| &operation.constraints)
            .chain(operations.multicast.iter().map(|operation| &operation.constraints))
            .any(|constraints| constraints.is_delayed());
        if needs_delayed && self.delayed_store.is_none() {
            return Err(delayed_delivery_unavailable());
        }

        if !operations.multicast.is_empty() && self.subscriptions.is_none() {
            return Err(TransportError::configuration(
                "subscriptions",
                "publishing requires a subscription store",
            ));
        }
        Ok(())
    }
}

fn delayed_delivery_unavailable() -> TransportError {
    TransportError::configuration(
        "delayed_delivery",
        "delayed delivery requires an endpoint with an input queue; send-only endpoints cannot delay messages",
    )
}
