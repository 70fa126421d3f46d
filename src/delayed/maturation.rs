//! Background mover for matured delayed messages.
//!
//! One processor per endpoint instance. Each tick opens its own transaction
//! and moves one batch; while batches come back full the processor keeps
//! draining without waiting for the next tick. Failures are logged and retried
//! on the next tick. On cancellation the in-flight transaction is dropped
//! uncommitted.

use sqlx::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::delayed_message_store::DelayedMessageStore;
use crate::database::{cancellable, ConnectionFactory};
use crate::error::TransportResult;

/// Runtime statistics for the maturation loop
#[derive(Debug, Default)]
pub struct MaturationStats {
    /// Batches committed
    pub batches: AtomicU64,
    /// Rows moved into the input queue
    pub messages_moved: AtomicU64,
    /// Ticks that failed and will be retried
    pub failures: AtomicU64,
}

impl MaturationStats {
    pub fn messages_moved(&self) -> u64 {
        self.messages_moved.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct DelayedMessageProcessor {
    store: Arc<DelayedMessageStore>,
    connection_factory: Arc<dyn ConnectionFactory>,
    interval: Duration,
    batch_size: u32,
    stats: Arc<MaturationStats>,
}

impl std::fmt::Debug for DelayedMessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedMessageProcessor")
            .field("table", self.store.table())
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .field("stats", &self.stats)
            .finish()
    }
}

impl DelayedMessageProcessor {
    pub fn new(
        store: Arc<DelayedMessageStore>,
        connection_factory: Arc<dyn ConnectionFactory>,
        interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            connection_factory,
            interval,
            batch_size,
            stats: Arc::new(MaturationStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MaturationStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the loop; it exits once `cancellation` fires
    pub fn start(self: Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancellation).await })
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            table = %self.store.table(),
            destination = %self.store.input_queue(),
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Starting delayed message maturation"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.drain(&cancellation).await {
                if e.is_cancelled() {
                    debug!("Maturation batch cancelled");
                    break;
                }
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    table = %self.store.table(),
                    destination = %self.store.input_queue(),
                    error = %e,
                    "Delayed message maturation failed; retrying next tick"
                );
            }
        }

        info!(
            table = %self.store.table(),
            moved = self.stats.messages_moved(),
            "Stopped delayed message maturation"
        );
    }

    /// Move batches until one comes back short
    pub async fn drain(&self, cancellation: &CancellationToken) -> TransportResult<u64> {
        let mut total = 0;
        loop {
            let moved = self.process_batch(cancellation).await?;
            total += moved;
            if moved == 0 || moved < u64::from(self.batch_size) {
                return Ok(total);
            }
        }
    }

    /// Move one batch in its own transaction
    pub async fn process_batch(&self, cancellation: &CancellationToken) -> TransportResult<u64> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;

        let moved = cancellable(cancellation, "move_matured", async {
            let mut tx = conn.begin().await?;
            let moved = self.store.move_matured(&mut *tx, self.batch_size).await?;
            tx.commit().await?;
            Ok(moved)
        })
        .await?;

        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        if moved > 0 {
            self.stats.messages_moved.fetch_add(moved, Ordering::Relaxed);
            debug!(
                table = %self.store.table(),
                destination = %self.store.input_queue(),
                moved,
                "Matured delayed messages"
            );
        }
        Ok(moved)
    }
}
