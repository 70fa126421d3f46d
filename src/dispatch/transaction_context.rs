//! The caller's transaction situation, passed explicitly into dispatch.

use sqlx::{PgConnection, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::ConnectionFactory;
use crate::error::{TransportError, TransportResult};

/// Where `Default`-consistency operations are written
#[derive(Debug)]
pub enum TransactionContext<'a> {
    /// No unit of work in progress; dispatch opens and commits its own transaction
    None,
    /// Inside a receive: reuse its connection so sends commit with the receive
    ConnectionBound(&'a mut PgConnection),
    /// A unit of work spanning several participants that share one transaction
    AmbientDistributed(AmbientTransaction),
}

impl TransactionContext<'_> {
    pub fn has_ambient_transaction(&self) -> bool {
        !matches!(self, TransactionContext::None)
    }
}

/// Shared handle on one open transaction.
///
/// Participants enlist by locking the handle and writing through its
/// connection; whoever began the transaction decides the outcome with
/// [`commit`](Self::commit) or [`rollback`](Self::rollback). Dropping the last
/// handle without committing rolls everything back.
#[derive(Debug, Clone)]
pub struct AmbientTransaction {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

/// Exclusive access to the ambient transaction while enlisted
pub struct Enlistment<'a> {
    guard: MutexGuard<'a, Option<Transaction<'static, Postgres>>>,
}

impl Enlistment<'_> {
    pub fn connection(&mut self) -> TransportResult<&mut PgConnection> {
        match self.guard.as_mut() {
            Some(transaction) => Ok(&mut **transaction),
            None => Err(TransportError::database(
                "ambient transaction has already completed",
            )),
        }
    }
}

impl AmbientTransaction {
    pub async fn begin(
        connection_factory: &dyn ConnectionFactory,
        cancellation: &CancellationToken,
    ) -> TransportResult<Self> {
        let transaction = connection_factory.begin(cancellation).await?;
        debug!("Began ambient transaction");
        Ok(Self::from_transaction(transaction))
    }

    pub fn from_transaction(transaction: Transaction<'static, Postgres>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(transaction))),
        }
    }

    pub async fn enlist(&self) -> Enlistment<'_> {
        Enlistment {
            guard: self.inner.lock().await,
        }
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn commit(&self) -> TransportResult<()> {
        let transaction = self.take().await?;
        transaction.commit().await?;
        debug!("Committed ambient transaction");
        Ok(())
    }

    pub async fn rollback(&self) -> TransportResult<()> {
        let transaction = self.take().await?;
        transaction.rollback().await?;
        debug!("Rolled back ambient transaction");
        Ok(())
    }

    async fn take(&self) -> TransportResult<Transaction<'static, Postgres>> {
        self.inner.lock().await.take().ok_or_else(|| {
            TransportError::database("ambient transaction has already completed")
        })
    }
}
