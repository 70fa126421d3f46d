//! Inbound interception of matured delayed messages.

use sqlx::PgConnection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::addressing::{CanonicalQueueAddress, QueueAddressTranslator};
use crate::constants::headers;
use crate::dispatch::{MessageDispatcher, TransactionContext, UnicastTransportOperation};
use crate::error::TransportResult;
use crate::queue::IncomingMessage;

/// What the receive cycle should do with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptOutcome {
    /// Hand to application code; any forward header has been stripped
    ProcessLocally(IncomingMessage),
    /// Sent on to its real destination; acknowledge without processing
    Forwarded { destination: String },
}

pub struct DelayedMessageForwarder {
    local_address: CanonicalQueueAddress,
    translator: Arc<QueueAddressTranslator>,
    dispatcher: Arc<MessageDispatcher>,
}

impl std::fmt::Debug for DelayedMessageForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedMessageForwarder")
            .field("local_address", &self.local_address)
            .finish_non_exhaustive()
    }
}

impl DelayedMessageForwarder {
    pub fn new(
        local_address: CanonicalQueueAddress,
        translator: Arc<QueueAddressTranslator>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        Self {
            local_address,
            translator,
            dispatcher,
        }
    }

    /// Real destination when the message must leave this queue
    pub fn forward_destination(
        &self,
        message: &IncomingMessage,
    ) -> TransportResult<Option<CanonicalQueueAddress>> {
        let Some(destination) = message.header(headers::FORWARD_DESTINATION) else {
            return Ok(None);
        };
        let destination = self.translator.translate_physical(destination)?;
        if destination == self.local_address {
            return Ok(None);
        }
        Ok(Some(destination))
    }

    /// Forwarding writes through `conn`, so it commits with the receive
    pub async fn intercept(
        &self,
        mut message: IncomingMessage,
        conn: &mut PgConnection,
        cancellation: &CancellationToken,
    ) -> TransportResult<InterceptOutcome> {
        let destination = self.forward_destination(&message)?;
        message.headers.remove(headers::FORWARD_DESTINATION);

        let Some(destination) = destination else {
            return Ok(InterceptOutcome::ProcessLocally(message));
        };

        let message_id = message.message_id;
        let operation =
            UnicastTransportOperation::new(message.into_outgoing(), destination.address());
        self.dispatcher
            .dispatch(
                operation.into(),
                TransactionContext::ConnectionBound(conn),
                cancellation,
            )
            .await?;

        info!(
            message_id = %message_id,
            destination = %destination,
            "Forwarded matured delayed message"
        );

        Ok(InterceptOutcome::Forwarded {
            destination: destination.address().to_string(),
        })
    }
}
