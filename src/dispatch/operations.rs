//! Outgoing transport operations.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{TransportError, TransportResult};
use crate::queue::OutgoingMessage;

/// Which transaction an operation is bound to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DispatchConsistency {
    /// Join the ambient or receive transaction when there is one
    #[default]
    Default,
    /// Always a separate transaction, committed independently
    Isolated,
}

/// Earliest delivery time for a delayed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayedDelivery {
    /// Deliver no earlier than `now + delay`, measured by the database
    With(Duration),
    /// Deliver no earlier than this instant
    NotBefore(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryConstraints {
    pub delay: Option<DelayedDelivery>,
    /// Discard if not received within this long after sending
    pub discard_if_not_received_before: Option<Duration>,
}

impl DeliveryConstraints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn delayed_by(delay: Duration) -> Self {
        Self {
            delay: Some(DelayedDelivery::With(delay)),
            ..Self::default()
        }
    }

    pub fn not_before(at: DateTime<Utc>) -> Self {
        Self {
            delay: Some(DelayedDelivery::NotBefore(at)),
            ..Self::default()
        }
    }

    pub fn expiring_after(time_to_be_received: Duration) -> Self {
        Self {
            discard_if_not_received_before: Some(time_to_be_received),
            ..Self::default()
        }
    }

    /// Finite time-to-be-received; `Duration::MAX` means "never expires"
    pub fn time_to_be_received(&self) -> Option<Duration> {
        self.discard_if_not_received_before
            .filter(|ttbr| *ttbr != Duration::MAX)
    }

    pub fn is_delayed(&self) -> bool {
        self.delay.is_some()
    }

    /// A delayed message cannot also carry a finite time-to-be-received
    pub fn validate(&self) -> TransportResult<()> {
        if self.is_delayed() && self.time_to_be_received().is_some() {
            return Err(TransportError::unsupported_constraints(
                "delayed delivery of messages with a time-to-be-received is not supported",
            ));
        }
        Ok(())
    }
}

/// Send one message to one queue address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicastTransportOperation {
    pub message: OutgoingMessage,
    /// Destination in wire form (`table@[schema]@[catalog]`)
    pub destination: String,
    pub consistency: DispatchConsistency,
    pub constraints: DeliveryConstraints,
}

impl UnicastTransportOperation {
    pub fn new(message: OutgoingMessage, destination: impl Into<String>) -> Self {
        Self {
            message,
            destination: destination.into(),
            consistency: DispatchConsistency::Default,
            constraints: DeliveryConstraints::none(),
        }
    }

    pub fn isolated(mut self) -> Self {
        self.consistency = DispatchConsistency::Isolated;
        self
    }

    pub fn with_constraints(mut self, constraints: DeliveryConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Publish one message to every subscriber of its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastTransportOperation {
    pub message: OutgoingMessage,
    /// Full name of the published message type
    pub message_type: String,
    pub consistency: DispatchConsistency,
    pub constraints: DeliveryConstraints,
}

impl MulticastTransportOperation {
    pub fn new(message: OutgoingMessage, message_type: impl Into<String>) -> Self {
        Self {
            message,
            message_type: message_type.into(),
            consistency: DispatchConsistency::Default,
            constraints: DeliveryConstraints::none(),
        }
    }

    pub fn isolated(mut self) -> Self {
        self.consistency = DispatchConsistency::Isolated;
        self
    }

    pub fn with_constraints(mut self, constraints: DeliveryConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// One unicast operation per subscriber address
    pub fn expand(&self, subscribers: &[String]) -> Vec<UnicastTransportOperation> {
        subscribers
            .iter()
            .map(|address| UnicastTransportOperation {
                message: self.message.clone(),
                destination: address.clone(),
                consistency: self.consistency,
                constraints: self.constraints,
            })
            .collect()
    }
}

/// Batch produced by one logical send, publish or reply call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOperations {
    pub unicast: Vec<UnicastTransportOperation>,
    pub multicast: Vec<MulticastTransportOperation>,
}

impl TransportOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(mut self, operation: UnicastTransportOperation) -> Self {
        self.unicast.push(operation);
        self
    }

    pub fn publish(mut self, operation: MulticastTransportOperation) -> Self {
        self.multicast.push(operation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.unicast.is_empty() && self.multicast.is_empty()
    }

    pub fn len(&self) -> usize {
        self.unicast.len() + self.multicast.len()
    }

    /// Reject unsupported constraint combinations before any I/O
    pub fn validate(&self) -> TransportResult<()> {
        self.unicast
            .iter()
            .map(|operation| &operation.constraints)
            .chain(self.multicast.iter().map(|operation| &operation.constraints))
            .try_for_each(DeliveryConstraints::validate)
    }
}

impl From<UnicastTransportOperation> for TransportOperations {
    fn from(operation: UnicastTransportOperation) -> Self {
        Self::new().send(operation)
    }
}
