//! Resolve, partition and deduplicate unicast operations.

use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use super::operations::{DeliveryConstraints, DispatchConsistency, UnicastTransportOperation};
use crate::addressing::{CanonicalQueueAddress, QueueAddressTranslator};
use crate::error::TransportResult;
use crate::queue::OutgoingMessage;

/// A unicast operation with its destination resolved to a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperation {
    pub message: OutgoingMessage,
    pub destination: CanonicalQueueAddress,
    pub constraints: DeliveryConstraints,
}

#[derive(Debug, Default)]
pub struct SortedOperations {
    pub default: Vec<ResolvedOperation>,
    pub isolated: Vec<ResolvedOperation>,
    /// Redundant operations dropped
    pub deduplicated: usize,
}

impl SortedOperations {
    pub fn is_empty(&self) -> bool {
        self.default.is_empty() && self.isolated.is_empty()
    }
}

#[derive(Default)]
struct Group {
    operations: Vec<ResolvedOperation>,
    seen: HashSet<(Uuid, String)>,
}

impl Group {
    /// Keep the first operation per (message, canonical destination)
    fn push(&mut self, operation: ResolvedOperation) -> bool {
        let key = (
            operation.message.message_id,
            operation.destination.address().to_string(),
        );
        if !self.seen.insert(key) {
            return false;
        }
        self.operations.push(operation);
        true
    }
}

/// Split operations into `Default` and `Isolated` groups, each free of
/// duplicate deliveries. Order within a group is preserved.
pub fn sort_operations(
    operations: Vec<UnicastTransportOperation>,
    translator: &QueueAddressTranslator,
) -> TransportResult<SortedOperations> {
    let mut default = Group::default();
    let mut isolated = Group::default();
    let mut deduplicated = 0;

    for operation in operations {
        let destination = translator.translate_physical(&operation.destination)?;
        let resolved = ResolvedOperation {
            message: operation.message,
            destination,
            constraints: operation.constraints,
        };

        let group = match operation.consistency {
            DispatchConsistency::Default => &mut default,
            DispatchConsistency::Isolated => &mut isolated,
        };

        let message_id = resolved.message.message_id;
        let destination = resolved.destination.address().to_string();
        if !group.push(resolved) {
            deduplicated += 1;
            debug!(
                message_id = %message_id,
                destination = %destination,
                "Dropped duplicate operation"
            );
        }
    }

    Ok(SortedOperations {
        default: default.operations,
        isolated: isolated.operations,
        deduplicated,
    })
}
