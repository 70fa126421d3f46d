//! # Dispatch Engine
//!
//! Decides which table and which transaction every outgoing message goes to.
//!
//! - [`operations`] - unicast/multicast operations and delivery constraints
//! - [`transaction_context`] - the caller's transaction, passed explicitly
//! - [`sorter`] - consistency partitioning and deduplication
//! - [`dispatcher`] - transaction binding and the writes themselves

pub mod dispatcher;
pub mod operations;
pub mod sorter;
pub mod transaction_context;

pub use dispatcher::MessageDispatcher;
pub use operations::{
    DelayedDelivery, DeliveryConstraints, DispatchConsistency, MulticastTransportOperation,
    TransportOperations, UnicastTransportOperation,
};
pub use sorter::{sort_operations, ResolvedOperation, SortedOperations};
pub use transaction_context::{AmbientTransaction, Enlistment, TransactionContext};
