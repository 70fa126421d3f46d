//! # Table-Based Queues
//!
//! The send/receive/peek/purge protocol over plain tables.
//!
//! - [`message`] - outgoing/incoming messages, raw rows and header serialization
//! - [`table_based_queue`] - the SQL protocol for one queue table
//! - [`queue_cache`] - shared per-address statement cache
//! - [`queue_creator`] - idempotent, concurrency-safe table creation

pub mod message;
pub mod queue_cache;
pub mod queue_creator;
pub mod table_based_queue;

pub use message::{
    deserialize_headers, serialize_headers, Headers, IncomingMessage, MessageRow,
    OutgoingMessage, ReceiveOutcome,
};
pub use queue_cache::TableBasedQueueCache;
pub use table_based_queue::TableBasedQueue;
