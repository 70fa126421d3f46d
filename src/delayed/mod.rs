//! # Delayed Delivery
//!
//! "Deliver no earlier than T" built from a scheduling table, a background
//! mover and inbound interception.
//!
//! - [`delayed_message_store`] - scheduling table and the batched move
//! - [`maturation`] - background loop moving matured rows
//! - [`forwarder`] - strips or acts on the forward-destination header

pub mod delayed_message_store;
pub mod forwarder;
pub mod maturation;

pub use delayed_message_store::DelayedMessageStore;
pub use forwarder::{DelayedMessageForwarder, InterceptOutcome};
pub use maturation::{DelayedMessageProcessor, MaturationStats};
