//! # Queue Addressing
//!
//! Naming, quoting and resolution of queue addresses.
//!
//! - [`name_helper`] - bracket quoting for the wire form, double-quote quoting for SQL
//! - [`queue_address`] - `table@[schema]@[catalog]` parsing and canonical resolution
//! - [`translator`] - cached logical/physical translation

pub mod name_helper;
pub mod queue_address;
pub mod translator;

pub use queue_address::{AddressingRules, CanonicalQueueAddress, QueueAddress};
pub use translator::{translate, LogicalAddress, QueueAddressTranslator};
