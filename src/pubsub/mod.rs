//! # Native Publish/Subscribe
//!
//! Subscriber discovery backed by a routing table instead of a broker.
//!
//! The layers stack as
//! `PolymorphicSubscriptionStore -> CachedSubscriptionStore -> PostgreSqlSubscriptionStore`:
//! the polymorphic layer expands a message type into its topic hierarchy, the
//! cache absorbs repeated lookups for the same topic set, and the table store
//! does one round trip per topic set.

pub mod cached_store;
pub mod polymorphic_store;
pub mod subscription_store;
pub mod topic;

pub use cached_store::CachedSubscriptionStore;
pub use polymorphic_store::PolymorphicSubscriptionStore;
pub use subscription_store::{PostgreSqlSubscriptionStore, SubscriptionStore};
pub use topic::{MessageTypeDescriptor, MessageTypeRegistry, MessageTypeRegistryBuilder};
