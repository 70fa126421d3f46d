//! Type-aware subscriptions.
//!
//! A subscription to a type is stored as one row per topic in its hierarchy,
//! and a publish looks up subscribers across the published type's full topic
//! set. A subscriber to an interface therefore receives every concrete type
//! implementing it, once.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::subscription_store::SubscriptionStore;
use super::topic::MessageTypeRegistry;
use crate::error::TransportResult;

#[derive(Clone)]
pub struct PolymorphicSubscriptionStore {
    inner: Arc<dyn SubscriptionStore>,
    registry: Arc<MessageTypeRegistry>,
}

impl std::fmt::Debug for PolymorphicSubscriptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymorphicSubscriptionStore")
            .field("registered_types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl PolymorphicSubscriptionStore {
    pub fn new(inner: Arc<dyn SubscriptionStore>, registry: Arc<MessageTypeRegistry>) -> Self {
        Self { inner, registry }
    }

    pub fn registry(&self) -> &MessageTypeRegistry {
        &self.registry
    }

    pub async fn subscribe(
        &self,
        endpoint: &str,
        address: &str,
        message_type: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        for topic in self.registry.topics_for(message_type) {
            self.inner
                .subscribe(endpoint, address, &topic, cancellation)
                .await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(
        &self,
        endpoint: &str,
        message_type: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        for topic in self.registry.topics_for(message_type) {
            self.inner.unsubscribe(endpoint, &topic, cancellation).await?;
        }
        Ok(())
    }

    /// Distinct subscriber addresses for `message_type`, in first-seen order
    pub async fn get_subscribers(
        &self,
        message_type: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<Vec<String>> {
        let topics = self.registry.topics_for(message_type);
        let found = self.inner.get_subscribers(&topics, cancellation).await?;

        let mut seen = HashSet::with_capacity(found.len());
        let subscribers: Vec<String> = found
            .into_iter()
            .filter(|address| seen.insert(address.clone()))
            .collect();

        debug!(
            message_type = %message_type,
            topics = topics.len(),
            subscribers = subscribers.len(),
            "Resolved subscribers"
        );
        Ok(subscribers)
    }
}
