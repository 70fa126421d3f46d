//! TTL cache in front of a [`SubscriptionStore`].
//!
//! Only successful lookups are stored. Every miss awaits its own fetch, so a
//! cancelled or failed lookup can never be observed by a later caller.
//!
//! Each topic carries a generation bumped on subscribe and unsubscribe. An
//! entry records the generations of its topics as they were before the fetch
//! started and is only served while they are unchanged, so a lookup that
//! overlaps a subscription change never outlives it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::subscription_store::SubscriptionStore;
use crate::error::TransportResult;

const KEY_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone)]
struct CachedSubscribers {
    topics: Vec<String>,
    subscribers: Vec<String>,
    generations: Vec<u64>,
    fetched_at: Instant,
}

impl CachedSubscribers {
    fn is_fresh(&self, ttl: Duration, generations: &[u64]) -> bool {
        self.fetched_at.elapsed() < ttl && self.generations == generations
    }
}

/// Caches subscriber lists per topic set for a fixed time-to-live
pub struct CachedSubscriptionStore {
    inner: Arc<dyn SubscriptionStore>,
    ttl: Duration,
    entries: DashMap<String, CachedSubscribers>,
    topic_generations: DashMap<String, u64>,
}

impl std::fmt::Debug for CachedSubscriptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSubscriptionStore")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl CachedSubscriptionStore {
    pub fn new(inner: Arc<dyn SubscriptionStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
            topic_generations: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cached_entries(&self) -> usize {
        self.entries.len()
    }

    /// Drop every entry whose topic set includes `topic`
    pub fn invalidate(&self, topic: &str) {
        // Entries from fetches already in flight carry the old generation
        *self.topic_generations.entry(topic.to_string()).or_insert(0) += 1;
        self.entries
            .retain(|_, entry| !entry.topics.iter().any(|cached| cached == topic));
        debug!(topic = %topic, "Invalidated cached subscribers");
    }

    fn generations(&self, topics: &[String]) -> Vec<u64> {
        topics
            .iter()
            .map(|topic| self.topic_generations.get(topic).map_or(0, |g| *g))
            .collect()
    }

    fn key(topics: &[String]) -> String {
        topics.join(&KEY_SEPARATOR.to_string())
    }
}

#[async_trait]
impl SubscriptionStore for CachedSubscriptionStore {
    async fn subscribe(
        &self,
        endpoint: &str,
        address: &str,
        topic: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        self.inner
            .subscribe(endpoint, address, topic, cancellation)
            .await?;
        self.invalidate(topic);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        endpoint: &str,
        topic: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        self.inner.unsubscribe(endpoint, topic, cancellation).await?;
        self.invalidate(topic);
        Ok(())
    }

    async fn get_subscribers(
        &self,
        topics: &[String],
        cancellation: &CancellationToken,
    ) -> TransportResult<Vec<String>> {
        let key = Self::key(topics);
        let generations = self.generations(topics);

        if let Some(entry) = self.entries.get(&key) {
            if entry.is_fresh(self.ttl, &generations) {
                return Ok(entry.subscribers.clone());
            }
        }

        // No map guard is held across this await
        let subscribers = self.inner.get_subscribers(topics, cancellation).await?;

        self.entries.insert(
            key,
            CachedSubscribers {
                topics: topics.to_vec(),
                subscribers: subscribers.clone(),
                generations,
                fetched_at: Instant::now(),
            },
        );
        Ok(subscribers)
    }
}
