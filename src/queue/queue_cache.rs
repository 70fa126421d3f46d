use dashmap::DashMap;
use std::sync::Arc;

use super::table_based_queue::TableBasedQueue;
use crate::addressing::CanonicalQueueAddress;

/// Process-wide cache of prepared queue statements, keyed by canonical address
#[derive(Debug, Default)]
pub struct TableBasedQueueCache {
    queues: DashMap<String, Arc<TableBasedQueue>>,
}

impl TableBasedQueueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &CanonicalQueueAddress) -> Arc<TableBasedQueue> {
        if let Some(queue) = self.queues.get(address.address()) {
            return Arc::clone(&queue);
        }

        Arc::clone(
            &self
                .queues
                .entry(address.address().to_string())
                .or_insert_with(|| Arc::new(TableBasedQueue::new(address.clone()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_address_shares_queue() {
        let cache = TableBasedQueueCache::new();
        let address = CanonicalQueueAddress::new("orders", "public", "shop");
        let first = cache.get(&address);
        let second = cache.get(&address);
        assert!(Arc::ptr_eq(&first, &second));

        let other = cache.get(&address.sibling("billing"));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
