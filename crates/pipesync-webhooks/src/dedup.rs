//! Delivery deduplication.
//!
//! The remote system delivers at-least-once, so a short window keyed by
//! `(entity.id, event_time)` is enough to absorb redeliveries; it does
//! not try to be an infinite-history idempotency store.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Deterministic dedup key for one delivery.
#[must_use]
pub fn delivery_key(entity_id: &str, event_time: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update(b":");
    hasher.update(event_time.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sliding-window cache of recently observed deliveries.
pub struct DedupCache {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    /// Create a cache with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record a delivery; returns `true` for the first observation within
    /// the window, `false` for a duplicate.
    pub fn observe(&self, entity_id: &str, event_time: &str) -> bool {
        let key = delivery_key(entity_id, event_time);
        let now = Instant::now();
        let Ok(mut seen) = self.seen.lock() else {
            // A poisoned cache degrades to accepting the delivery; the
            // pull it triggers is idempotent anyway.
            return true;
        };
        seen.retain(|_, observed| now.duration_since(*observed) < self.window);
        match seen.get(&key) {
            Some(_) => false,
            None => {
                seen.insert(key, now);
                true
            }
        }
    }

    /// Number of entries currently tracked. Test inspection helper.
    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the cache is empty. Test inspection helper.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic_and_distinct() {
        let a = delivery_key("PL-9", "2024-04-03T12:00:00Z");
        let b = delivery_key("PL-9", "2024-04-03T12:00:00Z");
        let c = delivery_key("PL-9", "2024-04-03T12:00:01Z");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_duplicate_within_window_is_rejected() {
        let cache = DedupCache::new(Duration::from_secs(60));
        assert!(cache.observe("PL-9", "t1"));
        assert!(!cache.observe("PL-9", "t1"));
        // A different event_time is a different delivery.
        assert!(cache.observe("PL-9", "t2"));
    }

    #[test]
    fn test_expired_entries_are_purged() {
        let cache = DedupCache::new(Duration::from_millis(10));
        assert!(cache.observe("PL-9", "t1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.observe("PL-9", "t1"));
        assert_eq!(cache.len(), 1);
    }
}
