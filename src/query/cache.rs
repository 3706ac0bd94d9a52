use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Thread-safe LRU cache with optional TTL.
///
/// One type serves the term, posting, IDF and document caches: fixed
/// capacity, move-to-front on hit, evict-from-back on insert when full.
/// When a TTL is set, entries expire `ttl` after their last insert and a
/// background sweeper (see [`LruCache::spawn_sweeper`]) trims the expired
/// tail every `ttl / 2`.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Option<Duration>,
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    seq: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // recency order: lowest sequence number = least recently used
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let entry = inner.map.get(key)?;
        if let Some(expires_at) = entry.expires_at {
            if Instant::now() > expires_at {
                let seq = entry.seq;
                inner.map.remove(key);
                inner.order.remove(&seq);
                return None;
            }
        }
        // move to front
        let old_seq = entry.seq;
        let value = entry.value.clone();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.remove(&old_seq);
        inner.order.insert(seq, key.clone());
        inner.map.get_mut(key).expect("entry present").seq = seq;
        Some(value)
    }

    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);

        if let Some(entry) = inner.map.get(&key) {
            let old_seq = entry.seq;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.order.remove(&old_seq);
            inner.order.insert(seq, key.clone());
            let entry = inner.map.get_mut(&key).expect("entry present");
            entry.value = value;
            entry.expires_at = expires_at;
            entry.seq = seq;
            return;
        }

        if inner.map.len() >= self.capacity {
            // evict from the back
            let victim_seq = inner.order.keys().next().copied();
            if let Some(seq) = victim_seq {
                if let Some(victim) = inner.order.remove(&seq) {
                    inner.map.remove(&victim);
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.map.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Remove expired entries from the back until the first live one.
    /// Returns the number of removed entries.
    pub fn sweep_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let mut removed = 0;
        loop {
            let Some((&seq, key)) = inner.order.iter().next() else {
                break;
            };
            let expired = inner
                .map
                .get(key)
                .and_then(|e| e.expires_at)
                .map_or(false, |t| now > t);
            if !expired {
                break;
            }
            let key = key.clone();
            inner.order.remove(&seq);
            inner.map.remove(&key);
            removed += 1;
        }
        removed
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start the background sweeper. A no-op for caches without a TTL.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl / 2);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "cache sweeper removed expired entries");
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let cache: LruCache<String, i64> = LruCache::new(4, None);
        cache.put("dog".to_string(), 1);
        assert_eq!(cache.get(&"dog".to_string()), Some(1));
        assert_eq!(cache.get(&"cat".to_string()), None);
    }

    #[test]
    fn test_eviction_from_back() {
        let cache: LruCache<i64, i64> = LruCache::new(2, None);
        cache.put(1, 10);
        cache.put(2, 20);
        // touch 1 so that 2 becomes the eviction victim
        assert_eq!(cache.get(&1), Some(10));
        cache.put(3, 30);

        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_update_existing_key_keeps_size() {
        let cache: LruCache<i64, i64> = LruCache::new(2, None);
        cache.put(1, 10);
        cache.put(1, 11);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some(11));
    }

    #[test]
    fn test_ttl_expiry_on_get() {
        let cache: LruCache<i64, i64> = LruCache::new(4, Some(Duration::from_millis(10)));
        cache.put(1, 10);
        assert_eq!(cache.get(&1), Some(10));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_sweep_expired_stops_at_first_live_entry() {
        let cache: LruCache<i64, i64> = LruCache::new(8, Some(Duration::from_millis(20)));
        cache.put(1, 10);
        cache.put(2, 20);
        std::thread::sleep(Duration::from_millis(40));
        cache.put(3, 30); // fresh, at the front

        let removed = cache.sweep_expired();
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_clear() {
        let cache: LruCache<i64, i64> = LruCache::new(4, None);
        cache.put(1, 10);
        cache.clear();
        assert!(cache.is_empty());
    }
}
