use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use super::{PageCache, PageContainer};

/// Default number of containers held by the primary tier.
pub const DEFAULT_LOG_CAPACITY: usize = 10;

/// Callback invoked with every container pushed out of the primary tier.
pub type EvictionHook = Box<dyn Fn(u64, PageContainer) + Send + Sync>;

/// Bounded least-recently-used tier in front of a second tier.
///
/// Evicted containers are passed to the eviction hook, which by default
/// forwards them to the second tier. Lookups fall back to the second tier on
/// a primary miss.
pub struct LruPageCache {
    primary: Mutex<LruCache<u64, PageContainer>>,
    second: Arc<dyn PageCache>,
    on_evict: EvictionHook,
}

impl LruPageCache {
    /// Primary tier of `capacity` entries spilling into `second`.
    pub fn new(capacity: usize, second: Arc<dyn PageCache>) -> Self {
        let sink = Arc::clone(&second);
        Self::with_eviction_hook(
            capacity,
            second,
            Box::new(move |key, container| sink.put(key, container)),
        )
    }

    /// Primary tier with a caller-supplied eviction hook; `second` is still
    /// consulted on lookups and cleared with the cache.
    pub fn with_eviction_hook(
        capacity: usize,
        second: Arc<dyn PageCache>,
        on_evict: EvictionHook,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            primary: Mutex::new(LruCache::new(capacity)),
            second,
            on_evict,
        }
    }

    /// Number of containers in the primary tier.
    pub fn len(&self) -> usize {
        self.primary.lock().len()
    }

    /// True if the primary tier is empty.
    pub fn is_empty(&self) -> bool {
        self.primary.lock().is_empty()
    }

    /// True if `key` is held by the primary tier; does not touch recency.
    pub fn contains_primary(&self, key: u64) -> bool {
        self.primary.lock().contains(&key)
    }
}

impl PageCache for LruPageCache {
    fn get(&self, key: u64) -> Option<PageContainer> {
        if let Some(hit) = self.primary.lock().get(&key).cloned() {
            return Some(hit);
        }
        let hit = self.second.get(key);
        trace!(key, hit = hit.is_some(), "cache.lru.second_tier");
        hit
    }

    fn put(&self, key: u64, container: PageContainer) {
        let evicted = {
            let mut primary = self.primary.lock();
            match primary.push(key, container) {
                Some((old, _)) if old == key => None,
                other => other,
            }
        };
        if let Some((old, container)) = evicted {
            trace!(evicted = old, "cache.lru.evict");
            (self.on_evict)(old, container);
        }
    }

    fn remove(&self, key: u64) -> Option<PageContainer> {
        let primary = self.primary.lock().pop(&key);
        let second = self.second.remove(key);
        primary.or(second)
    }

    fn clear(&self) {
        self.primary.lock().clear();
        self.second.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::{MemoryCache, NullCache};
    use crate::types::BucketNo;

    fn container(n: u64) -> PageContainer {
        PageContainer::fresh(BucketNo(n), 2)
    }

    #[test]
    fn least_recent_entry_moves_to_second_tier() {
        let second = Arc::new(MemoryCache::new());
        let cache = LruPageCache::new(DEFAULT_LOG_CAPACITY, second.clone());
        for key in 0..=DEFAULT_LOG_CAPACITY as u64 {
            cache.put(key, container(key));
        }
        assert_eq!(cache.len(), DEFAULT_LOG_CAPACITY);
        assert!(!cache.contains_primary(0));
        assert_eq!(second.len(), 1);
        assert_eq!(cache.get(0), Some(container(0)));
    }

    #[test]
    fn evicted_entry_is_gone_without_second_tier() {
        let cache = LruPageCache::new(2, Arc::new(NullCache));
        cache.put(1, container(1));
        cache.put(2, container(2));
        cache.get(1);
        cache.put(3, container(3));
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evictions);
        let cache = LruPageCache::with_eviction_hook(
            2,
            Arc::new(NullCache),
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        cache.put(1, container(1));
        cache.put(1, container(1));
        cache.put(2, container(2));
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
        cache.put(3, container(3));
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_empties_both_tiers() {
        let second = Arc::new(MemoryCache::new());
        let cache = LruPageCache::new(1, second.clone());
        cache.put(1, container(1));
        cache.put(2, container(2));
        assert_eq!(second.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(second.is_empty());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn concurrent_readers_and_writer_share_the_cache() {
        let cache = Arc::new(LruPageCache::new(4, Arc::new(MemoryCache::new())));
        std::thread::scope(|scope| {
            let writer = Arc::clone(&cache);
            scope.spawn(move || {
                for key in 0..64 {
                    writer.put(key, container(key));
                }
            });
            for _ in 0..3 {
                let reader = Arc::clone(&cache);
                scope.spawn(move || {
                    for key in 0..64 {
                        let _ = reader.get(key);
                    }
                });
            }
        });
        for key in 0..64 {
            assert!(cache.get(key).is_some());
        }
    }
}
