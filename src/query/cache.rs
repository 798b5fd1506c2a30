use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::core::stats::CacheStats;
use crate::core::types::IndexName;
use crate::search::results::SearchResponse;

/// Cache key: index, normalised query, options fingerprint.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct QueryKey {
    pub index: IndexName,
    pub query: String,
    pub options_hash: u64,
}

struct CacheEntry {
    response: SearchResponse,
    generation: u64,
    stored_at: Instant,
}

/// TTL'd LRU over search responses.
///
/// Coherence is generation-based: every write to an index bumps its
/// generation, so entries cached under an older generation stop matching
/// before the next search returns.
pub struct QueryCache {
    cache: Mutex<LruCache<QueryKey, CacheEntry>>,
    generations: Mutex<HashMap<IndexName, u64>>,
    ttl: Duration,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
    capacity: usize,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        QueryCache {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("non-zero capacity"),
            )),
            generations: Mutex::new(HashMap::new()),
            ttl,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
            capacity,
        }
    }

    fn generation(&self, index: &IndexName) -> u64 {
        *self.generations.lock().get(index).unwrap_or(&0)
    }

    pub fn get(&self, key: &QueryKey) -> Option<SearchResponse> {
        let generation = self.generation(&key.index);
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(key) {
            if entry.generation == generation && entry.stored_at.elapsed() < self.ttl {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
            cache.pop(key);
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: QueryKey, response: SearchResponse) {
        let generation = self.generation(&key.index);
        self.cache.lock().put(
            key,
            CacheEntry {
                response,
                generation,
                stored_at: Instant::now(),
            },
        );
    }

    /// Invalidate everything cached for one index.
    pub fn invalidate_index(&self, index: &IndexName) {
        *self.generations.lock().entry(index.clone()).or_insert(0) += 1;
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(index: &str, query: &str) -> QueryKey {
        QueryKey {
            index: IndexName::from(index),
            query: query.to_string(),
            options_hash: 0,
        }
    }

    fn response(total: u64) -> SearchResponse {
        SearchResponse {
            total,
            ..Default::default()
        }
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = QueryCache::new(8, Duration::from_secs(60));
        assert!(cache.get(&key("a", "q")).is_none());
        cache.put(key("a", "q"), response(3));
        assert_eq!(cache.get(&key("a", "q")).unwrap().total, 3);
        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn test_write_invalidates_index_entries() {
        let cache = QueryCache::new(8, Duration::from_secs(60));
        cache.put(key("a", "q"), response(1));
        cache.put(key("b", "q"), response(2));
        cache.invalidate_index(&IndexName::from("a"));
        assert!(cache.get(&key("a", "q")).is_none());
        // Other indexes keep their entries.
        assert_eq!(cache.get(&key("b", "q")).unwrap().total, 2);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = QueryCache::new(8, Duration::from_millis(0));
        cache.put(key("a", "q"), response(1));
        assert!(cache.get(&key("a", "q")).is_none());
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.put(key("a", "1"), response(1));
        cache.put(key("a", "2"), response(2));
        cache.put(key("a", "3"), response(3));
        assert!(cache.stats().size <= 2);
        assert!(cache.get(&key("a", "1")).is_none());
    }
}
