//! Resolver cache trait and the in-memory TTL+LRU implementation.
//!
//! The trait keeps the resolver independent of the storage backend so tests
//! and the persistent log can stand in for the in-memory store.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::dns::{QType, ResolveResult};

/// Default upper bound on how long an answer stays cached.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(300);

/// Default number of cached answers.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Trait for resolved-answer caching.
///
/// Operations are synchronous: every mutation completes without suspending,
/// so concurrent resolver tasks only ever observe whole entries.
pub trait ResolverCache: Send + Sync + 'static {
    /// Get a live cached answer, refreshing its recency.
    fn get(&self, qname: &str, qtype: QType) -> Option<ResolveResult>;

    /// Store an answer for at most `ttl_secs` seconds.
    fn put(&self, qname: &str, qtype: QType, result: ResolveResult, ttl_secs: u32);

    /// Drop every entry.
    fn clear(&self);

    /// Number of stored entries, expired ones included until touched.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CacheEntry {
    result: ResolveResult,
    expires_at: Instant,
}

type CacheKey = (String, QType);

/// Bounded in-memory cache with per-entry expiry and LRU eviction.
///
/// Cloning is cheap and clones share the same store.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<LruCache<CacheKey, CacheEntry>>>,
    max_ttl: Duration,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` answers, each for at most `max_ttl`.
    pub fn new(max_entries: NonZeroUsize, max_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(max_entries))),
            max_ttl,
        }
    }

    /// Create a cache from plain settings, falling back to the default size for 0.
    pub fn with_capacity(max_entries: usize, max_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries)
            .or(NonZeroUsize::new(DEFAULT_MAX_ENTRIES))
            .unwrap_or(NonZeroUsize::MIN);
        Self::new(capacity, max_ttl)
    }

    pub const fn max_ttl(&self) -> Duration {
        self.max_ttl
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TTL)
    }
}

impl ResolverCache for MemoryCache {
    fn get(&self, qname: &str, qtype: QType) -> Option<ResolveResult> {
        let key = (qname.to_string(), qtype);
        let mut inner = self.inner.lock();
        match inner.get(&key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                return Some(entry.result.clone());
            }
            Some(_) => {}
            None => return None,
        }
        inner.pop(&key);
        tracing::trace!(qname, %qtype, "expired cache entry removed");
        None
    }

    fn put(&self, qname: &str, qtype: QType, result: ResolveResult, ttl_secs: u32) {
        let ttl = self.max_ttl.min(Duration::from_secs(u64::from(ttl_secs)));
        let entry = CacheEntry {
            result,
            expires_at: Instant::now() + ttl,
        };
        let key = (qname.to_string(), qtype);
        let evicted = self.inner.lock().push(key.clone(), entry);
        if let Some((old_key, _)) = evicted
            && old_key != key
        {
            tracing::debug!(qname = %old_key.0, qtype = %old_key.1, "evicted least recently used entry");
        }
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dns::DnsStatus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock cache for testing.
    #[derive(Clone, Default)]
    pub struct MockCache {
        pub entries: Arc<Mutex<HashMap<CacheKey, ResolveResult>>>,
        pub get_count: Arc<AtomicU64>,
        pub put_count: Arc<AtomicU64>,
    }

    impl MockCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_call_count(&self) -> u64 {
            self.get_count.load(Ordering::SeqCst)
        }

        pub fn put_call_count(&self) -> u64 {
            self.put_count.load(Ordering::SeqCst)
        }
    }

    impl ResolverCache for MockCache {
        fn get(&self, qname: &str, qtype: QType) -> Option<ResolveResult> {
            self.get_count.fetch_add(1, Ordering::SeqCst);
            self.entries
                .lock()
                .get(&(qname.to_string(), qtype))
                .cloned()
        }

        fn put(&self, qname: &str, qtype: QType, result: ResolveResult, _ttl_secs: u32) {
            self.put_count.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().insert((qname.to_string(), qtype), result);
        }

        fn clear(&self) {
            self.entries.lock().clear();
        }

        fn len(&self) -> usize {
            self.entries.lock().len()
        }
    }

    pub fn answer(qname: &str) -> ResolveResult {
        ResolveResult::empty(qname, QType::A, DnsStatus::NoError, 0)
    }

    fn cache(max_entries: usize, max_ttl: Duration) -> MemoryCache {
        MemoryCache::with_capacity(max_entries, max_ttl)
    }

    #[tokio::test(start_paused = true)]
    async fn should_return_entry_before_expiry_and_drop_it_after() {
        let cache = cache(10, Duration::from_secs(300));
        cache.put("ttl.example.", QType::A, answer("ttl.example."), 60);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("ttl.example.", QType::A).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("ttl.example.", QType::A).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_cap_ttl_at_configured_maximum() {
        let cache = cache(10, Duration::from_millis(10));
        cache.put("short.example.", QType::A, answer("short.example."), 3600);

        assert!(cache.get("short.example.", QType::A).is_some());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(cache.get("short.example.", QType::A).is_none());
    }

    #[test]
    fn should_evict_least_recently_inserted_key() {
        let cache = cache(2, Duration::from_secs(60));
        cache.put("a.example.", QType::A, answer("a.example."), 60);
        cache.put("b.example.", QType::A, answer("b.example."), 60);
        cache.put("c.example.", QType::A, answer("c.example."), 60);

        assert!(cache.get("a.example.", QType::A).is_none());
        assert!(cache.get("b.example.", QType::A).is_some());
        assert!(cache.get("c.example.", QType::A).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn should_protect_recently_read_key_from_eviction() {
        let cache = cache(2, Duration::from_secs(60));
        cache.put("a.example.", QType::A, answer("a.example."), 60);
        cache.put("b.example.", QType::A, answer("b.example."), 60);

        assert!(cache.get("a.example.", QType::A).is_some());
        cache.put("c.example.", QType::A, answer("c.example."), 60);

        assert!(cache.get("a.example.", QType::A).is_some());
        assert!(cache.get("b.example.", QType::A).is_none());
        assert!(cache.get("c.example.", QType::A).is_some());
    }

    #[test]
    fn should_key_entries_by_name_and_type() {
        let cache = cache(10, Duration::from_secs(60));
        cache.put("example.com.", QType::A, answer("example.com."), 60);

        assert!(cache.get("example.com.", QType::A).is_some());
        assert!(cache.get("example.com.", QType::Aaaa).is_none());
    }

    #[test]
    fn should_replace_existing_key_without_growing() {
        let cache = cache(2, Duration::from_secs(60));
        cache.put("a.example.", QType::A, answer("a.example."), 60);
        cache.put("a.example.", QType::A, answer("a.example."), 120);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn should_clear_all_entries() {
        let cache = cache(10, Duration::from_secs(60));
        cache.put("a.example.", QType::A, answer("a.example."), 60);
        cache.put("b.example.", QType::A, answer("b.example."), 60);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn should_share_store_between_clones() {
        let cache = cache(10, Duration::from_secs(60));
        let other = cache.clone();
        cache.put("a.example.", QType::A, answer("a.example."), 60);
        assert!(other.get("a.example.", QType::A).is_some());
    }

    #[test]
    fn should_track_mock_call_counts() {
        let cache = MockCache::new();
        assert!(cache.get("a.example.", QType::A).is_none());
        cache.put("a.example.", QType::A, answer("a.example."), 60);
        assert!(cache.get("a.example.", QType::A).is_some());
        assert_eq!(cache.get_call_count(), 2);
        assert_eq!(cache.put_call_count(), 1);
    }
}
