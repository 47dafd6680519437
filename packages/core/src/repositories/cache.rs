//! Entity Cache
//!
//! Repositories keep recently read entities behind the [`EntityCache`] seam.
//! Entities embed their structural columns, so any mutation that moves a row
//! must evict it; repositories evict exactly the ids listed in
//! `MutationOutcome::affected` instead of flushing everything.
//!
//! # Cache Invalidation
//!
//! [`InMemoryEntityCache`] uses a hybrid strategy:
//! - **Time-based**: Entries are considered stale after the TTL (60 seconds by default)
//! - **Event-driven**: Repositories evict affected ids after every mutation
//!
//! Every eviction bumps a generation counter. Readers capture it before
//! querying the store and hand it back to `put`, so a row read before an
//! eviction can never be cached after it.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Storage-agnostic cache of entities keyed by node id
#[async_trait]
pub trait EntityCache<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Option<E>;

    /// Current invalidation generation
    fn generation(&self) -> u64;

    /// Store `entity` unless an eviction happened after `generation` was read
    async fn put(&self, id: &str, entity: E, generation: u64);

    /// Evict the given ids; unknown ids are ignored
    async fn invalidate(&self, ids: &[String]);

    async fn clear(&self);
}

/// Process-local cache with a fixed TTL
pub struct InMemoryEntityCache<E> {
    entries: Arc<RwLock<HashMap<String, (E, Instant)>>>,
    ttl: Duration,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<E> InMemoryEntityCache<E> {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(60))
    }

    /// Create a cache with custom TTL (primarily for testing)
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get cache statistics (for debugging/monitoring)
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<E> Default for InMemoryEntityCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EntityCache<E> for InMemoryEntityCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Option<E> {
        {
            let entries = self.entries.read().await;
            if let Some((entity, stored_at)) = entries.get(id) {
                if stored_at.elapsed() <= self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entity.clone());
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        // Expired: drop it so the next read goes to the store
        self.entries.write().await.remove(id);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn put(&self, id: &str, entity: E, generation: u64) {
        let mut entries = self.entries.write().await;
        // Checked under the write lock; invalidate bumps while holding it too
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::trace!("Dropped stale cache fill for '{}'", id);
            return;
        }

        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() <= ttl);
        let swept = before - entries.len();
        if swept > 0 {
            self.evictions.fetch_add(swept as u64, Ordering::Relaxed);
        }

        entries.insert(id.to_string(), (entity, Instant::now()));
    }

    async fn invalidate(&self, ids: &[String]) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let evicted = ids.iter().filter(|id| entries.remove(*id).is_some()).count();
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    async fn clear(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.evictions
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        entries.clear();
    }
}

/// Statistics about an entity cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_and_stats() {
        let cache: InMemoryEntityCache<String> = InMemoryEntityCache::new();
        assert!(cache.get("a").await.is_none());

        cache.put("a", "alpha".to_string(), cache.generation()).await;
        assert_eq!(cache.get("a").await.as_deref(), Some("alpha"));

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_invalidate_only_listed_ids() {
        let cache: InMemoryEntityCache<u32> = InMemoryEntityCache::new();
        cache.put("a", 1, cache.generation()).await;
        cache.put("b", 2, cache.generation()).await;
        cache.put("c", 3, cache.generation()).await;

        cache
            .invalidate(&["a".to_string(), "c".to_string(), "zzz".to_string()])
            .await;

        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.get("b").await, Some(2));
        assert!(cache.get("c").await.is_none());
        assert_eq!(cache.stats().await.evictions, 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache: InMemoryEntityCache<u32> = InMemoryEntityCache::with_ttl(Duration::from_millis(5));
        cache.put("a", 1, cache.generation()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache: InMemoryEntityCache<u32> = InMemoryEntityCache::default();
        cache.put("a", 1, cache.generation()).await;
        cache.put("b", 2, cache.generation()).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_put_sweeps_expired_entries() {
        let cache: InMemoryEntityCache<u32> = InMemoryEntityCache::with_ttl(Duration::from_millis(5));
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            cache.put(id, i as u32, cache.generation()).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Never read again, yet gone once another entry lands
        cache.put("d", 4, cache.generation()).await;
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.evictions, 3);
    }

    #[tokio::test]
    async fn test_fill_after_invalidate_is_rejected() {
        let cache: InMemoryEntityCache<u32> = InMemoryEntityCache::new();
        cache.put("a", 1, cache.generation()).await;

        // A reader captures the generation, then a writer evicts before the fill
        let observed = cache.generation();
        cache.invalidate(&["a".to_string()]).await;
        cache.put("a", 1, observed).await;
        assert!(cache.get("a").await.is_none());

        let observed = cache.generation();
        cache.clear().await;
        cache.put("a", 1, observed).await;
        assert!(cache.get("a").await.is_none());

        cache.put("a", 2, cache.generation()).await;
        assert_eq!(cache.get("a").await, Some(2));
    }
}
