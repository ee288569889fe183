use crate::models::RetrievedChunk;
use crate::traits::QueryCache;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

struct CacheEntry {
    chunks: Vec<RetrievedChunk>,
    expires_at: Instant,
}

pub struct TtlCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl TtlCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QueryCache for TtlCache {
    async fn get(&self, key: &str) -> Option<Vec<RetrievedChunk>> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.chunks.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!(key, "cache entry expired");
        }
        None
    }

    async fn set(&self, key: &str, value: Vec<RetrievedChunk>, ttl: Duration) {
        self.lock().put(
            key.to_string(),
            CacheEntry {
                chunks: value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }
}
