//! Cache of decrypted slice bytes.
//!
//! Keyed by slice id. Slice ids are never reused: a re-upload inserts new
//! rows, so stale entries can only linger until evicted. Chapter replacement
//! and deletion still drop them eagerly with [`SliceCache::invalidate`].
//!
//! Eviction is by total byte size, least recently used first.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;

/// Default cache capacity: 64MB
pub const DEFAULT_SLICE_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Upper bound on entries, to bound LRU bookkeeping
const MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(8_192) {
    Some(n) => n,
    None => unreachable!(),
};

struct CacheState {
    entries: LruCache<i64, Bytes>,
    size: usize,
}

/// Size-bounded LRU of slice bytes, shareable across tasks.
pub struct SliceCache {
    state: RwLock<CacheState>,
    max_size: usize,
}

impl SliceCache {
    /// Create a cache holding at most `max_size` bytes. Zero disables caching.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::new(MAX_ENTRIES),
                size: 0,
            }),
            max_size,
        }
    }

    /// Get a slice, marking it recently used.
    pub async fn get(&self, slice_id: i64) -> Option<Bytes> {
        let mut state = self.state.write().await;
        state.entries.get(&slice_id).cloned()
    }

    /// Store a slice, evicting older entries past capacity.
    ///
    /// Slices larger than the whole cache are not stored.
    pub async fn put(&self, slice_id: i64, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }

        let mut state = self.state.write().await;
        let added = data.len();
        if let Some(old) = state.entries.put(slice_id, data) {
            state.size = state.size.saturating_sub(old.len());
        }
        state.size += added;

        while state.size > self.max_size {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.size = state.size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    /// Drop the given slices; returns how many were cached.
    pub async fn invalidate(&self, slice_ids: &[i64]) -> usize {
        let mut state = self.state.write().await;
        let mut removed = 0;
        for id in slice_ids {
            if let Some(data) = state.entries.pop(id) {
                state.size = state.size.saturating_sub(data.len());
                removed += 1;
            }
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Bytes currently cached.
    pub async fn size(&self) -> usize {
        self.state.read().await.size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for SliceCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SLICE_CACHE_CAPACITY)
    }
}
