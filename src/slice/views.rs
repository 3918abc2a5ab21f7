//! Once-per-session view counting.

use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;

/// Default number of remembered `(session, chapter)` pairs.
pub const DEFAULT_VIEW_DEDUP_CAPACITY: usize = 100_000;

/// Remembers which sessions have already been counted for a chapter.
///
/// Bounded: once full, the oldest pairs are forgotten and could count again.
pub struct ViewDeduper {
    seen: Mutex<LruCache<(String, i64), ()>>,
}

impl ViewDeduper {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns true the first time a session reads a chapter.
    pub async fn first_view(&self, session: &str, chapter_id: i64) -> bool {
        let mut seen = self.seen.lock().await;
        seen.put((session.to_string(), chapter_id), ()).is_none()
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for ViewDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_VIEW_DEDUP_CAPACITY)
    }
}
