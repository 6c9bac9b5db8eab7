//! In-process LRU store.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CacheResult, KeyValueCache};

/// Default byte budget: roughly 30 MiB of keys and values.
pub const DEFAULT_MAX_BYTES: usize = 30 * 1024 * 1024;

/// Default entry budget.
pub const DEFAULT_MAX_ENTRIES: NonZeroUsize = NonZeroUsize::new(10_000).unwrap();

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<String, Entry>,
    used_bytes: usize,
    max_bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.used_bytes -= footprint(key, &entry.value);
        Some(entry)
    }

    fn evict_over_budget(&mut self) {
        while self.used_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((key, entry)) => self.used_bytes -= footprint(&key, &entry.value),
                None => break,
            }
        }
    }
}

// Size of an entry as counted against the byte budget.
fn footprint(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// A bounded in-memory store with least-recently-used eviction.
///
/// Two budgets apply at once: a maximum number of entries and a maximum
/// number of bytes (key plus value length). Writing past either evicts the
/// least recently read or written entries. A single entry larger than the
/// byte budget is never stored.
///
/// TTLs are enforced lazily: an expired entry is dropped the next time it is
/// read, and otherwise ages out through normal LRU eviction.
///
/// # Examples
///
/// ```
/// use bookshelf::cache::{InMemoryLruCache, KeyValueCache};
///
/// # async fn demo() {
/// let store = InMemoryLruCache::with_max_entries(2);
/// store.set("a", "1", None).await.unwrap();
/// store.set("b", "2", None).await.unwrap();
/// store.set("c", "3", None).await.unwrap(); // evicts "a"
/// assert_eq!(store.get("a").await.unwrap(), None);
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryLruCache {
    inner: Mutex<Inner>,
}

impl Default for InMemoryLruCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_BYTES)
    }
}

impl InMemoryLruCache {
    /// Creates a store bounded by `max_entries` entries and `max_bytes` bytes.
    pub fn new(max_entries: NonZeroUsize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_entries),
                used_bytes: 0,
                max_bytes,
            }),
        }
    }

    /// Creates a store bounded only by entry count (the byte budget stays at
    /// [`DEFAULT_MAX_BYTES`]). A zero count is treated as one.
    pub fn with_max_entries(max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self::new(max_entries, DEFAULT_MAX_BYTES)
    }

    /// Number of entries currently held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently counted against the byte budget.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }
}

#[async_trait]
impl KeyValueCache for InMemoryLruCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
        };
        if expired {
            inner.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        inner.remove(key);

        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Ok(());
        }

        let size = footprint(key, value);
        if size > inner.max_bytes {
            tracing::debug!(key, size, "entry exceeds cache byte budget; not stored");
            return Ok(());
        }

        let entry = Entry {
            value: value.to_owned(),
            // A TTL past the clock's range never expires.
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        };
        // `push` hands back the entry it displaced when the count budget is full.
        if let Some((evicted_key, evicted)) = inner.entries.push(key.to_owned(), entry) {
            inner.used_bytes -= footprint(&evicted_key, &evicted.value);
        }
        inner.used_bytes += size;
        inner.evict_over_budget();
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.inner.lock().remove(key).is_some())
    }
}
