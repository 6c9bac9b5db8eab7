//! Key-value cache stores.
//!
//! Everything the GraphQL layer persists (persisted queries, whole responses)
//! goes through the [`KeyValueCache`] trait, so the backing technology can be
//! swapped without touching callers:
//!
//! | Store                 | Backing                         | Expiry                  |
//! |-----------------------|---------------------------------|-------------------------|
//! | [`InMemoryLruCache`]  | process memory, LRU-bounded     | checked lazily on read  |
//! | [`RedisCache`]        | Redis via a `ConnectionManager` | native `PX` expiry      |
//!
//! Two decorators wrap any store and are themselves stores:
//!
//! - [`LoggingCache`] emits one `tracing` record per call.
//! - [`PrefixingCache`] namespaces every key.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use bookshelf::cache::{InMemoryLruCache, KeyValueCache, LoggingCache};
//!
//! # async fn demo() -> Result<(), bookshelf::cache::CacheError> {
//! let store = LoggingCache::new(InMemoryLruCache::with_max_entries(128));
//! store.set("greeting", "hello", Some(Duration::from_secs(30))).await?;
//! assert_eq!(store.get("greeting").await?.as_deref(), Some("hello"));
//! assert!(store.delete("greeting").await?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod logging;
pub mod memory;
pub mod prefix;
pub mod redis;

pub use logging::LoggingCache;
pub use memory::InMemoryLruCache;
pub use prefix::PrefixingCache;
pub use redis::RedisCache;

/// Errors surfaced by a cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached at all; the caller cannot tell whether
    /// the key exists.
    #[error("{store} cache store unavailable: {reason}")]
    StoreUnavailable { store: &'static str, reason: String },

    /// The store was reached but rejected the command.
    #[error("{store} cache store rejected {operation}: {reason}")]
    Backend {
        store: &'static str,
        operation: &'static str,
        reason: String,
    },

    /// The connection string could not be parsed.
    #[error("invalid cache store URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl CacheError {
    /// Returns `true` for transport failures, where serving uncached is the
    /// sensible fallback.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

/// Convenience alias for cache store results.
pub type CacheResult<T> = Result<T, CacheError>;

/// Asynchronous string-keyed store with optional per-entry TTL.
///
/// # Contract
///
/// - `get` of a missing or expired key is `Ok(None)`, never an error.
/// - `set` overwrites. With `Some(ttl)` the entry is unreadable once `ttl`
///   elapses; a zero `ttl` stores nothing and drops any previous value.
/// - `delete` reports whether an entry was removed and is idempotent.
/// - Transport failures are [`CacheError::StoreUnavailable`].
///
/// Overlapping `set`s on one key are last-write-wins; ordering beyond that is
/// whatever the backing store provides.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Looks up `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Removes `key`, returning whether it was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

#[async_trait]
impl<C> KeyValueCache for Arc<C>
where
    C: KeyValueCache + ?Sized,
{
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        (**self).delete(key).await
    }
}
