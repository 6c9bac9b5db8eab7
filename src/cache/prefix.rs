//! Key-namespacing decorator.

use std::time::Duration;

use async_trait::async_trait;

use super::{CacheResult, KeyValueCache};

/// Prepends a fixed prefix to every key before it reaches the wrapped store.
///
/// Lets several applications (or several logical caches within one) share a
/// single Redis database without colliding.
#[derive(Debug, Clone)]
pub struct PrefixingCache<C> {
    inner: C,
    prefix: String,
}

impl<C> PrefixingCache<C> {
    pub fn new(inner: C, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl<C: KeyValueCache> KeyValueCache for PrefixingCache<C> {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.get(&self.scoped(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.inner.set(&self.scoped(key), value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.inner.delete(&self.scoped(key)).await
    }
}
