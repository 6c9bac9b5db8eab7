//! Logging decorator for cache stores.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{CacheResult, KeyValueCache};

/// Wraps a store and records every call as a `tracing` event.
///
/// Each `get`, `set` or `delete` produces exactly one event carrying
/// `operation`, `key` and `result` fields once the inner store has answered:
///
/// | operation | `result` on success     | on error                         |
/// |-----------|-------------------------|----------------------------------|
/// | `get`     | `hit` / `miss`          | `error`, plus an `error` field   |
/// | `set`     | `stored`                | `error`, plus an `error` field   |
/// | `delete`  | `deleted` / `absent`    | `error`, plus an `error` field   |
///
/// Values and errors pass through untouched. If the caller drops the future
/// before the inner store answers, nothing is logged.
#[derive(Debug, Clone)]
pub struct LoggingCache<C> {
    inner: C,
}

impl<C> LoggingCache<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: KeyValueCache> KeyValueCache for LoggingCache<C> {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let outcome = self.inner.get(key).await;
        match &outcome {
            Ok(Some(value)) => info!(operation = "get", key, result = "hit", bytes = value.len()),
            Ok(None) => info!(operation = "get", key, result = "miss"),
            Err(e) => warn!(operation = "get", key, result = "error", error = %e),
        }
        outcome
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let outcome = self.inner.set(key, value, ttl).await;
        let ttl_ms = ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        match &outcome {
            Ok(()) => info!(operation = "set", key, result = "stored", bytes = value.len(), ttl_ms),
            Err(e) => warn!(operation = "set", key, result = "error", error = %e),
        }
        outcome
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let outcome = self.inner.delete(key).await;
        match &outcome {
            Ok(true) => info!(operation = "delete", key, result = "deleted"),
            Ok(false) => info!(operation = "delete", key, result = "absent"),
            Err(e) => warn!(operation = "delete", key, result = "error", error = %e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fmt;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;
    use crate::cache::InMemoryLruCache;
    use crate::cache::testing::UnreachableStore;

    type Record = HashMap<String, String>;

    // Every call hangs until its future is dropped.
    struct StalledStore;

    #[async_trait]
    impl KeyValueCache for StalledStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            std::future::pending().await
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Record>>>);

    impl Recorder {
        fn cache_records(&self) -> Vec<Record> {
            self.0
                .lock()
                .iter()
                .filter(|r| r.contains_key("operation"))
                .cloned()
                .collect()
        }
    }

    struct FieldVisitor<'a>(&'a mut Record);

    impl Visit for FieldVisitor<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_owned(), value.to_owned());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_owned(), format!("{value:?}"));
        }
    }

    impl<S: Subscriber> Layer<S> for Recorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut record = Record::new();
            event.record(&mut FieldVisitor(&mut record));
            self.0.lock().push(record);
        }
    }

    fn field<'r>(record: &'r Record, name: &str) -> &'r str {
        record.get(name).map(String::as_str).unwrap_or_default()
    }

    #[tokio::test]
    async fn set_get_delete_emit_three_records() {
        let recorder = Recorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = LoggingCache::new(InMemoryLruCache::default());
        cache.set("a", "b", None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("b"));
        assert!(cache.delete("a").await.unwrap());

        let records = recorder.cache_records();
        assert_eq!(records.len(), 3);

        let summary: Vec<_> = records
            .iter()
            .map(|r| (field(r, "operation"), field(r, "key"), field(r, "result")))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("set", "a", "stored"),
                ("get", "a", "hit"),
                ("delete", "a", "deleted"),
            ]
        );
    }

    #[tokio::test]
    async fn misses_and_absent_deletes_are_recorded() {
        let recorder = Recorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = LoggingCache::new(InMemoryLruCache::default());
        assert_eq!(cache.get("ghost").await.unwrap(), None);
        assert!(!cache.delete("ghost").await.unwrap());

        let results: Vec<_> = recorder
            .cache_records()
            .iter()
            .map(|r| field(r, "result").to_owned())
            .collect();
        assert_eq!(results, vec!["miss", "absent"]);
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let recorder = Recorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = LoggingCache::new(UnreachableStore);
        let err = cache.get("k").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(cache.set("k", "v", None).await.unwrap_err().is_unavailable());
        assert!(cache.delete("k").await.unwrap_err().is_unavailable());

        let records = recorder.cache_records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| field(r, "result") == "error"));
        assert!(field(&records[0], "error").contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_calls_emit_nothing() {
        let recorder = Recorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = LoggingCache::new(StalledStore);
        let wait = Duration::from_millis(50);
        assert!(tokio::time::timeout(wait, cache.get("k")).await.is_err());
        assert!(tokio::time::timeout(wait, cache.set("k", "v", None)).await.is_err());
        assert!(tokio::time::timeout(wait, cache.delete("k")).await.is_err());

        assert!(recorder.cache_records().is_empty());
    }

    #[tokio::test]
    async fn ttl_is_recorded_in_milliseconds() {
        let recorder = Recorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = LoggingCache::new(InMemoryLruCache::default());
        cache
            .set("a", "b", Some(Duration::from_millis(1500)))
            .await
            .unwrap();
        cache.set("c", "d", Some(Duration::MAX)).await.unwrap();

        let records = recorder.cache_records();
        assert_eq!(field(&records[0], "ttl_ms"), "1500");
        assert_eq!(field(&records[1], "ttl_ms"), u64::MAX.to_string());
    }
}
