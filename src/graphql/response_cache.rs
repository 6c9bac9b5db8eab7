//! Whole-response cache on top of a [`KeyValueCache`].
//!
//! Responses are keyed by a fingerprint of the operation: the SHA-256 of the
//! whitespace-normalised query (string literals kept verbatim), the variables with object keys sorted, and
//! the operation name. Public responses live under `fqc:<fingerprint>`.
//! Private responses are only stored when the request carries a session id,
//! under `fqc:<fingerprint>:session:<sha256(session)>`.
//!
//! The cache never fails a request: store errors are logged and the request
//! is served as a miss.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use super::cache_control::{CachePolicy, CacheScope};
use crate::cache::{CacheError, KeyValueCache};

/// Key prefix for cached responses.
pub const KEY_PREFIX: &str = "fqc:";

/// Stable identity of an operation, independent of formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(query: &str, variables: Option<&Value>, operation_name: Option<&str>) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(normalize(query).as_bytes());
        hasher.update([0]);

        if let Some(variables) = variables.filter(|v| !v.is_null()) {
            hasher.update(sorted(variables).to_string().as_bytes());
        }
        hasher.update([0]);

        if let Some(name) = operation_name {
            hasher.update(name.as_bytes());
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn public_key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.0)
    }

    fn session_key(&self, session: &str) -> String {
        let session = hex::encode(Sha256::digest(session.as_bytes()));
        format!("{KEY_PREFIX}{}:session:{session}", self.0)
    }
}

// Collapses each run of whitespace to one space and trims the ends. String
// literals are copied untouched.
fn normalize(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;
    let mut pending_space = false;
    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            pending_space = true;
            rest = &rest[c.len_utf8()..];
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        let len = if c == '"' { string_len(rest) } else { c.len_utf8() };
        out.push_str(&rest[..len]);
        rest = &rest[len..];
    }
    out
}

// Byte length of the string literal opening `src`, or all of `src` when it is
// unterminated.
fn string_len(src: &str) -> usize {
    if let Some(body) = src.strip_prefix("\"\"\"") {
        let mut i = 0;
        while i < body.len() {
            let tail = &body[i..];
            if tail.starts_with("\\\"\"\"") {
                i += 4;
            } else if tail.starts_with("\"\"\"") {
                return 3 + i + 3;
            } else {
                i += tail.chars().next().map_or(1, char::len_utf8);
            }
        }
        return src.len();
    }

    let mut escaped = false;
    for (i, c) in src.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return i + 1,
            _ => {}
        }
    }
    src.len()
}

// Rebuilds `value` with object keys in sorted order, recursively.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// What is persisted per response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse {
    body: String,
    cache_policy: CachePolicy,
    /// Milliseconds since the Unix epoch.
    cache_time: i64,
}

/// A response served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    /// The serialized GraphQL response.
    pub body: String,
    pub policy: CachePolicy,
    /// Whole seconds since the response was stored.
    pub age: u64,
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueCache>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueCache>) -> Self {
        Self { store }
    }

    /// Finds a fresh cached response. With a session id the private entry is
    /// preferred over the public one.
    pub async fn lookup(&self, fingerprint: &Fingerprint, session: Option<&str>) -> Option<CacheHit> {
        if let Some(session) = session {
            if let Some(hit) = self.read(&fingerprint.session_key(session)).await {
                return Some(hit);
            }
        }
        self.read(&fingerprint.public_key()).await
    }

    /// Stores `body` if `policy` allows it. Private responses need a session.
    pub async fn store(
        &self,
        fingerprint: &Fingerprint,
        session: Option<&str>,
        body: &str,
        policy: CachePolicy,
    ) {
        if !policy.is_cacheable() {
            return;
        }
        let key = match (policy.scope, session) {
            (CacheScope::Public, _) => fingerprint.public_key(),
            (CacheScope::Private, Some(session)) => fingerprint.session_key(session),
            (CacheScope::Private, None) => {
                debug!(fingerprint = fingerprint.as_str(), "private response without session; not cached");
                return;
            }
        };

        let entry = CachedResponse {
            body: body.to_owned(),
            cache_policy: policy,
            cache_time: Utc::now().timestamp_millis(),
        };
        let serialized = match serde_json::to_string(&entry) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!(error = %e, "failed to serialize cached response");
                return;
            }
        };

        if let Err(e) = self.store.set(&key, &serialized, Some(policy.ttl())).await {
            report("set", &key, &e);
        }
    }

    async fn read(&self, key: &str) -> Option<CacheHit> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                report("get", key, &e);
                return None;
            }
        };

        let entry: CachedResponse = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cached response");
                return None;
            }
        };

        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(entry.cache_time).max(0);
        let age = u64::try_from(elapsed_ms / 1000).unwrap_or_default();
        // Stores with lazy expiry may hand back an entry past its max-age.
        if age >= u64::from(entry.cache_policy.max_age) {
            return None;
        }

        Some(CacheHit {
            body: entry.body,
            policy: entry.cache_policy,
            age,
        })
    }
}

fn report(operation: &'static str, key: &str, e: &CacheError) {
    if e.is_unavailable() {
        warn!(operation, key, error = %e, "response cache unavailable; serving uncached");
    } else {
        error!(operation, key, error = %e, "response cache error; serving uncached");
    }
}
