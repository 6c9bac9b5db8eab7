//! Automatic persisted queries.
//!
//! A client may send `extensions.persistedQuery.sha256Hash` in place of the
//! query text. The first time it sends both, the text is registered in the
//! key-value store under `apq:<hash>`; later requests can send the hash alone.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::KeyValueCache;

/// Key prefix for registered queries.
pub const KEY_PREFIX: &str = "apq:";

/// The only protocol version clients may use.
pub const SUPPORTED_VERSION: u32 = 1;

/// The `persistedQuery` request extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuery {
    pub version: u32,
    pub sha256_hash: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PersistedQueryError {
    #[error("Unsupported persisted query version {0}")]
    UnsupportedVersion(u32),

    #[error("provided sha does not match query")]
    HashMismatch,

    #[error("PersistedQueryNotFound")]
    NotFound,
}

impl PersistedQueryError {
    /// Value of `extensions.code` in the GraphQL error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedVersion(_) => "PERSISTED_QUERY_NOT_SUPPORTED",
            Self::HashMismatch => "BAD_REQUEST",
            Self::NotFound => "PERSISTED_QUERY_NOT_FOUND",
        }
    }

    /// Whether the request itself was malformed (as opposed to a normal
    /// cache miss the client is expected to recover from).
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Lower-case hex SHA-256 of `query`.
pub fn sha256_hex(query: &str) -> String {
    hex::encode(Sha256::digest(query.as_bytes()))
}

/// Registers and looks up persisted query text in a key-value store.
#[derive(Clone)]
pub struct PersistedQueries {
    store: Arc<dyn KeyValueCache>,
    ttl: Option<Duration>,
}

impl PersistedQueries {
    /// `ttl` of `None` keeps registrations until the store evicts them.
    pub fn new(store: Arc<dyn KeyValueCache>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Returns the query text to execute.
    ///
    /// With `query` present the hash is verified and the text registered;
    /// otherwise the text is looked up by hash. Store failures are logged and
    /// treated as a miss, so a down store never fails a full-text request.
    ///
    /// # Errors
    ///
    /// See [`PersistedQueryError`].
    pub async fn resolve(
        &self,
        query: Option<String>,
        extension: &PersistedQuery,
    ) -> Result<String, PersistedQueryError> {
        if extension.version != SUPPORTED_VERSION {
            return Err(PersistedQueryError::UnsupportedVersion(extension.version));
        }

        let hash = extension.sha256_hash.to_ascii_lowercase();
        let key = format!("{KEY_PREFIX}{hash}");

        match query {
            Some(query) => {
                if sha256_hex(&query) != hash {
                    return Err(PersistedQueryError::HashMismatch);
                }
                if let Err(e) = self.store.set(&key, &query, self.ttl).await {
                    warn!(error = %e, hash = %hash, "failed to register persisted query");
                } else {
                    debug!(hash = %hash, "registered persisted query");
                }
                Ok(query)
            }
            None => match self.store.get(&key).await {
                Ok(Some(query)) => Ok(query),
                Ok(None) => Err(PersistedQueryError::NotFound),
                Err(e) => {
                    warn!(error = %e, hash = %hash, "persisted query lookup failed; treating as miss");
                    Err(PersistedQueryError::NotFound)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryLruCache;
    use crate::cache::testing::UnreachableStore;

    const QUERY: &str = "{ books { title } }";

    fn extension(hash: &str) -> PersistedQuery {
        PersistedQuery {
            version: 1,
            sha256_hash: hash.to_owned(),
        }
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn extension_uses_camel_case() {
        let ext: PersistedQuery =
            serde_json::from_str(r#"{"version":1,"sha256Hash":"abc"}"#).unwrap();
        assert_eq!(ext, extension("abc"));
    }

    #[tokio::test]
    async fn hash_only_request_misses_until_registered() {
        let store = Arc::new(InMemoryLruCache::default());
        let apq = PersistedQueries::new(store.clone(), None);
        let ext = extension(&sha256_hex(QUERY));

        assert_eq!(
            apq.resolve(None, &ext).await,
            Err(PersistedQueryError::NotFound)
        );
        assert_eq!(apq.resolve(Some(QUERY.into()), &ext).await.unwrap(), QUERY);
        assert_eq!(apq.resolve(None, &ext).await.unwrap(), QUERY);

        let key = format!("{KEY_PREFIX}{}", sha256_hex(QUERY));
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(QUERY));
    }

    #[tokio::test]
    async fn mismatched_hash_is_rejected_and_not_stored() {
        let store = Arc::new(InMemoryLruCache::default());
        let apq = PersistedQueries::new(store.clone(), None);
        let err = apq
            .resolve(Some(QUERY.into()), &extension("deadbeef"))
            .await
            .unwrap_err();
        assert_eq!(err, PersistedQueryError::HashMismatch);
        assert!(err.is_bad_request());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unsupported_version_is_rejected() {
        let apq = PersistedQueries::new(Arc::new(InMemoryLruCache::default()), None);
        let ext = PersistedQuery {
            version: 2,
            sha256_hash: sha256_hex(QUERY),
        };
        let err = apq.resolve(Some(QUERY.into()), &ext).await.unwrap_err();
        assert_eq!(err.code(), "PERSISTED_QUERY_NOT_SUPPORTED");
    }

    #[tokio::test]
    async fn unavailable_store_degrades() {
        let apq = PersistedQueries::new(Arc::new(UnreachableStore), None);
        let ext = extension(&sha256_hex(QUERY));

        // Full text still executes; hash-only reads as a miss.
        assert_eq!(apq.resolve(Some(QUERY.into()), &ext).await.unwrap(), QUERY);
        assert_eq!(
            apq.resolve(None, &ext).await.unwrap_err().code(),
            "PERSISTED_QUERY_NOT_FOUND"
        );
    }
}
