//! Redis-backed store.

use std::fmt;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, RedisError};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CacheError, CacheResult, KeyValueCache};

/// How long the first connection attempt may take before the store is
/// reported unavailable.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long after a failed connect every call fails fast instead of trying
/// again.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

const STORE: &str = "redis";

/// A store backed by a Redis server (`redis://host:port[/db]`).
///
/// The connection is established lazily on first use and then shared through
/// a multiplexed [`ConnectionManager`], which reconnects on its own after a
/// dropped connection. A failed first connect is reported as
/// [`CacheError::StoreUnavailable`]. For the following retry backoff every
/// call fails the same way without touching the network; the first call after
/// it tries again. A server can therefore start, and serve uncached without
/// stalling, while Redis is down.
///
/// TTLs map to `SET .. PX`, so expiry is authoritative.
pub struct RedisCache {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    retry_backoff: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("addr", &self.client.get_connection_info().addr)
            .field("connected", &self.connection.initialized())
            .field("connect_timeout", &self.connect_timeout)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl RedisCache {
    /// Parses `url` without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidUrl`] if `url` is not a valid Redis
    /// connection string.
    pub fn open(url: &str) -> CacheResult<Self> {
        let client = Client::open(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            last_failure: Mutex::new(None),
        })
    }

    /// Overrides [`DEFAULT_CONNECT_TIMEOUT`].
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides [`DEFAULT_RETRY_BACKOFF`].
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    // Time left before another connect may be attempted.
    fn backoff_remaining(&self) -> Option<Duration> {
        let failed_at = (*self.last_failure.lock())?;
        self.retry_backoff
            .checked_sub(failed_at.elapsed())
            .filter(|left| !left.is_zero())
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                // Checked inside the cell so callers queued behind a failed
                // attempt fail fast too.
                if let Some(left) = self.backoff_remaining() {
                    return Err(CacheError::StoreUnavailable {
                        store: STORE,
                        reason: format!(
                            "backing off for {}ms after a failed connect",
                            left.as_millis()
                        ),
                    });
                }
                let connected = self.connect().await;
                if let Err(e) = &connected {
                    let backoff_ms = u64::try_from(self.retry_backoff.as_millis()).unwrap_or(u64::MAX);
                    warn!(error = %e, backoff_ms, "redis connect failed");
                    *self.last_failure.lock() = Some(Instant::now());
                }
                connected
            })
            .await?;
        Ok(manager.clone())
    }

    async fn connect(&self) -> CacheResult<ConnectionManager> {
        let addr = &self.client.get_connection_info().addr;
        debug!(?addr, "connecting to redis");
        let connect = ConnectionManager::new(self.client.clone());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(manager)) => {
                info!(?addr, "redis connection established");
                Ok(manager)
            }
            Ok(Err(e)) => Err(classify("connect", e)),
            Err(_) => Err(CacheError::StoreUnavailable {
                store: STORE,
                reason: format!(
                    "no connection to {addr:?} within {}ms",
                    self.connect_timeout.as_millis()
                ),
            }),
        }
    }
}

// Transport failures become `StoreUnavailable`; anything the server answered
// with is a `Backend` error.
fn classify(operation: &'static str, err: RedisError) -> CacheError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        CacheError::StoreUnavailable {
            store: STORE,
            reason: err.to_string(),
        }
    } else {
        CacheError::Backend {
            store: STORE,
            operation,
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await.map_err(|e| classify("get", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        match ttl {
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| classify("set", e))?;
            }
            Some(ttl) if ttl.is_zero() => {
                let _: i64 = conn.del(key).await.map_err(|e| classify("set", e))?;
            }
            Some(ttl) => {
                // Sub-millisecond TTLs round up; PX rejects zero.
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                let _: () = ::redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(millis)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| classify("set", e))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await.map_err(|e| classify("delete", e))?;
        Ok(removed > 0)
    }
}
