//! Command-line and environment configuration.
//!
//! Every flag has a `BOOKSHELF_*` environment fallback, so the server can be
//! configured either way.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::graphql::GraphQLSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--{flag} must be greater than zero")]
    Zero { flag: &'static str },

    #[error("unsupported Redis URL {url:?}: expected redis:// or rediss://")]
    RedisScheme { url: String },

    #[error("--session-header must not be empty")]
    EmptySessionHeader,
}

/// Output format of the `tracing` fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// GraphQL book catalogue server with pluggable response caching.
#[derive(Debug, Clone, Parser)]
#[command(name = "bookshelf", version, about)]
pub struct Config {
    /// Interface to listen on.
    #[arg(long, env = "BOOKSHELF_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "BOOKSHELF_PORT", default_value_t = 4000)]
    pub port: u16,

    /// Redis connection string; the in-memory LRU is used when absent.
    #[arg(long, env = "BOOKSHELF_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "BOOKSHELF_REDIS_CONNECT_TIMEOUT_MS", default_value_t = 2000)]
    pub redis_connect_timeout_ms: u64,

    /// Prefix for every key written to Redis.
    #[arg(long, env = "BOOKSHELF_CACHE_NAMESPACE", default_value = "bookshelf:")]
    pub cache_namespace: String,

    #[arg(long, env = "BOOKSHELF_LRU_MAX_ENTRIES", default_value_t = 10_000)]
    pub lru_max_entries: usize,

    /// Byte budget of the in-memory LRU (keys plus values).
    #[arg(long, env = "BOOKSHELF_LRU_MAX_BYTES", default_value_t = 30 * 1024 * 1024)]
    pub lru_max_bytes: usize,

    /// Max age in seconds for fields without an explicit cache hint.
    #[arg(long, env = "BOOKSHELF_DEFAULT_MAX_AGE", default_value_t = 5)]
    pub default_max_age: u32,

    /// Lifetime of persisted query registrations; 0 keeps them until evicted.
    #[arg(long, env = "BOOKSHELF_APQ_TTL_SECS", default_value_t = 300)]
    pub apq_ttl_secs: u64,

    #[arg(long, env = "BOOKSHELF_DISABLE_RESPONSE_CACHE")]
    pub disable_response_cache: bool,

    /// Request header identifying a session for private response caching.
    #[arg(long, env = "BOOKSHELF_SESSION_HEADER", default_value = "session-id")]
    pub session_header: String,

    /// Log every cache store operation at info level.
    #[arg(long, env = "BOOKSHELF_LOG_CACHE_OPERATIONS")]
    pub log_cache_operations: bool,

    #[arg(long, env = "BOOKSHELF_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// JSON file with `[{"title": .., "author": ..}]`; the built-in sample otherwise.
    #[arg(long, env = "BOOKSHELF_BOOKS")]
    pub books: Option<PathBuf>,
}

impl Config {
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lru_max_entries == 0 {
            return Err(ConfigError::Zero {
                flag: "lru-max-entries",
            });
        }
        if self.lru_max_bytes == 0 {
            return Err(ConfigError::Zero {
                flag: "lru-max-bytes",
            });
        }
        if self.redis_connect_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                flag: "redis-connect-timeout-ms",
            });
        }
        if let Some(url) = &self.redis_url {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(ConfigError::RedisScheme { url: url.clone() });
            }
        }
        if self.session_header.trim().is_empty() {
            return Err(ConfigError::EmptySessionHeader);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lru_max_entries(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.lru_max_entries).ok_or(ConfigError::Zero {
            flag: "lru-max-entries",
        })
    }

    pub fn redis_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_connect_timeout_ms)
    }

    pub fn graphql_settings(&self) -> GraphQLSettings {
        GraphQLSettings {
            default_max_age: self.default_max_age,
            apq_ttl: (self.apq_ttl_secs > 0).then(|| Duration::from_secs(self.apq_ttl_secs)),
            response_cache: !self.disable_response_cache,
            session_header: self.session_header.clone(),
        }
    }
}
