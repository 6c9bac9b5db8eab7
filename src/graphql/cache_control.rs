//! Per-field cache hints and the response-level policy they fold into.
//!
//! Resolvers call [`set_cache_hint`] while a response is being built. The
//! hints are folded into a request-scoped [`CacheControl`]: the shortest
//! `max_age` wins and any private hint makes the whole response private. Once
//! execution finishes, [`CacheControl::policy`] yields the [`CachePolicy`] used
//! for the `Cache-Control` header and the response cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Who may reuse a cached response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheScope {
    /// Shared caches may store and reuse the response.
    #[default]
    Public,
    /// Only caches scoped to a single user may reuse the response.
    Private,
}

impl CacheScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// A resolver's statement about how long, and for whom, its value may be
/// cached. Unset fields defer to the server defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheHint {
    pub max_age: Option<u32>,
    pub scope: Option<CacheScope>,
}

impl CacheHint {
    pub fn new(max_age: u32, scope: CacheScope) -> Self {
        Self {
            max_age: Some(max_age),
            scope: Some(scope),
        }
    }

    pub fn max_age(max_age: u32) -> Self {
        Self {
            max_age: Some(max_age),
            scope: None,
        }
    }
}

/// The resolved caching policy for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    pub max_age: u32,
    pub scope: CacheScope,
}

impl CachePolicy {
    /// A policy with `max_age == 0` forbids caching.
    pub fn is_cacheable(&self) -> bool {
        self.max_age > 0
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_age))
    }

    /// Value of the `Cache-Control` response header.
    pub fn header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cacheable() {
            write!(f, "max-age={}, {}", self.max_age, self.scope.as_str())
        } else {
            f.write_str("no-store")
        }
    }
}

#[derive(Debug, Default)]
struct Folded {
    max_age: Option<u32>,
    scope: CacheScope,
}

/// Request-scoped accumulator of cache hints.
///
/// Shared with resolvers through the GraphQL request data as
/// `Arc<CacheControl>`.
#[derive(Debug)]
pub struct CacheControl {
    default_max_age: u32,
    folded: Mutex<Folded>,
}

impl CacheControl {
    /// `default_max_age` applies to hints that leave `max_age` unset.
    pub fn new(default_max_age: u32) -> Self {
        Self {
            default_max_age,
            folded: Mutex::new(Folded::default()),
        }
    }

    /// Narrows the response policy by `hint`.
    pub fn restrict(&self, hint: CacheHint) {
        let max_age = hint.max_age.unwrap_or(self.default_max_age);
        let mut folded = self.folded.lock();
        folded.max_age = Some(folded.max_age.map_or(max_age, |current| current.min(max_age)));
        if hint.scope == Some(CacheScope::Private) {
            folded.scope = CacheScope::Private;
        }
    }

    /// The policy so far. A response no resolver has hinted is not cacheable.
    pub fn policy(&self) -> CachePolicy {
        let folded = self.folded.lock();
        CachePolicy {
            max_age: folded.max_age.unwrap_or(0),
            scope: folded.scope,
        }
    }
}

/// Attaches `hint` to the response currently being resolved.
///
/// A no-op when the request carries no [`CacheControl`] (for instance when
/// the schema is executed directly rather than through the HTTP service).
pub fn set_cache_hint(ctx: &async_graphql::Context<'_>, hint: CacheHint) {
    if let Some(control) = ctx.data_opt::<Arc<CacheControl>>() {
        control.restrict(hint);
    }
}
