//! GraphQL over HTTP.
//!
//! - [`schema`]: the `Query { books, hello }` schema, executed by `async-graphql`.
//! - [`cache_control`]: per-field cache hints folded into a response policy.
//! - [`persisted`]: automatic persisted queries stored in a [`KeyValueCache`](crate::cache::KeyValueCache).
//! - [`response_cache`]: whole-response caching keyed by operation fingerprint.
//! - [`service`]: the HTTP handler that ties them together.

pub mod cache_control;
pub mod persisted;
pub mod response_cache;
pub mod schema;
pub mod service;

pub use cache_control::{CacheControl, CacheHint, CachePolicy, CacheScope, set_cache_hint};
pub use persisted::{PersistedQueries, PersistedQuery, PersistedQueryError};
pub use response_cache::{Fingerprint, ResponseCache};
pub use schema::{BookSchema, QueryRoot, build_schema};
pub use service::{GraphQLPayload, GraphQLService, GraphQLSettings};
