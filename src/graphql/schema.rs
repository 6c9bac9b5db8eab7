//! Schema and resolvers.

use async_graphql::{Context, EmptyMutation, EmptySubscription, Object, Schema};
use tracing::debug;

use super::cache_control::{CacheHint, CacheScope, set_cache_hint};
use crate::books::{Book, BookCatalog};

/// The executable schema: `Query { books, hello }`, no mutations.
pub type BookSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// How long a `books` result may be reused, in seconds.
pub const BOOKS_MAX_AGE: u32 = 60;

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Every book in the catalogue.
    async fn books(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<Book>> {
        debug!("resolving books");
        set_cache_hint(ctx, CacheHint::new(BOOKS_MAX_AGE, CacheScope::Private));
        Ok(ctx.data::<BookCatalog>()?.books().to_vec())
    }

    /// A static greeting.
    async fn hello(&self, ctx: &Context<'_>) -> &'static str {
        set_cache_hint(ctx, CacheHint::default());
        "world"
    }
}

/// Builds the schema over `catalog`.
pub fn build_schema(catalog: BookCatalog) -> BookSchema {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(catalog)
        .finish()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_graphql::{Request, value};

    use super::*;
    use crate::graphql::cache_control::{CacheControl, CachePolicy};

    async fn execute(query: &str) -> (async_graphql::Response, CachePolicy) {
        let schema = build_schema(BookCatalog::sample());
        let control = Arc::new(CacheControl::new(5));
        let response = schema
            .execute(Request::new(query).data(Arc::clone(&control)))
            .await;
        (response, control.policy())
    }

    #[tokio::test]
    async fn books_returns_catalogue_with_private_hint() {
        let (response, policy) = execute("{ books { title author } }").await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            value!({
                "books": [
                    { "title": "The Awakening", "author": "Kate Chopin" },
                    { "title": "City of Glass", "author": "Paul Auster" }
                ]
            })
        );
        assert_eq!(policy.header_value(), "max-age=60, private");
    }

    #[tokio::test]
    async fn hello_uses_default_max_age() {
        let (response, policy) = execute("{ hello }").await;
        assert_eq!(response.data, value!({ "hello": "world" }));
        assert_eq!(policy.header_value(), "max-age=5, public");
    }

    #[tokio::test]
    async fn combined_query_takes_strictest_policy() {
        let (_, policy) = execute("{ hello books { title } }").await;
        assert_eq!(policy.header_value(), "max-age=5, private");
    }

    #[tokio::test]
    async fn unknown_field_is_a_graphql_error() {
        let (response, policy) = execute("{ magazines }").await;
        assert!(!response.errors.is_empty());
        assert!(!policy.is_cacheable());
    }

    #[tokio::test]
    async fn executes_without_cache_control_data() {
        let schema = build_schema(BookCatalog::sample());
        let response = schema.execute("{ hello }").await;
        assert!(response.errors.is_empty());
    }

    #[test]
    fn sdl_exposes_books_and_hello() {
        let sdl = build_schema(BookCatalog::default()).sdl();
        assert!(sdl.contains("books: [Book!]!"));
        assert!(sdl.contains("hello: String!"));
        assert!(sdl.contains("type Book"));
    }
}
