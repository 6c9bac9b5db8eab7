//! The GraphQL HTTP handler.
//!
//! Accepts `POST` with a JSON body and `GET` with URL parameters, resolves
//! persisted queries, consults the response cache, executes the operation and
//! sets `Cache-Control` from the folded cache hints.

use std::sync::Arc;
use std::time::Duration;

use async_graphql::Variables;
use async_graphql::http::GraphiQLSource;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use super::cache_control::{CacheControl, CachePolicy};
use super::persisted::{PersistedQueries, PersistedQuery};
use super::response_cache::{Fingerprint, ResponseCache};
use super::schema::BookSchema;
use crate::cache::KeyValueCache;
use crate::context::Context;
use crate::http::{Method, Request, Response, StatusCode};

const EMPTY_POST: &str =
    "POST body missing, invalid Content-Type, or JSON object has no keys.";
const MISSING_QUERY: &str =
    "GraphQL operations must contain a non-empty `query` or a `persistedQuery` extension.";

/// Knobs for [`GraphQLService`].
#[derive(Debug, Clone)]
pub struct GraphQLSettings {
    /// Max age, in seconds, for fields that do not set one.
    pub default_max_age: u32,
    /// Lifetime of a persisted query registration; `None` keeps it until evicted.
    pub apq_ttl: Option<Duration>,
    pub response_cache: bool,
    /// Request header carrying the session id for private response caching.
    pub session_header: String,
}

impl Default for GraphQLSettings {
    fn default() -> Self {
        Self {
            default_max_age: 5,
            apq_ttl: Some(Duration::from_secs(300)),
            response_cache: true,
            session_header: "session-id".to_owned(),
        }
    }
}

/// A GraphQL request as sent over HTTP.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLPayload {
    pub query: Option<String>,
    pub operation_name: Option<String>,
    pub variables: Option<Value>,
    pub extensions: Option<PayloadExtensions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadExtensions {
    pub persisted_query: Option<PersistedQuery>,
}

impl GraphQLPayload {
    fn is_empty(&self) -> bool {
        self.query.is_none()
            && self.operation_name.is_none()
            && self.variables.is_none()
            && self.extensions.is_none()
    }

    /// Reads `query`, `operationName`, `variables` and `extensions` from the
    /// URL. The last two are JSON-encoded strings.
    fn from_query_params(request: &Request) -> Result<Self, String> {
        let json_param = |name: &str| -> Result<Option<Value>, String> {
            request
                .query_param(name)
                .filter(|raw| !raw.is_empty())
                .map(|raw| {
                    serde_json::from_str(raw).map_err(|e| format!("`{name}` is not valid JSON: {e}"))
                })
                .transpose()
        };

        let extensions = match json_param("extensions")? {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| format!("`extensions` is malformed: {e}"))?,
            ),
            None => None,
        };

        Ok(Self {
            query: request
                .query_param("query")
                .filter(|q| !q.is_empty())
                .map(str::to_owned),
            operation_name: request.query_param("operationName").map(str::to_owned),
            variables: json_param("variables")?,
            extensions,
        })
    }
}

/// Builds the `{"errors":[..]}` body used for request-level failures.
fn error_response(status: StatusCode, message: &str, code: &str) -> Response {
    let body = json!({
        "errors": [{ "message": message, "extensions": { "code": code } }]
    });
    Response::new(status)
        .header("Cache-Control", "no-store")
        .json(body.to_string())
}

fn bad_request(message: &str) -> Response {
    error_response(StatusCode::BadRequest, message, "BAD_REQUEST")
}

/// Serves the schema over HTTP.
#[derive(Clone)]
pub struct GraphQLService {
    schema: BookSchema,
    persisted: PersistedQueries,
    responses: Option<ResponseCache>,
    settings: Arc<GraphQLSettings>,
}

impl GraphQLService {
    pub fn new(schema: BookSchema, store: Arc<dyn KeyValueCache>, settings: GraphQLSettings) -> Self {
        let responses = settings
            .response_cache
            .then(|| ResponseCache::new(Arc::clone(&store)));
        Self {
            schema,
            persisted: PersistedQueries::new(store, settings.apq_ttl),
            responses,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &GraphQLSettings {
        &self.settings
    }

    pub async fn handle(&self, ctx: Context) -> Response {
        let payload = match ctx.request().method() {
            Method::Post => {
                if !ctx.request().is_json() || ctx.request().body().is_empty() {
                    return bad_request(EMPTY_POST);
                }
                match ctx.json::<GraphQLPayload>() {
                    Ok(payload) if payload.is_empty() => return bad_request(EMPTY_POST),
                    Ok(payload) => payload,
                    Err(e) => return bad_request(&format!("POST body is not a GraphQL request: {e}")),
                }
            }
            _ => match GraphQLPayload::from_query_params(ctx.request()) {
                Ok(payload) if payload.query.is_none() && payload.extensions.is_none() => {
                    return Response::new(StatusCode::Ok).html(
                        GraphiQLSource::build()
                            .endpoint(ctx.request().path())
                            .finish(),
                    );
                }
                Ok(payload) => payload,
                Err(message) => return bad_request(&message),
            },
        };

        let session = ctx
            .request()
            .headers()
            .get(&self.settings.session_header)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        self.execute(payload, session.as_deref()).await
    }

    async fn execute(&self, payload: GraphQLPayload, session: Option<&str>) -> Response {
        let GraphQLPayload {
            query,
            operation_name,
            variables,
            extensions,
        } = payload;

        let query = match extensions.and_then(|e| e.persisted_query) {
            Some(extension) => match self.persisted.resolve(query, &extension).await {
                Ok(query) => query,
                Err(e) if e.is_bad_request() => {
                    return error_response(StatusCode::BadRequest, &e.to_string(), e.code());
                }
                Err(e) => return error_response(StatusCode::Ok, &e.to_string(), e.code()),
            },
            None => match query {
                Some(query) => query,
                None => return bad_request(MISSING_QUERY),
            },
        };

        let fingerprint = Fingerprint::new(&query, variables.as_ref(), operation_name.as_deref());
        if let Some(responses) = &self.responses {
            if let Some(hit) = responses.lookup(&fingerprint, session).await {
                debug!(fingerprint = fingerprint.as_str(), age = hit.age, "response cache hit");
                return Response::new(StatusCode::Ok)
                    .header("Cache-Control", hit.policy.header_value())
                    .header("Age", hit.age.to_string())
                    .json(hit.body);
            }
        }

        let control = Arc::new(CacheControl::new(self.settings.default_max_age));
        let mut request = async_graphql::Request::new(query)
            .variables(Variables::from_json(variables.unwrap_or(Value::Null)))
            .data(Arc::clone(&control));
        if let Some(name) = operation_name {
            request = request.operation_name(name);
        }

        let response = self.schema.execute(request).await;
        let policy = if response.is_ok() {
            control.policy()
        } else {
            CachePolicy::default()
        };

        let body = match serde_json::to_string(&response) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to serialize GraphQL response");
                return error_response(
                    StatusCode::InternalServerError,
                    "failed to serialize response",
                    "INTERNAL_SERVER_ERROR",
                );
            }
        };

        if let Some(responses) = &self.responses {
            responses.store(&fingerprint, session, &body, policy).await;
        }

        Response::new(StatusCode::Ok)
            .header("Cache-Control", policy.header_value())
            .json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::BookCatalog;
    use crate::cache::InMemoryLruCache;
    use crate::cache::testing::UnreachableStore;
    use crate::graphql::persisted::sha256_hex;
    use crate::graphql::schema::build_schema;

    fn service_with(store: Arc<dyn KeyValueCache>, settings: GraphQLSettings) -> GraphQLService {
        GraphQLService::new(build_schema(BookCatalog::sample()), store, settings)
    }

    fn service() -> GraphQLService {
        service_with(Arc::new(InMemoryLruCache::default()), GraphQLSettings::default())
    }

    fn post(body: &str, extra_headers: &str) -> Context {
        let raw = format!(
            "POST /graphql HTTP/1.1\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        Context::new(Request::parse(raw.as_bytes()).unwrap().0)
    }

    fn get(target: &str) -> Context {
        let raw = format!("GET {target} HTTP/1.1\r\n\r\n");
        Context::new(Request::parse(raw.as_bytes()).unwrap().0)
    }

    fn body_json(response: &Response) -> Value {
        serde_json::from_slice(response.content()).unwrap()
    }

    fn cache_control(response: &Response) -> Option<&str> {
        response.headers().get("cache-control")
    }

    #[tokio::test]
    async fn books_are_private_for_sixty_seconds() {
        let response = service()
            .handle(post(r#"{"query":"{ books { title author } }"}"#, ""))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(cache_control(&response), Some("max-age=60, private"));
        assert_eq!(
            body_json(&response),
            json!({"data": {"books": [
                {"title": "The Awakening", "author": "Kate Chopin"},
                {"title": "City of Glass", "author": "Paul Auster"}
            ]}})
        );
    }

    #[tokio::test]
    async fn hello_is_public_with_default_age() {
        let response = service().handle(post(r#"{"query":"{ hello }"}"#, "")).await;
        assert_eq!(cache_control(&response), Some("max-age=5, public"));
        assert_eq!(body_json(&response), json!({"data": {"hello": "world"}}));
    }

    #[tokio::test]
    async fn errors_are_not_stored() {
        let response = service().handle(post(r#"{"query":"{ nope }"}"#, "")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(cache_control(&response), Some("no-store"));
        assert!(body_json(&response)["errors"].is_array());
    }

    #[tokio::test]
    async fn post_requires_json_body() {
        let raw = "POST /graphql HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi";
        let ctx = Context::new(Request::parse(raw.as_bytes()).unwrap().0);
        let response = service().handle(ctx).await;
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert_eq!(body_json(&response)["errors"][0]["message"], EMPTY_POST);

        let response = service().handle(post("{}", "")).await;
        assert_eq!(response.status(), StatusCode::BadRequest);

        let response = service().handle(post("{not json", "")).await;
        assert_eq!(response.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn get_executes_url_parameters() {
        let response = service()
            .handle(get("/graphql?query=query%20Greet%20%7B%20hello%20%7D&operationName=Greet&variables=%7B%7D"))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(body_json(&response), json!({"data": {"hello": "world"}}));
    }

    #[tokio::test]
    async fn get_without_operation_serves_landing_page() {
        let response = service().handle(get("/graphql")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(
            response
                .headers()
                .get("content-type")
                .is_some_and(|ct| ct.starts_with("text/html"))
        );
    }

    #[tokio::test]
    async fn get_with_bad_variables_is_rejected() {
        let response = service()
            .handle(get("/graphql?query=%7Bhello%7D&variables=%7Bnope"))
            .await;
        assert_eq!(response.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn persisted_query_round_trip() {
        let service = service();
        let query = "{ hello }";
        let extensions = json!({"persistedQuery": {"version": 1, "sha256Hash": sha256_hex(query)}});

        let hash_only = json!({ "extensions": extensions }).to_string();
        let response = service.handle(post(&hash_only, "")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            body_json(&response)["errors"][0]["extensions"]["code"],
            "PERSISTED_QUERY_NOT_FOUND"
        );

        let register = json!({ "query": query, "extensions": extensions }).to_string();
        let response = service.handle(post(&register, "")).await;
        assert_eq!(body_json(&response), json!({"data": {"hello": "world"}}));

        let response = service.handle(post(&hash_only, "")).await;
        assert_eq!(body_json(&response)["data"]["hello"], "world");
    }

    #[tokio::test]
    async fn persisted_query_hash_mismatch_is_bad_request() {
        let body = json!({
            "query": "{ hello }",
            "extensions": {"persistedQuery": {"version": 1, "sha256Hash": "00"}}
        });
        let response = service().handle(post(&body.to_string(), "")).await;
        assert_eq!(response.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn public_response_is_served_from_cache() {
        let service = service();
        let first = service.handle(post(r#"{"query":"{ hello }"}"#, "")).await;
        assert!(!first.headers().contains("age"));

        let second = service.handle(post(r#"{"query":"{   hello }"}"#, "")).await;
        assert_eq!(second.headers().get("age"), Some("0"));
        assert_eq!(cache_control(&second), Some("max-age=5, public"));
        assert_eq!(second.content(), first.content());
    }

    #[tokio::test]
    async fn private_response_is_cached_per_session() {
        let service = service();
        let query = r#"{"query":"{ books { title } }"}"#;

        service.handle(post(query, "session-id: alice\r\n")).await;
        let alice = service.handle(post(query, "session-id: alice\r\n")).await;
        assert!(alice.headers().contains("age"));

        let bob = service.handle(post(query, "session-id: bob\r\n")).await;
        assert!(!bob.headers().contains("age"));

        let anonymous = service.handle(post(query, "")).await;
        assert!(!anonymous.headers().contains("age"));
    }

    #[tokio::test]
    async fn response_cache_can_be_disabled() {
        let settings = GraphQLSettings {
            response_cache: false,
            ..GraphQLSettings::default()
        };
        let service = service_with(Arc::new(InMemoryLruCache::default()), settings);
        service.handle(post(r#"{"query":"{ hello }"}"#, "")).await;
        let second = service.handle(post(r#"{"query":"{ hello }"}"#, "")).await;
        assert!(!second.headers().contains("age"));
        assert_eq!(cache_control(&second), Some("max-age=5, public"));
    }

    #[tokio::test]
    async fn unreachable_store_still_serves() {
        let service = service_with(Arc::new(UnreachableStore), GraphQLSettings::default());
        let response = service.handle(post(r#"{"query":"{ hello }"}"#, "")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(body_json(&response), json!({"data": {"hello": "world"}}));
    }
}
