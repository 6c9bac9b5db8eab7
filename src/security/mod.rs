//! Cross-origin resource sharing for browser clients of the GraphQL endpoint.

use std::pin::Pin;
use std::sync::Arc;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// Answers CORS preflights and adds `Access-Control-*` headers to responses.
///
/// - Without an `Origin` header, or with an origin outside the allow-list,
///   the request passes through unmodified.
/// - `OPTIONS` preflights are answered with `204 No Content`; the router is
///   not called.
/// - Other requests run normally and the CORS headers are appended.
/// - `Vary: Origin` is added whenever a specific origin is echoed back.
///
/// # Examples
///
/// ```
/// use bookshelf::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new()
///     .only_origin("https://studio.example.com")
///     .allow_header("session-id");
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Any origin, `GET`/`POST`/`OPTIONS`, and the `Content-Type` and
    /// `Authorization` headers.
    pub fn new() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: vec!["GET".to_owned(), "POST".to_owned(), "OPTIONS".to_owned()],
            allowed_headers: vec!["Content-Type".to_owned(), "Authorization".to_owned()],
        }
    }

    /// Replaces the wildcard with an explicit allow-list entry. Further calls
    /// add more origins.
    #[must_use]
    pub fn only_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.retain(|o| o != "*");
        self.allowed_origins.push(origin.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        let header = header.into();
        if !self
            .allowed_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&header))
        {
            self.allowed_headers.push(header);
        }
        self
    }

    fn allow_origin_for(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let allow_origin = ctx
            .request()
            .headers()
            .get("origin")
            .and_then(|origin| self.allow_origin_for(origin));
        let Some(allow_origin) = allow_origin else {
            return Box::pin(next.run(ctx));
        };

        let is_preflight = ctx.request().method() == &Method::Options;
        let methods = Arc::<str>::from(self.allowed_methods.join(", "));
        let headers = Arc::<str>::from(self.allowed_headers.join(", "));

        Box::pin(async move {
            let mut response = if is_preflight {
                Response::new(StatusCode::NoContent).header("Access-Control-Max-Age", "3600")
            } else {
                next.run(ctx).await
            };

            response.add_header("Access-Control-Allow-Origin", allow_origin.as_str());
            response.add_header("Access-Control-Allow-Methods", &*methods);
            response.add_header("Access-Control-Allow-Headers", &*headers);
            if allow_origin != "*" {
                response.add_header("Vary", "Origin");
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use crate::middleware::Pipeline;
    use crate::router::Router;

    fn pipeline(cors: CorsMiddleware) -> Pipeline {
        let mut router = Router::new();
        router.post("/graphql", |_ctx| async { Response::new(StatusCode::Ok).json("{}") });
        Pipeline::new(router).with(Arc::new(cors))
    }

    fn request(method: &str, origin: Option<&str>) -> Request {
        let origin = origin
            .map(|o| format!("Origin: {o}\r\n"))
            .unwrap_or_default();
        let raw = format!("{method} /graphql HTTP/1.1\r\n{origin}\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[tokio::test]
    async fn no_origin_passes_through() {
        let response = pipeline(CorsMiddleware::new()).handle(request("POST", None)).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(!response.headers().contains("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn wildcard_decorates_actual_request() {
        let response = pipeline(CorsMiddleware::new())
            .handle(request("POST", Some("https://a.example")))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(
            response.headers().get("access-control-allow-methods"),
            Some("GET, POST, OPTIONS")
        );
        assert!(!response.headers().contains("vary"));
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let cors = CorsMiddleware::new().allow_header("session-id");
        let response = pipeline(cors)
            .handle(request("OPTIONS", Some("https://a.example")))
            .await;
        assert_eq!(response.status(), StatusCode::NoContent);
        assert_eq!(
            response.headers().get("access-control-allow-headers"),
            Some("Content-Type, Authorization, session-id")
        );
    }

    #[tokio::test]
    async fn explicit_origin_list() {
        let cors = CorsMiddleware::new().only_origin("https://a.example");

        let response = pipeline(cors.clone())
            .handle(request("POST", Some("https://a.example")))
            .await;
        assert_eq!(
            response.headers().get("access-control-allow-origin"),
            Some("https://a.example")
        );
        assert_eq!(response.headers().get("vary"), Some("Origin"));

        let response = pipeline(cors)
            .handle(request("POST", Some("https://b.example")))
            .await;
        assert!(!response.headers().contains("access-control-allow-origin"));
    }
}
