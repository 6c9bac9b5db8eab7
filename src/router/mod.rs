//! Request routing by exact path and method.
//!
//! Trailing slashes are normalized on both registered paths and incoming
//! paths, so `/graphql/` and `/graphql` are the same route. A path that is
//! registered for other methods answers `405 Method Not Allowed` with an
//! `Allow` header; an unknown path answers `404 Not Found`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::{Method, Response, StatusCode};

/// Type-erased async handler from a [`Context`] to a [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Dispatches requests to handlers registered per method and path.
///
/// # Examples
///
/// ```
/// use bookshelf::router::Router;
/// use bookshelf::{Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/health", |_ctx| async { Response::new(StatusCode::Ok).body("ok") });
/// assert_eq!(router.len(), 1);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` on `path`. The first registration of a
    /// method and path pair wins.
    pub fn route<H, F>(&mut self, method: Method, path: &str, handler: H) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx: Context| {
            Box::pin(handler(ctx)) as Pin<Box<dyn Future<Output = Response> + Send>>
        });
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
        self
    }

    pub fn get<H, F>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    pub fn post<H, F>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the handler for the request in `ctx` and awaits it.
    pub async fn dispatch(&self, ctx: Context) -> Response {
        let path = normalize(ctx.request().path());
        let method = ctx.request().method();

        let mut allowed: Vec<&str> = Vec::new();
        let mut matched = None;
        for route in self.routes.iter().filter(|r| r.path == path) {
            if &route.method == method {
                matched = Some(Arc::clone(&route.handler));
                break;
            }
            if !allowed.contains(&route.method.as_str()) {
                allowed.push(route.method.as_str());
            }
        }

        if let Some(handler) = matched {
            return handler(ctx).await;
        }

        if allowed.is_empty() {
            Response::new(StatusCode::NotFound).body("Not Found")
        } else {
            Response::new(StatusCode::MethodNotAllowed)
                .header("Allow", allowed.join(", "))
                .body("Method Not Allowed")
        }
    }
}
