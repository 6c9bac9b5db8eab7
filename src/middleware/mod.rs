//! Middleware pipeline: composable before/after request handler logic.
//!
//! A [`Pipeline`] runs an ordered stack of [`Middleware`] and ends in a
//! [`Router`]. Each middleware receives a [`Next`] cursor and may pass the
//! request on, answer it directly, or decorate the downstream response.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::info;

use crate::{Request, Response, context::Context, router::Router};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Wraps a [`Middleware`] implementation as a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`Next::run`], so each middleware can forward a
/// request at most once. When the stack is exhausted the router handles it.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Arc<Router>,
    index: usize,
}

impl Next {
    pub async fn run(mut self, ctx: Context) -> Response {
        let current = self.middlewares.get(self.index).cloned();
        match current {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => self.endpoint.dispatch(ctx).await,
        }
    }
}

/// The trait for all middleware.
///
/// Implementations are shared across connection tasks and must not hold
/// `&mut` state across an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack in front of a [`Router`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bookshelf::middleware::{LoggerMiddleware, Pipeline};
/// use bookshelf::router::Router;
/// use bookshelf::{Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// let pipeline = Pipeline::new(router).with(Arc::new(LoggerMiddleware));
/// assert_eq!(pipeline.len(), 1);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            middlewares: Arc::from(Vec::new()),
            endpoint: Arc::new(router),
        }
    }

    /// Appends a middleware; the first one added runs outermost.
    #[must_use]
    pub fn with<M: Middleware + 'static>(self, middleware: Arc<M>) -> Self {
        let mut stack = self.middlewares.to_vec();
        stack.push(from_middleware(middleware));
        Self {
            middlewares: Arc::from(stack),
            endpoint: self.endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub async fn handle(&self, request: Request) -> Response {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            endpoint: Arc::clone(&self.endpoint),
            index: 0,
        };
        next.run(Context::new(request)).await
    }
}

/// Logs method, path, status and elapsed time for every request.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_owned();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            info!(
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed_ms,
                "request completed"
            );

            response
        })
    }
}
