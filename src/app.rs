//! Application wiring: cache store, schema, routes and middleware.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::books::{BookCatalog, CatalogError};
use crate::cache::{
    CacheError, InMemoryLruCache, KeyValueCache, LoggingCache, PrefixingCache, RedisCache,
};
use crate::config::{Config, ConfigError};
use crate::graphql::{GraphQLService, GraphQLSettings, build_schema};
use crate::middleware::{LoggerMiddleware, Pipeline};
use crate::router::Router;
use crate::security::CorsMiddleware;
use crate::server::{Server, ServerError};
use crate::{Request, Response};

/// Paths the GraphQL endpoint answers on.
pub const GRAPHQL_PATHS: [&str; 2] = ["/", "/graphql"];

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Builds the configured store: Redis under the cache namespace when a URL is
/// given, the in-memory LRU otherwise, optionally behind [`LoggingCache`].
///
/// # Errors
///
/// [`AppError::Cache`] for a malformed Redis URL, [`AppError::Config`] for a
/// zero LRU bound. Redis itself is not contacted here.
pub fn build_store(config: &Config) -> Result<Arc<dyn KeyValueCache>, AppError> {
    let store: Arc<dyn KeyValueCache> = match &config.redis_url {
        Some(url) => {
            let redis = RedisCache::open(url)?.with_connect_timeout(config.redis_connect_timeout());
            info!(namespace = %config.cache_namespace, "using Redis cache store");
            Arc::new(PrefixingCache::new(redis, config.cache_namespace.clone()))
        }
        None => {
            info!(
                max_entries = config.lru_max_entries,
                max_bytes = config.lru_max_bytes,
                "using in-memory LRU cache store"
            );
            Arc::new(InMemoryLruCache::new(
                config.lru_max_entries()?,
                config.lru_max_bytes,
            ))
        }
    };

    if config.log_cache_operations {
        Ok(Arc::new(LoggingCache::new(store)))
    } else {
        Ok(store)
    }
}

/// The request pipeline: logging, CORS, then the GraphQL routes.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bookshelf::app::App;
/// use bookshelf::books::BookCatalog;
/// use bookshelf::cache::InMemoryLruCache;
/// use bookshelf::graphql::GraphQLSettings;
///
/// let app = App::new(
///     Arc::new(InMemoryLruCache::default()),
///     BookCatalog::sample(),
///     GraphQLSettings::default(),
/// );
/// # let _ = app;
/// ```
#[derive(Clone)]
pub struct App {
    pipeline: Pipeline,
}

impl App {
    pub fn new(
        store: Arc<dyn KeyValueCache>,
        catalog: BookCatalog,
        settings: GraphQLSettings,
    ) -> Self {
        let cors = CorsMiddleware::new().allow_header(settings.session_header.clone());
        let service = GraphQLService::new(build_schema(catalog), store, settings);

        let mut router = Router::new();
        for path in GRAPHQL_PATHS {
            let get = service.clone();
            router.get(path, move |ctx| {
                let service = get.clone();
                async move { service.handle(ctx).await }
            });
            let post = service.clone();
            router.post(path, move |ctx| {
                let service = post.clone();
                async move { service.handle(ctx).await }
            });
        }

        let pipeline = Pipeline::new(router)
            .with(Arc::new(LoggerMiddleware))
            .with(Arc::new(cors));
        Self { pipeline }
    }

    /// # Errors
    ///
    /// See [`build_store`]; also [`AppError::Catalog`] if `--books` cannot be loaded.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let catalog = match &config.books {
            Some(path) => BookCatalog::from_json_file(path)?,
            None => BookCatalog::sample(),
        };
        info!(books = catalog.len(), "catalogue loaded");
        let store = build_store(config)?;
        Ok(Self::new(store, catalog, config.graphql_settings()))
    }

    pub async fn handle(&self, request: Request) -> Response {
        self.pipeline.handle(request).await
    }

    /// Serves on `server` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Propagates [`ServerError`].
    pub async fn serve(
        self,
        server: Server,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), AppError> {
        server
            .run_until(
                move |request| {
                    let app = self.clone();
                    async move { app.handle(request).await }
                },
                shutdown,
            )
            .await?;
        Ok(())
    }
}

/// Validates `config`, builds the app and serves until `shutdown` resolves.
///
/// # Errors
///
/// Any [`AppError`] from validation, startup or the listener.
pub async fn serve(config: Config, shutdown: impl Future<Output = ()>) -> Result<(), AppError> {
    config.validate()?;
    let app = App::from_config(&config)?;
    let server = Server::bind(config.listen_addr()).await?;
    info!(
        "GraphQL endpoint ready at http://{}/graphql",
        server.local_addr()
    );
    app.serve(server, shutdown).await
}
