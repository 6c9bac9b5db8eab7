//! # bookshelf
//!
//! A GraphQL server for a small book catalogue. Responses carry cache-control
//! hints, and persisted queries and whole responses are kept in a pluggable
//! key-value store (an in-memory LRU or Redis).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clap::Parser;
//! use bookshelf::{app, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::parse_from(["bookshelf", "--port", "4000"]);
//!     app::serve(config, async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod books;
pub mod cache;
pub mod config;
pub mod context;
pub mod graphql;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

pub use app::{App, AppError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
