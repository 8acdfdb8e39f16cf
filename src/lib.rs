//! devroute - a development-time request pipeline for file-routed sites.
//!
//! devroute keeps a live route manifest derived from the files under a
//! project's pages directory, memoizes request → route resolutions in a route
//! cache, and serves each request through a cancellable lifecycle. File
//! changes clear the cache (and, when files are added or removed, rebuild the
//! manifest) without any request ever observing a half-rebuilt state.
//!
//! # Features
//! - File-based routing with static, dynamic (`[slug]`) and rest (`[...path]`) segments
//! - Deterministic route precedence, with `index` files mapping to directory routes
//! - Route cache cleared on every file event, manifest rebuilt on add/unlink
//! - Per-request cancellation driven by module-loader invalidations
//! - Streaming or buffered responses, custom `/404` pages, base-path mounting
//! - Error overlay port for presenting request failures
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use devroute::{DevServer, config::DevServerConfig, utils::GracefulShutdown};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = DevServerConfig::builder().root("./my-site").build();
//! let server = DevServer::new(config).await?;
//! server.serve(Arc::new(GracefulShutdown::new())).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits for the module loader, renderers, the
//! error overlay and project files) from **adapters** (filesystem-backed
//! implementations and the axum transport), keeping the pipeline itself in
//! `core`.
//!
//! # Concurrency & Data Structures
//! The route cache and the in-flight request table are `scc::HashMap`s. The
//! live manifest sits behind a `tokio::sync::RwLock`: requests resolve under
//! the read lock, invalidations clear and rebuild under the write lock.
//!
//! # Error Handling
//! Ports define `thiserror` enums; application edges return `eyre::Result`.
pub mod config;
pub mod ports;
pub mod server;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{FsModuleLoader, HtmlRenderer, JsonErrorOverlay, build_router},
    core::{InvalidationController, RequestController, RequestDispatcher, RouteTable},
    server::DevServer,
    utils::GracefulShutdown,
};
