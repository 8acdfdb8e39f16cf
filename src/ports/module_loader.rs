use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::ports::{error_overlay::ErrorPayload, renderer::Renderer};

/// Error type for module loader operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LoaderError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The specifier could not be turned into a module path
    #[error("Cannot resolve module '{0}'")]
    Unresolved(String),

    /// A configured renderer is not known to the loader
    #[error("Unknown renderer '{0}'")]
    UnknownRenderer(String),
}

/// Result type for module loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Signals emitted by the loader when modules it handed out become stale.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// A single module changed; requests depending on it must stop.
    Invalidated { module: PathBuf },
    /// The whole module graph is stale.
    FullReload,
    /// The loader failed to process a module.
    Error(ErrorPayload),
}

/// ModuleLoader defines the port (interface) to the module-loading subsystem
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    /// Project root the loader resolves against
    fn root(&self) -> &Path;

    /// Resolve a module specifier to a file on disk.
    ///
    /// Returns `Ok(None)` when the specifier names nothing the loader knows about.
    async fn resolve_id(&self, specifier: &str) -> LoaderResult<Option<PathBuf>>;

    /// Load the renderer plugins configured for the project, in registration order
    async fn load_renderers(&self) -> LoaderResult<Vec<Arc<dyn Renderer>>>;

    /// Subscribe to invalidation and error signals
    fn subscribe(&self) -> broadcast::Receiver<LoaderEvent>;
}
