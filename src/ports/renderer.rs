use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::core::manifest::RouteDefinition;

/// Error type for renderer operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RenderError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// No registered renderer accepts the component
    #[error("No renderer supports component '{0}'")]
    Unsupported(String),

    #[error("Render failed: {0}")]
    Failed(String),

    /// The request's token fired while rendering
    #[error("Render cancelled")]
    Cancelled,
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Everything a renderer gets to see about the request being rendered.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub request_id: Uuid,
    pub method: Method,
    pub pathname: String,
    pub headers: HeaderMap,
    pub route: Arc<RouteDefinition>,
    pub params: BTreeMap<String, String>,
    /// Component file on disk
    pub component_path: PathBuf,
    /// Servable URL of the component, as produced by the environment's resolver
    pub component_url: String,
    pub site: Option<Url>,
    pub compress_html: bool,
    pub ssr: bool,
    pub markdown: Arc<serde_json::Value>,
    pub client_directives: Arc<BTreeMap<String, String>>,
    /// Stop producing output once this is cancelled
    pub cancellation: CancellationToken,
}

/// Rendered response head plus a stream of body chunks.
pub struct RenderOutput {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub chunks: BoxStream<'static, RenderResult<Bytes>>,
}

impl std::fmt::Debug for RenderOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOutput")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Renderer defines the port for UI-framework render plugins
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Entry module loaded in the browser, if the plugin hydrates on the client
    fn client_entrypoint(&self) -> Option<&str>;

    /// Entry module used to render on the server
    fn server_entrypoint(&self) -> &str;

    /// Whether this plugin can render the route's component
    fn supports(&self, route: &RouteDefinition) -> bool;

    /// Render the component. Chunks are pulled lazily by the dispatcher.
    async fn render(&self, ctx: RenderContext) -> RenderResult<RenderOutput>;
}
