//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::{Router, body::Body, http::Request};
use bytes::Bytes;
use devroute::{
    adapters::{InMemoryProjectFiles, build_router},
    config::DevServerConfig,
    core::{
        Environment, InvalidationController, RequestController, RequestDispatcher,
        RouteManifestBuilder, RouteTable, create_development_environment,
        manifest::RouteDefinition,
    },
    ports::{
        error_overlay::{ErrorOverlay, ErrorPayload, OverlayPage},
        module_loader::{LoaderEvent, LoaderResult, ModuleLoader},
        renderer::{RenderContext, RenderOutput, RenderResult, Renderer},
    },
};
use futures_util::{StreamExt, stream};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::broadcast;
use tower::ServiceExt;

pub const ROOT: &str = "/project";

/// Renders `<route> <params>`; routes starting with `/slow` emit one chunk
/// and then never finish.
pub struct EchoRenderer;

#[async_trait]
impl Renderer for EchoRenderer {
    fn name(&self) -> &str {
        "echo"
    }

    fn client_entrypoint(&self) -> Option<&str> {
        None
    }

    fn server_entrypoint(&self) -> &str {
        "echo/server"
    }

    fn supports(&self, _route: &RouteDefinition) -> bool {
        true
    }

    async fn render(&self, ctx: RenderContext) -> RenderResult<RenderOutput> {
        let body = format!("{} {:?}", ctx.route.route, ctx.params);
        let chunks = if ctx.route.route.starts_with("/slow") {
            stream::iter(vec![Ok(Bytes::from(body))])
                .chain(stream::pending())
                .boxed()
        } else {
            stream::iter(vec![Ok(Bytes::from(body))]).boxed()
        };
        Ok(RenderOutput {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            chunks,
        })
    }
}

/// Loader that resolves everything under [`ROOT`] and counts resolutions.
pub struct StubLoader {
    root: PathBuf,
    pub resolves: AtomicUsize,
    pub events: broadcast::Sender<LoaderEvent>,
}

impl StubLoader {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            root: PathBuf::from(ROOT),
            resolves: AtomicUsize::new(0),
            events,
        }
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModuleLoader for StubLoader {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve_id(&self, specifier: &str) -> LoaderResult<Option<PathBuf>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.root.join(specifier)))
    }

    async fn load_renderers(&self) -> LoaderResult<Vec<Arc<dyn Renderer>>> {
        Ok(vec![Arc::new(EchoRenderer)])
    }

    fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }
}

pub struct TextOverlay;

impl ErrorOverlay for TextOverlay {
    fn present(&self, payload: ErrorPayload) -> OverlayPage {
        OverlayPage {
            content_type: "text/plain",
            body: Bytes::from(payload.message),
        }
    }
}

pub struct Harness {
    pub env: Arc<Environment>,
    pub routes: Arc<RouteTable>,
    pub controller: Arc<RequestController>,
    pub dispatcher: Arc<RequestDispatcher>,
    pub loader: Arc<StubLoader>,
    pub files: Arc<InMemoryProjectFiles>,
    pub app: Router,
}

impl Harness {
    pub async fn new(config: DevServerConfig, files: InMemoryProjectFiles) -> Self {
        let loader = Arc::new(StubLoader::new());
        let files = Arc::new(files);
        let env = Arc::new(create_development_environment(&config, loader.clone()));
        let routes = Arc::new(
            RouteTable::load(RouteManifestBuilder::from_config(&config), files.clone())
                .await
                .expect("initial manifest"),
        );
        let controller = Arc::new(RequestController::new());
        let dispatcher = Arc::new(RequestDispatcher::new(
            env.clone(),
            routes.clone(),
            controller.clone(),
            loader.clone(),
            Arc::new(TextOverlay),
        ));
        let app = build_router(dispatcher.clone(), &config.base);
        Self {
            env,
            routes,
            controller,
            dispatcher,
            loader,
            files,
            app,
        }
    }

    pub fn invalidation(&self) -> InvalidationController {
        InvalidationController::new(self.env.clone(), self.routes.clone())
    }

    pub async fn request(&self, path: &str) -> axum::response::Response {
        self.app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        let response = self.request(path).await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }
}
