//! Per-request lifecycle: validate, resolve against the cache and manifest,
//! render, stream.
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, Response, StatusCode, header},
};
use bytes::{Bytes, BytesMut};
use futures_util::{
    StreamExt,
    stream::{self, BoxStream},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        environment::Environment,
        request::{IncomingRequest, normalize_pathname},
        request_controller::{InFlightGuard, RequestController, RequestId},
        route_cache::{ResolutionOutcome, RouteCacheKey},
        route_table::RouteTable,
    },
    ports::{
        error_overlay::{ErrorOverlay, ErrorPayload},
        module_loader::{LoaderError, ModuleLoader},
        renderer::{RenderContext, RenderError, RenderResult, Renderer},
    },
    tracing_setup::create_request_span,
};

/// Route rendered for requests nothing else matches
pub const NOT_FOUND_ROUTE: &str = "/404";

/// Error type for the dispatch of one request
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("Incomplete request")]
    IncompleteRequest,

    /// The request's token fired; never reported to the overlay
    #[error("Request was cancelled")]
    Cancelled,

    #[error("Module loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Render error: {0}")]
    Render(#[source] RenderError),

    #[error("Failed to build response: {0}")]
    Http(#[from] axum::http::Error),
}

impl From<RenderError> for DispatchError {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::Cancelled => DispatchError::Cancelled,
            other => DispatchError::Render(other),
        }
    }
}

impl DispatchError {
    /// Short classification shown by the overlay
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::IncompleteRequest => "IncompleteRequest",
            DispatchError::Cancelled => "Cancelled",
            DispatchError::Loader(_) => "LoaderError",
            DispatchError::Render(_) => "RenderError",
            DispatchError::Http(_) => "ResponseError",
        }
    }
}

/// Request-scoped values threaded through one dispatch
struct RequestScope {
    id: RequestId,
    method: Method,
    pathname: String,
    headers: HeaderMap,
    token: CancellationToken,
}

pub struct RequestDispatcher {
    env: Arc<Environment>,
    routes: Arc<RouteTable>,
    controller: Arc<RequestController>,
    loader: Arc<dyn ModuleLoader>,
    overlay: Arc<dyn ErrorOverlay>,
    renderer_load: Mutex<()>,
}

impl RequestDispatcher {
    pub fn new(
        env: Arc<Environment>,
        routes: Arc<RouteTable>,
        controller: Arc<RequestController>,
        loader: Arc<dyn ModuleLoader>,
        overlay: Arc<dyn ErrorOverlay>,
    ) -> Self {
        Self {
            env,
            routes,
            controller,
            loader,
            overlay,
            renderer_load: Mutex::new(()),
        }
    }

    pub fn controller(&self) -> &Arc<RequestController> {
        &self.controller
    }

    /// Serve one request. Never fails: every error becomes a response.
    pub async fn handle(&self, request: IncomingRequest) -> Response<Body> {
        let url = request.url.filter(|url| !url.is_empty());
        let (Some(method), Some(url)) = (request.method, url) else {
            tracing::warn!("Rejecting request without method or URL");
            return incomplete_request();
        };

        let id = Uuid::new_v4();
        let span = create_request_span(method.as_str(), &url, &id.to_string());
        let scope = RequestScope {
            id,
            pathname: normalize_pathname(&url),
            method,
            headers: request.headers,
            token: self.controller.begin(id).await,
        };
        self.dispatch(scope).instrument(span).await
    }

    async fn dispatch(&self, scope: RequestScope) -> Response<Body> {
        let guard = InFlightGuard::new(self.controller.clone(), scope.id);

        if let Some(payload) = self.controller.loader_error() {
            guard.finish().await;
            return self.overlay_response(payload.as_ref().clone());
        }

        let resolved = match self.resolve(&scope).await {
            Ok(Some(outcome)) => Ok(Some((outcome, None))),
            Ok(None) => self
                .resolve_not_found(&scope)
                .await
                .map(|outcome| outcome.map(|outcome| (outcome, Some(StatusCode::NOT_FOUND)))),
            Err(e) => Err(e),
        };

        let (route, result) = match resolved {
            Ok(Some((outcome, status))) => {
                let route = outcome.route.clone();
                (Some(route), self.render(&scope, outcome, status, guard).await)
            }
            Ok(None) => {
                guard.finish().await;
                return plain_not_found();
            }
            Err(e) => (None, Err(e)),
        };

        match result {
            Ok(response) => response,
            Err(DispatchError::Cancelled) => {
                tracing::debug!(path = %scope.pathname, "Request cancelled before response");
                cancelled_response()
            }
            Err(e) => {
                let mut payload = ErrorPayload::from_error(e.kind(), &e);
                if let Some(route) = route {
                    payload = payload
                        .with_route(route.route.clone())
                        .with_component(route.component.display().to_string());
                }
                self.overlay_response(payload)
            }
        }
    }

    /// Look up or compute the resolution outcome under the manifest read lock.
    async fn resolve(&self, scope: &RequestScope) -> Result<Option<ResolutionOutcome>, DispatchError> {
        let manifest = self.routes.read().await;
        let key = RouteCacheKey::new(&scope.method, scope.pathname.as_str());

        if let Some(hit) = self.env.route_cache.lookup(&key).await {
            tracing::trace!(route = %hit.route.route, "Route cache hit");
            return Ok(Some(hit));
        }

        let Some((route, params)) = manifest.match_path(&scope.pathname) else {
            return Ok(None);
        };
        if scope.token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let component_url = self
            .env
            .resolver
            .resolve(&route.component.to_string_lossy())
            .await?;
        let outcome = ResolutionOutcome {
            route,
            params,
            component_url,
            generation: manifest.generation(),
        };
        self.env.route_cache.insert(key, outcome.clone()).await;
        tracing::debug!(
            route = %outcome.route.route,
            generation = outcome.generation,
            "Route resolved"
        );
        Ok(Some(outcome))
    }

    /// Resolve the project's custom 404 page, if it has one. Not cached.
    async fn resolve_not_found(
        &self,
        scope: &RequestScope,
    ) -> Result<Option<ResolutionOutcome>, DispatchError> {
        let manifest = self.routes.read().await;
        let Some(route) = manifest.find(NOT_FOUND_ROUTE) else {
            return Ok(None);
        };
        if scope.token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let component_url = self
            .env
            .resolver
            .resolve(&route.component.to_string_lossy())
            .await?;
        Ok(Some(ResolutionOutcome {
            route,
            params: Default::default(),
            component_url,
            generation: manifest.generation(),
        }))
    }

    async fn renderers(&self) -> Result<Arc<Vec<Arc<dyn Renderer>>>, DispatchError> {
        let current = self.env.renderers();
        if !current.is_empty() {
            return Ok(current);
        }

        let _loading = self.renderer_load.lock().await;
        let current = self.env.renderers();
        if !current.is_empty() {
            return Ok(current);
        }
        let loaded = self.loader.load_renderers().await?;
        self.env.set_renderers(loaded);
        Ok(self.env.renderers())
    }

    async fn render(
        &self,
        scope: &RequestScope,
        outcome: ResolutionOutcome,
        status: Option<StatusCode>,
        guard: InFlightGuard,
    ) -> Result<Response<Body>, DispatchError> {
        let component_path = self.loader.root().join(&outcome.route.component);
        self.controller
            .track(scope.id, component_path.clone())
            .await;

        let renderers = self.renderers().await?;
        let renderer = renderers
            .iter()
            .find(|renderer| renderer.supports(&outcome.route))
            .cloned()
            .ok_or_else(|| {
                RenderError::Unsupported(outcome.route.component.display().to_string())
            })?;

        if scope.token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let ctx = RenderContext {
            request_id: scope.id,
            method: scope.method.clone(),
            pathname: scope.pathname.clone(),
            headers: scope.headers.clone(),
            route: outcome.route.clone(),
            params: outcome.params,
            component_path,
            component_url: outcome.component_url,
            site: self.env.site.clone(),
            compress_html: self.env.compress_html,
            ssr: self.env.ssr,
            markdown: self.env.markdown.clone(),
            client_directives: self.env.client_directives.clone(),
            cancellation: scope.token.clone(),
        };
        tracing::debug!(renderer = renderer.name(), route = %outcome.route.route, "Rendering");
        let output = renderer.render(ctx).await.inspect_err(|e| {
            tracing::debug!(route = %outcome.route.route, "Render failed: {}", e);
        })?;

        let body = if self.env.streaming {
            Body::from_stream(cancellable_body(output.chunks, scope.token.clone(), guard))
        } else {
            let bytes = buffer_body(output.chunks, &scope.token).await?;
            guard.finish().await;
            Body::from(bytes)
        };

        let mut response = Response::builder()
            .status(status.unwrap_or(output.status))
            .body(body)?;
        response.headers_mut().extend(output.headers);
        Ok(response)
    }

    fn overlay_response(&self, payload: ErrorPayload) -> Response<Body> {
        let page = self.overlay.present(payload);
        let mut response = Response::new(Body::from(page.body));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(page.content_type),
        );
        response
    }
}

enum Step {
    Chunk(Bytes),
    End,
    Abort(DispatchError),
}

/// Stream the renderer's chunks, stopping as soon as the token fires.
///
/// Ending the stream with an error makes the transport drop the connection,
/// which is how a cancelled response is terminated.
fn cancellable_body(
    chunks: BoxStream<'static, RenderResult<Bytes>>,
    token: CancellationToken,
    guard: InFlightGuard,
) -> impl futures_util::Stream<Item = Result<Bytes, DispatchError>> + Send + 'static {
    stream::unfold(Some((chunks, token, guard)), |state| async move {
        let (mut chunks, token, guard) = state?;
        let step = tokio::select! {
            biased;
            _ = token.cancelled() => Step::Abort(DispatchError::Cancelled),
            chunk = chunks.next() => match chunk {
                Some(Ok(bytes)) => Step::Chunk(bytes),
                Some(Err(e)) => Step::Abort(e.into()),
                None => Step::End,
            },
        };
        match step {
            Step::Chunk(bytes) => Some((Ok(bytes), Some((chunks, token, guard)))),
            Step::End => {
                guard.finish().await;
                None
            }
            Step::Abort(DispatchError::Cancelled) => {
                tracing::debug!(request.id = %guard.id(), "Response stream cancelled");
                Some((Err(DispatchError::Cancelled), None))
            }
            Step::Abort(e) => {
                // headers are already sent, so the overlay cannot be shown
                tracing::error!(request.id = %guard.id(), "Render failed mid-stream: {}", e);
                Some((Err(e), None))
            }
        }
    })
}

async fn buffer_body(
    mut chunks: BoxStream<'static, RenderResult<Bytes>>,
    token: &CancellationToken,
) -> Result<Bytes, DispatchError> {
    let mut buffer = BytesMut::new();
    loop {
        if token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        match chunks.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(buffer.freeze()),
        }
    }
}

fn incomplete_request() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
        .extensions_mut()
        .insert(hyper::ext::ReasonPhrase::from_static(b"Incomplete request"));
    response
}

fn plain_not_found() -> Response<Body> {
    let mut response = Response::new(Body::from("Not Found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn cancelled_response() -> Response<Body> {
    let body = stream::once(async { Err::<Bytes, _>(DispatchError::Cancelled) });
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use tokio::sync::broadcast;

    use super::*;
    use crate::{
        adapters::project_files::InMemoryProjectFiles,
        config::DevServerConfig,
        core::{
            environment::create_development_environment, manifest::RouteDefinition,
            manifest_builder::RouteManifestBuilder,
        },
        ports::{
            error_overlay::OverlayPage,
            module_loader::{LoaderEvent, LoaderResult},
            renderer::RenderOutput,
        },
    };

    struct EchoRenderer;

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
            let chunks = match ctx.route.route.as_str() {
                "/broken" => return Err(RenderError::Failed("component threw".to_string())),
                "/interrupted" => return Err(RenderError::Cancelled),
                "/truncated" => stream::iter(vec![
                    Ok(Bytes::from(body)),
                    Err(RenderError::Failed("template error".to_string())),
                ])
                .boxed(),
                _ => stream::iter(vec![Ok(Bytes::from(body))]).boxed(),
            };
            Ok(RenderOutput {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                chunks,
            })
        }
    }

    struct StubLoader {
        resolves: AtomicUsize,
        events: broadcast::Sender<LoaderEvent>,
    }

    #[async_trait]
    impl ModuleLoader for StubLoader {
        fn root(&self) -> &Path {
            Path::new("/project")
        }

        async fn resolve_id(&self, specifier: &str) -> LoaderResult<Option<PathBuf>> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Path::new("/project").join(specifier)))
        }

        async fn load_renderers(&self) -> LoaderResult<Vec<Arc<dyn Renderer>>> {
            Ok(vec![Arc::new(EchoRenderer)])
        }

        fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
            self.events.subscribe()
        }
    }

    struct TextOverlay;

    impl ErrorOverlay for TextOverlay {
        fn present(&self, payload: ErrorPayload) -> OverlayPage {
            let mut text = format!("{}: {}", payload.name, payload.message);
            if let (Some(route), Some(component)) = (&payload.route, &payload.component) {
                text.push_str(&format!(" ({route} in {component})"));
            }
            OverlayPage {
                content_type: "text/plain",
                body: Bytes::from(text),
            }
        }
    }

    async fn fixture(files: InMemoryProjectFiles) -> (RequestDispatcher, Arc<StubLoader>) {
        let config = DevServerConfig::default();
        let (events, _) = broadcast::channel(4);
        let loader = Arc::new(StubLoader {
            resolves: AtomicUsize::new(0),
            events,
        });
        let env = Arc::new(create_development_environment(&config, loader.clone()));
        let routes = Arc::new(
            RouteTable::load(RouteManifestBuilder::from_config(&config), Arc::new(files))
                .await
                .unwrap(),
        );
        let dispatcher = RequestDispatcher::new(
            env,
            routes,
            Arc::new(RequestController::new()),
            loader.clone(),
            Arc::new(TextOverlay),
        );
        (dispatcher, loader)
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_incomplete_request_is_rejected() {
        let (dispatcher, loader) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("index.html", "")).await;

        for request in [
            IncomingRequest::default(),
            IncomingRequest {
                method: Some(Method::GET),
                url: Some(String::new()),
                ..Default::default()
            },
            IncomingRequest {
                method: None,
                url: Some("/".to_string()),
                ..Default::default()
            },
        ] {
            let response = dispatcher.handle(request).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(response.headers()[header::CONNECTION], "close");
            let reason = response.extensions().get::<hyper::ext::ReasonPhrase>().unwrap();
            assert_eq!(reason.as_bytes(), b"Incomplete request");
            assert!(body_text(response).await.is_empty());
        }
        assert!(dispatcher.env.route_cache.is_empty());
        assert_eq!(loader.resolves.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let (dispatcher, loader) = fixture(
            InMemoryProjectFiles::new("src/pages").with_file("blog/[slug].html", ""),
        )
        .await;

        let response = dispatcher
            .handle(IncomingRequest::new(Method::GET, "/blog/hello?x=1"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"/blog/[slug] {"slug": "hello"}"#);

        dispatcher
            .handle(IncomingRequest::new(Method::GET, "/blog/hello/"))
            .await;
        assert_eq!(loader.resolves.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.env.route_cache.len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_uses_custom_page() {
        let (dispatcher, _) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("about.html", "")).await;
        let response = dispatcher
            .handle(IncomingRequest::new(Method::GET, "/missing"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Not Found");

        let (dispatcher, _) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("404.html", "")).await;
        let response = dispatcher
            .handle(IncomingRequest::new(Method::GET, "/missing"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "/404 {}");
        assert!(dispatcher.env.route_cache.is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_goes_to_overlay() {
        let (dispatcher, _) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("broken.html", "")).await;
        let response = dispatcher
            .handle(IncomingRequest::new(Method::GET, "/broken"))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            body_text(response).await,
            "RenderError: Render error: Render failed: component threw \
             (/broken in src/pages/broken.html)"
        );
    }

    #[tokio::test]
    async fn test_cancelled_render_is_not_reported() {
        let (dispatcher, _) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("interrupted.html", "")).await;
        let response = dispatcher
            .handle(IncomingRequest::new(Method::GET, "/interrupted"))
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert!(response.into_body().collect().await.is_err());
    }

    #[tokio::test]
    async fn test_stream_error_after_headers_aborts_body() {
        let (dispatcher, _) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("truncated.html", "")).await;
        let response = dispatcher
            .handle(IncomingRequest::new(Method::GET, "/truncated"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "/truncated {}");
        assert!(body.frame().await.unwrap().is_err());

        tokio::time::timeout(Duration::from_secs(2), async {
            while dispatcher.controller.in_flight() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_loader_error_short_circuits() {
        let (dispatcher, _) =
            fixture(InMemoryProjectFiles::new("src/pages").with_file("index.html", "")).await;
        dispatcher
            .controller
            .on_loader_event(LoaderEvent::Error(ErrorPayload::new("SyntaxError", "bad")))
            .await;
        let response = dispatcher.handle(IncomingRequest::new(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "SyntaxError: bad");
        assert!(dispatcher.env.route_cache.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_stream_aborts_body() {
        let token = CancellationToken::new();
        let controller = Arc::new(RequestController::new());
        let id = Uuid::new_v4();
        controller.begin(id).await;
        let chunks = stream::iter(vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))])
            .chain(stream::pending())
            .boxed();
        let mut body = Box::pin(cancellable_body(
            chunks,
            token.clone(),
            InFlightGuard::new(controller.clone(), id),
        ));

        assert_eq!(body.next().await.unwrap().unwrap(), "a");
        token.cancel();
        assert!(matches!(body.next().await, Some(Err(DispatchError::Cancelled))));
        assert!(body.next().await.is_none());

        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.in_flight() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
