use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    middleware,
    response::Response,
};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::{create_base_middleware, mount_prefix, request_timing_middleware},
    core::{dispatcher::RequestDispatcher, request::IncomingRequest},
};

/// Build the dev server's router.
///
/// Everything goes to the dispatcher through the fallback; the manifest, not
/// axum, decides what a path means.
pub fn build_router(dispatcher: Arc<RequestDispatcher>, base: &str) -> Router {
    let router = Router::new()
        .fallback(dispatch)
        .with_state(dispatcher)
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(TraceLayer::new_for_http());

    match mount_prefix(base) {
        // added last so it runs first
        Some(prefix) => router.layer(middleware::from_fn(create_base_middleware(prefix))),
        None => router,
    }
}

async fn dispatch(State(dispatcher): State<Arc<RequestDispatcher>>, req: Request) -> Response {
    dispatcher.handle(IncomingRequest::from_http(&req)).await
}
