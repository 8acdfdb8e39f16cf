//! Axum middleware wrapped around the dispatcher.
//!
//! The base-path layer must be the outermost one so every other layer and the
//! dispatcher only ever see base-relative paths. Layers added with
//! `Router::layer` run after routing, which is why the dispatcher is mounted
//! as the router's fallback rather than on concrete routes.
use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::Request,
    http::{
        HeaderValue, StatusCode, Uri, header,
        uri::PathAndQuery,
    },
    middleware::Next,
    response::Response,
};

/// Normalize a configured base to `/segment[/segment]` form, `None` for the root.
pub fn mount_prefix(base: &str) -> Option<Arc<str>> {
    let trimmed = base.trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(Arc::from(trimmed))
    }
}

/// Strip the base prefix from the path before the request goes further.
///
/// `{base}` itself becomes `/`. The site root and `/index.html` get a page
/// pointing at the base; anything else outside the base is a 404.
pub async fn base_middleware(mut req: Request, next: Next, base: Arc<str>) -> Response {
    let path = req.uri().path();
    let rest = if path == &*base {
        Some("/")
    } else {
        path.strip_prefix(&*base).filter(|rest| rest.starts_with('/'))
    };

    let Some(rest) = rest else {
        return outside_base(path, &base);
    };

    let rewritten = match req.uri().query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    };
    match replace_path(req.uri(), &rewritten) {
        Ok(uri) => *req.uri_mut() = uri,
        Err(e) => {
            tracing::warn!("Failed to strip base from {}: {}", req.uri(), e);
            return status_page(StatusCode::BAD_REQUEST, "text/plain; charset=utf-8", "Bad Request");
        }
    }

    let mut response = next.run(req).await;
    prefix_location(&mut response, &base);
    response
}

/// Create a cloneable closure wrapping [`base_middleware`].
pub fn create_base_middleware(
    base: Arc<str>,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
+ Clone {
    move |req, next| {
        let base = base.clone();
        Box::pin(async move { base_middleware(req, next, base).await })
    }
}

fn replace_path(uri: &Uri, path_and_query: &str) -> Result<Uri, axum::http::Error> {
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
    Ok(Uri::from_parts(parts)?)
}

fn prefix_location(response: &mut Response, base: &str) {
    let Some(location) = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
    else {
        return;
    };
    // leave absolute and protocol-relative URLs alone
    if !location.starts_with('/') || location.starts_with("//") {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{base}{location}")) {
        response.headers_mut().insert(header::LOCATION, value);
    }
}

fn outside_base(path: &str, base: &str) -> Response {
    if path == "/" || path == "/index.html" {
        let html = format!(
            "<!DOCTYPE html><html><head><title>Not Found</title></head><body>\
             <h1>404: Not Found</h1>\
             <p>This server is configured with a base path. \
             Visit <a href=\"{base}/\">{base}/</a> instead.</p></body></html>"
        );
        return status_page(StatusCode::NOT_FOUND, "text/html; charset=utf-8", html);
    }
    tracing::debug!(path, base, "Request outside of base path");
    status_page(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")
}

fn status_page(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Log start/end of a request including latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    tracing::debug!("Started processing {} {}", method, uri);

    let response = next.run(req).await;
    let duration = start.elapsed();

    tracing::info!(
        "Completed {} {} - {} in {:?}",
        method,
        uri,
        response.status(),
        duration
    );

    response
}
