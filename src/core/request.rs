use http::{HeaderMap, Method, Request};

/// A request as handed over by the transport.
///
/// Method and URL are optional because a transport may deliver a request it
/// could not fully parse; the dispatcher rejects those itself.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    pub method: Option<Method>,
    pub url: Option<String>,
    pub headers: HeaderMap,
}

impl IncomingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            url: Some(url.into()),
            headers: HeaderMap::new(),
        }
    }

    pub fn from_http<B>(request: &Request<B>) -> Self {
        let uri = request.uri();
        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
        Self {
            method: Some(request.method().clone()),
            url: Some(url),
            headers: request.headers().clone(),
        }
    }
}

/// Reduce a request URL to the pathname used for matching and cache keys.
///
/// Drops query and fragment, percent-decodes, and removes trailing slashes
/// (except for the root).
pub fn normalize_pathname(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let raw = &url[..end];
    let decoded = match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    };

    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
