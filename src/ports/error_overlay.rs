use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Raw failure payload forwarded to the overlay.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    /// Short classification, e.g. `RenderError`
    pub name: String,
    pub message: String,
    /// Route string the failing request matched, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Component file involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Error source chain, outermost first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorPayload {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            route: None,
            component: None,
            causes: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Build a payload from any error, walking its `source()` chain.
    pub fn from_error(name: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut payload = Self::new(name, error.to_string());
        let mut source = error.source();
        while let Some(cause) = source {
            payload.causes.push(cause.to_string());
            source = cause.source();
        }
        payload
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

/// A page produced by the overlay for the failing response.
#[derive(Debug, Clone)]
pub struct OverlayPage {
    pub content_type: &'static str,
    pub body: Bytes,
}

/// ErrorOverlay defines the port for presenting request failures.
///
/// The pipeline never formats errors itself; it forwards the payload and
/// sends back whatever page the overlay produced.
pub trait ErrorOverlay: Send + Sync + 'static {
    fn present(&self, payload: ErrorPayload) -> OverlayPage;
}
