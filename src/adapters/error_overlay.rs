use bytes::Bytes;

use crate::ports::error_overlay::{ErrorOverlay, ErrorPayload, OverlayPage};

/// Overlay that logs each failure and answers with the payload as JSON.
#[derive(Debug, Default)]
pub struct JsonErrorOverlay;

impl JsonErrorOverlay {
    pub fn new() -> Self {
        Self
    }
}

impl ErrorOverlay for JsonErrorOverlay {
    fn present(&self, payload: ErrorPayload) -> OverlayPage {
        tracing::error!(
            error.name = %payload.name,
            route = payload.route.as_deref().unwrap_or("-"),
            component = payload.component.as_deref().unwrap_or("-"),
            causes = ?payload.causes,
            "{}",
            payload.message
        );

        let body = match serde_json::to_vec(&serde_json::json!({ "error": &payload })) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                tracing::warn!("Failed to serialize error payload: {}", e);
                Bytes::from(payload.message.clone())
            }
        };

        OverlayPage {
            content_type: "application/json",
            body,
        }
    }
}
