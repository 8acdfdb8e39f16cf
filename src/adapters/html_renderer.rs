use std::sync::LazyLock;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use regex::Regex;

use crate::{
    core::manifest::RouteDefinition,
    ports::renderer::{RenderContext, RenderError, RenderOutput, RenderResult, Renderer},
};

/// Size of the chunks handed to the response stream
pub const CHUNK_SIZE: usize = 16 * 1024;

static INTER_TAG_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("invalid whitespace regex"));

/// Serves `.html` page components as they are on disk.
#[derive(Debug, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for HtmlRenderer {
    fn name(&self) -> &str {
        "html"
    }

    fn client_entrypoint(&self) -> Option<&str> {
        None
    }

    fn server_entrypoint(&self) -> &str {
        "devroute/renderers/html"
    }

    fn supports(&self, route: &RouteDefinition) -> bool {
        route
            .component
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
    }

    async fn render(&self, ctx: RenderContext) -> RenderResult<RenderOutput> {
        if ctx.cancellation.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let source = tokio::fs::read_to_string(&ctx.component_path).await?;
        let html = if ctx.compress_html {
            INTER_TAG_WHITESPACE.replace_all(source.trim(), "><").into_owned()
        } else {
            source
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );

        let body = Bytes::from(html);
        let chunks: Vec<RenderResult<Bytes>> = (0..body.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(body.slice(start..(start + CHUNK_SIZE).min(body.len()))))
            .collect();

        Ok(RenderOutput {
            status: StatusCode::OK,
            headers,
            chunks: stream::iter(chunks).boxed(),
        })
    }
}
