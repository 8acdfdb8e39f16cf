//! The rendering environment shared by every request of one server generation.
use std::{
    collections::BTreeMap,
    path::{Component, Path},
    sync::Arc,
};

use arc_swap::ArcSwap;
use url::Url;

use crate::{
    config::DevServerConfig,
    core::route_cache::RouteCache,
    ports::{
        module_loader::{LoaderResult, ModuleLoader},
        renderer::Renderer,
    },
};

/// URL prefix for modules that live outside the project root
pub const FS_PREFIX: &str = "/@fs";
/// URL prefix for bare specifiers the loader could not place on disk
pub const ID_PREFIX: &str = "/@id/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    Development,
    Production,
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Development => f.write_str("development"),
            RuntimeMode::Production => f.write_str("production"),
        }
    }
}

/// Turns module specifiers into URLs the browser can fetch, via the loader.
#[derive(Clone)]
pub struct ModuleResolver {
    loader: Arc<dyn ModuleLoader>,
}

impl ModuleResolver {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self { loader }
    }

    pub async fn resolve(&self, specifier: &str) -> LoaderResult<String> {
        let Some(resolved) = self.loader.resolve_id(specifier).await? else {
            return Ok(format!("{ID_PREFIX}{}", specifier.trim_start_matches('/')));
        };

        if !resolved.is_absolute() {
            return Ok(format!("{ID_PREFIX}{}", to_url_path(&resolved)));
        }
        match resolved.strip_prefix(self.loader.root()) {
            Ok(relative) => Ok(format!("/{}", to_url_path(relative))),
            Err(_) => Ok(format!("{FS_PREFIX}/{}", to_url_path(&resolved))),
        }
    }
}

fn to_url_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Immutable (per server generation) bundle of rendering configuration.
///
/// Built once at startup and handed to every component by `Arc`. Only the
/// renderer list changes after construction: it starts empty and is filled
/// the first time a request needs it.
pub struct Environment {
    pub mode: RuntimeMode,
    /// Empty until a deployment adapter is resolved
    pub adapter_name: String,
    pub markdown: Arc<serde_json::Value>,
    pub client_directives: Arc<BTreeMap<String, String>>,
    pub compress_html: bool,
    pub resolver: ModuleResolver,
    pub route_cache: Arc<RouteCache>,
    /// Site origin joined with the base path
    pub site: Option<Url>,
    pub base: String,
    pub ssr: bool,
    pub streaming: bool,
    renderers: ArcSwap<Vec<Arc<dyn Renderer>>>,
}

impl Environment {
    /// Renderers in registration order. Empty until supplied.
    pub fn renderers(&self) -> Arc<Vec<Arc<dyn Renderer>>> {
        self.renderers.load_full()
    }

    pub fn set_renderers(&self, renderers: Vec<Arc<dyn Renderer>>) {
        tracing::debug!(
            renderers = ?renderers.iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
            "Renderers registered"
        );
        self.renderers.store(Arc::new(renderers));
    }
}

/// Create the environment used by the development server.
pub fn create_development_environment(
    config: &DevServerConfig,
    loader: Arc<dyn ModuleLoader>,
) -> Environment {
    let mode = RuntimeMode::Development;
    let site = config.site.as_deref().and_then(|site| {
        match Url::parse(site).and_then(|url| url.join(&config.base)) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("Ignoring invalid site '{}': {}", site, e);
                None
            }
        }
    });

    Environment {
        mode,
        adapter_name: config.adapter.clone().unwrap_or_default(),
        markdown: Arc::new(config.markdown.clone()),
        client_directives: Arc::new(config.client_directives.clone()),
        compress_html: config.compress_html,
        resolver: ModuleResolver::new(loader),
        route_cache: Arc::new(RouteCache::new(mode)),
        site,
        base: config.base.clone(),
        ssr: config.output.is_server_like(),
        streaming: config.streaming,
        renderers: ArcSwap::from_pointee(Vec::new()),
    }
}
