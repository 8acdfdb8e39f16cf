//! Configuration data structures for devroute.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! intentionally serde‑friendly and include defaults so that minimal configs remain concise.
//! Builders and enums here are considered part of the public API for embedding.
use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:4321".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_pages_dir() -> PathBuf {
    PathBuf::from("src/pages")
}

fn default_base() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_markdown() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_renderers() -> Vec<String> {
    vec!["html".to_string()]
}

fn default_page_extensions() -> Vec<String> {
    ["astro", "md", "mdx", "html"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_endpoint_extensions() -> Vec<String> {
    vec!["js".to_string(), "ts".to_string()]
}

/// Output mode of the project. Server-like modes render on demand.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Static,
    Server,
    Hybrid,
}

impl OutputMode {
    /// `server` and `hybrid` outputs render requests on the server.
    pub fn is_server_like(self) -> bool {
        matches!(self, OutputMode::Server | OutputMode::Hybrid)
    }
}

/// File watcher settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    /// Capacity of the queue between the watcher thread and the invalidation task
    pub queue_capacity: usize,
    /// Path components that are never reported (e.g. ".git")
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ignore: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
            ],
        }
    }
}

/// Logging settings consumed by [`crate::tracing_setup`]
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of the pretty console format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DevServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Project root; every other path is relative to it
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_pages_dir")]
    pub pages_dir: PathBuf,
    /// Base path the site is mounted under
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub output: OutputMode,
    /// Name of the deployment adapter, if one has been configured
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default = "default_true")]
    pub compress_html: bool,
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Passed through untouched to renderers
    #[serde(default = "default_markdown")]
    pub markdown: serde_json::Value,
    /// Client directive name -> loader entrypoint
    #[serde(default)]
    pub client_directives: BTreeMap<String, String>,
    /// Renderer plugins to enable, in registration order
    #[serde(default = "default_renderers")]
    pub renderers: Vec<String>,
    #[serde(default = "default_page_extensions")]
    pub page_extensions: Vec<String>,
    #[serde(default = "default_endpoint_extensions")]
    pub endpoint_extensions: Vec<String>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DevServerConfig {
    /// Create a new configuration builder
    pub fn builder() -> DevServerConfigBuilder {
        DevServerConfigBuilder::default()
    }

    /// Absolute-or-relative path of the pages directory under the project root.
    pub fn pages_root(&self) -> PathBuf {
        self.root.join(&self.pages_dir)
    }
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            root: default_root(),
            pages_dir: default_pages_dir(),
            base: default_base(),
            site: None,
            output: OutputMode::default(),
            adapter: None,
            compress_html: true,
            streaming: true,
            markdown: default_markdown(),
            client_directives: BTreeMap::new(),
            renderers: default_renderers(),
            page_extensions: default_page_extensions(),
            endpoint_extensions: default_endpoint_extensions(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for DevServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct DevServerConfigBuilder {
    config: DevServerConfig,
}

impl DevServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the project root
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Set the pages directory, relative to the root
    pub fn pages_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pages_dir = dir.into();
        self
    }

    /// Mount the site under a base path
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.config.base = base.into();
        self
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.config.site = Some(site.into());
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.config.output = output;
        self
    }

    pub fn adapter(mut self, name: impl Into<String>) -> Self {
        self.config.adapter = Some(name.into());
        self
    }

    /// Enable or disable streamed responses
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.config.streaming = enabled;
        self
    }

    pub fn compress_html(mut self, enabled: bool) -> Self {
        self.config.compress_html = enabled;
        self
    }

    /// Register a client directive
    pub fn client_directive(mut self, name: impl Into<String>, entrypoint: impl Into<String>) -> Self {
        self.config
            .client_directives
            .insert(name.into(), entrypoint.into());
        self
    }

    /// Replace the renderer list
    pub fn renderers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.renderers = names.into_iter().map(Into::into).collect();
        self
    }

    /// Build the final DevServerConfig
    pub fn build(self) -> DevServerConfig {
        self.config
    }
}
