use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    adapters::html_renderer::HtmlRenderer,
    ports::{
        error_overlay::ErrorPayload,
        module_loader::{LoaderError, LoaderEvent, LoaderResult, ModuleLoader},
        renderer::Renderer,
    },
};

const EVENT_CAPACITY: usize = 64;

/// Module loader backed by the project directory.
///
/// Resolves specifiers to files under the root and fans out invalidation
/// signals fed to it by the file watcher.
pub struct FsModuleLoader {
    root: PathBuf,
    renderer_names: Vec<String>,
    events: broadcast::Sender<LoaderEvent>,
}

impl FsModuleLoader {
    pub fn new(root: impl Into<PathBuf>, renderer_names: Vec<String>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root,
            renderer_names,
            events,
        }
    }

    /// Signal that `module` changed on disk.
    pub fn invalidate(&self, module: impl Into<PathBuf>) {
        // no subscribers just means nothing is in flight
        let _ = self.events.send(LoaderEvent::Invalidated {
            module: module.into(),
        });
    }

    /// Signal that every module handed out so far is stale.
    pub fn full_reload(&self) {
        let _ = self.events.send(LoaderEvent::FullReload);
    }

    /// Record a loader failure; requests see it until the next invalidation.
    pub fn report_error(&self, payload: ErrorPayload) {
        let _ = self.events.send(LoaderEvent::Error(payload));
    }

    fn fail(&self, error: LoaderError, module: &str) -> LoaderError {
        tracing::warn!(module, "Module loader error: {}", error);
        self.report_error(ErrorPayload::from_error("LoaderError", &error).with_component(module));
        error
    }

    fn renderer_for(&self, name: &str) -> LoaderResult<Arc<dyn Renderer>> {
        match name {
            "html" => Ok(Arc::new(HtmlRenderer::new())),
            other => Err(LoaderError::UnknownRenderer(other.to_string())),
        }
    }
}

#[async_trait]
impl ModuleLoader for FsModuleLoader {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve_id(&self, specifier: &str) -> LoaderResult<Option<PathBuf>> {
        if specifier.is_empty() {
            return Err(LoaderError::Unresolved(specifier.to_string()));
        }

        let candidate = Path::new(specifier);
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| self.fail(e.into(), specifier))?;
        if exists {
            Ok(Some(path))
        } else {
            tracing::trace!(specifier, "Specifier does not name a file on disk");
            Ok(None)
        }
    }

    async fn load_renderers(&self) -> LoaderResult<Vec<Arc<dyn Renderer>>> {
        self.renderer_names
            .iter()
            .map(|name| self.renderer_for(name).map_err(|e| self.fail(e, name)))
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_id_on_disk() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("src/pages"))?;
        std::fs::write(dir.path().join("src/pages/index.html"), "<p>hi</p>")?;
        let loader = FsModuleLoader::new(dir.path(), vec!["html".to_string()]);

        assert_eq!(
            loader.resolve_id("src/pages/index.html").await?,
            Some(dir.path().join("src/pages/index.html"))
        );
        assert_eq!(loader.resolve_id("src/pages/missing.html").await?, None);
        assert!(loader.resolve_id("").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_renderers() {
        let loader = FsModuleLoader::new("/project", vec!["html".to_string()]);
        let renderers = loader.load_renderers().await.unwrap();
        assert_eq!(renderers.len(), 1);
        assert_eq!(renderers[0].name(), "html");

        let loader = FsModuleLoader::new("/project", vec!["vue".to_string()]);
        let mut events = loader.subscribe();
        assert!(matches!(
            loader.load_renderers().await,
            Err(LoaderError::UnknownRenderer(name)) if name == "vue"
        ));
        match events.recv().await.unwrap() {
            LoaderEvent::Error(payload) => {
                assert_eq!(payload.name, "LoaderError");
                assert_eq!(payload.message, "Unknown renderer 'vue'");
                assert_eq!(payload.component.as_deref(), Some("vue"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalidation_reaches_subscribers() {
        let loader = FsModuleLoader::new("/project", Vec::new());
        let mut events = loader.subscribe();
        loader.invalidate("/project/src/pages/a.html");
        loader.full_reload();

        assert!(matches!(
            events.recv().await.unwrap(),
            LoaderEvent::Invalidated { module } if module == Path::new("/project/src/pages/a.html")
        ));
        assert!(matches!(events.recv().await.unwrap(), LoaderEvent::FullReload));
    }
}
