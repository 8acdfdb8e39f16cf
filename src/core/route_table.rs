//! Holder of the live route manifest.
//!
//! Requests take the read lock for the whole lookup → match → insert step;
//! cache clears and rebuilds take the write lock. tokio's `RwLock` is fair,
//! so once an invalidation is waiting no new request can start resolving
//! against the old state.
use std::{sync::Arc, time::Instant};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    core::{
        manifest::{ManifestError, RouteManifest},
        manifest_builder::RouteManifestBuilder,
    },
    ports::project_files::ProjectFiles,
};

/// Generation number of the manifest built at startup
pub const INITIAL_GENERATION: u64 = 1;

pub struct RouteTable {
    manifest: RwLock<Arc<RouteManifest>>,
    builder: RouteManifestBuilder,
    files: Arc<dyn ProjectFiles>,
}

impl RouteTable {
    /// Build the initial manifest. Fails if the project's routes are malformed.
    pub async fn load(
        builder: RouteManifestBuilder,
        files: Arc<dyn ProjectFiles>,
    ) -> Result<Self, ManifestError> {
        let manifest = build_blocking(builder.clone(), files.clone(), INITIAL_GENERATION).await?;
        tracing::info!(
            generation = manifest.generation(),
            routes = manifest.len(),
            "Route manifest created"
        );
        Ok(Self {
            manifest: RwLock::new(Arc::new(manifest)),
            builder,
            files,
        })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Arc<RouteManifest>> {
        self.manifest.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Arc<RouteManifest>> {
        self.manifest.write().await
    }

    /// Snapshot of the current manifest
    pub async fn current(&self) -> Arc<RouteManifest> {
        self.manifest.read().await.clone()
    }

    /// Rebuild into a slot the caller already holds exclusively.
    ///
    /// On failure the slot keeps the previous generation.
    pub async fn rebuild_into(
        &self,
        slot: &mut Arc<RouteManifest>,
    ) -> Result<Arc<RouteManifest>, ManifestError> {
        let started = Instant::now();
        let next_generation = slot.generation() + 1;
        let manifest = Arc::new(
            build_blocking(self.builder.clone(), self.files.clone(), next_generation).await?,
        );
        *slot = manifest.clone();
        tracing::info!(
            generation = manifest.generation(),
            routes = manifest.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Route manifest rebuilt"
        );
        Ok(manifest)
    }
}

async fn build_blocking(
    builder: RouteManifestBuilder,
    files: Arc<dyn ProjectFiles>,
    generation: u64,
) -> Result<RouteManifest, ManifestError> {
    tokio::task::spawn_blocking(move || builder.build(files.as_ref(), generation))
        .await
        .map_err(|e| ManifestError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapters::project_files::InMemoryProjectFiles, config::DevServerConfig};

    #[tokio::test]
    async fn test_rebuild_bumps_generation_and_keeps_old_on_failure() {
        let files = Arc::new(InMemoryProjectFiles::new("src/pages").with_file("a.html", ""));
        let table = RouteTable::load(
            RouteManifestBuilder::from_config(&DevServerConfig::default()),
            files.clone(),
        )
        .await
        .unwrap();
        assert_eq!(table.current().await.generation(), INITIAL_GENERATION);

        files.insert("b.html", "");
        {
            let mut slot = table.write().await;
            let rebuilt = table.rebuild_into(&mut slot).await.unwrap();
            assert_eq!(rebuilt.generation(), 2);
            assert_eq!(rebuilt.len(), 2);
        }

        files.insert("[broken.html", "");
        {
            let mut slot = table.write().await;
            assert!(table.rebuild_into(&mut slot).await.is_err());
        }
        let current = table.current().await;
        assert_eq!(current.generation(), 2);
        assert!(current.find("/b").is_some());
    }

    #[tokio::test]
    async fn test_load_fails_on_malformed_routes() {
        let files = Arc::new(InMemoryProjectFiles::new("src/pages").with_file("[].html", ""));
        let result = RouteTable::load(
            RouteManifestBuilder::from_config(&DevServerConfig::default()),
            files,
        )
        .await;
        assert!(matches!(result, Err(ManifestError::InvalidRouteFile { .. })));
    }
}
