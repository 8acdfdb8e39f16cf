//! Watch-driven invalidation of the route cache and manifest.
//!
//! Every filesystem event clears the route cache. Structural events (a file
//! was added or removed) also rebuild the manifest, since route topology may
//! have changed; content events leave the manifest alone.
use std::{path::PathBuf, sync::Arc};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{environment::Environment, manifest::ManifestError, route_table::RouteTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Add,
    Unlink,
    Change,
}

impl WatchEventKind {
    /// Add and unlink may change the set of routes
    pub fn is_structural(self) -> bool {
        matches!(self, WatchEventKind::Add | WatchEventKind::Unlink)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::Add,
            path: path.into(),
        }
    }

    pub fn unlink(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::Unlink,
            path: path.into(),
        }
    }

    pub fn change(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::Change,
            path: path.into(),
        }
    }
}

/// Result of applying one event
#[derive(Debug)]
pub enum InvalidationOutcome {
    CacheCleared,
    Rebuilt { generation: u64 },
    /// The previous manifest stays in effect
    RebuildFailed(ManifestError),
}

pub struct InvalidationController {
    env: Arc<Environment>,
    routes: Arc<RouteTable>,
}

impl InvalidationController {
    pub fn new(env: Arc<Environment>, routes: Arc<RouteTable>) -> Self {
        Self { env, routes }
    }

    /// Apply one event. Holds the manifest write lock throughout, so no request
    /// resolves while the cache is being cleared or the manifest rebuilt.
    pub async fn apply(&self, event: &WatchEvent) -> InvalidationOutcome {
        let mut manifest = self.routes.write().await;
        self.env.route_cache.clear_all().await;

        if !event.kind.is_structural() {
            tracing::debug!(path = %event.path.display(), "Content change, route cache cleared");
            return InvalidationOutcome::CacheCleared;
        }

        tracing::debug!(
            kind = ?event.kind,
            path = %event.path.display(),
            "Structural change, rebuilding route manifest"
        );
        let rebuilt = self.routes.rebuild_into(&mut manifest).await;
        match rebuilt {
            Ok(rebuilt) => InvalidationOutcome::Rebuilt {
                generation: rebuilt.generation(),
            },
            Err(e) => {
                tracing::error!(
                    generation = manifest.generation(),
                    "Failed to rebuild route manifest, keeping previous routes: {}",
                    e
                );
                InvalidationOutcome::RebuildFailed(e)
            }
        }
    }

    /// Drain the event queue in arrival order until shutdown or the sender goes away.
    pub async fn run(self, mut events: mpsc::Receiver<WatchEvent>, shutdown: CancellationToken) {
        tracing::info!("Invalidation controller started.");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.apply(&event).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Invalidation controller is shutting down.");
    }
}
