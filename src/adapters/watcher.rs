use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use eyre::{Result, WrapErr};
use notify::{
    EventKind, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use tokio::sync::mpsc;

use crate::{adapters::fs_loader::FsModuleLoader, core::invalidation::WatchEvent};

/// Map a raw notify event onto add / unlink / change events.
pub fn classify(event: &notify::Event) -> Vec<WatchEvent> {
    let paths = event.paths.iter().cloned();
    match &event.kind {
        EventKind::Create(_) => paths.map(WatchEvent::add).collect(),
        EventKind::Remove(_) => paths.map(WatchEvent::unlink).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(WatchEvent::unlink).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut events = Vec::with_capacity(2);
            let mut paths = paths;
            if let Some(from) = paths.next() {
                events.push(WatchEvent::unlink(from));
            }
            events.extend(paths.map(WatchEvent::add));
            events
        }
        // To, Any and Other renames: the path set changed either way
        EventKind::Modify(ModifyKind::Name(_)) => paths.map(WatchEvent::add).collect(),
        EventKind::Modify(_) | EventKind::Any => paths.map(WatchEvent::change).collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

fn is_ignored(path: &Path, ignore: &[String]) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => ignore.iter().any(|ignored| name == ignored.as_str()),
        _ => false,
    })
}

/// Handle one notify callback on the watcher thread.
fn forward(
    res: notify::Result<notify::Event>,
    events: &mpsc::Sender<WatchEvent>,
    loader: &FsModuleLoader,
    ignore: &[String],
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            // changes may have been missed; nothing loaded so far can be trusted
            tracing::error!("File watch error: {:?}", e);
            loader.full_reload();
            return;
        }
    };

    if event.need_rescan() {
        tracing::warn!("File watcher dropped events, reloading all modules");
        loader.full_reload();
    }
    for watch_event in classify(&event) {
        if is_ignored(&watch_event.path, ignore) {
            continue;
        }
        tracing::debug!(
            kind = ?watch_event.kind,
            path = %watch_event.path.display(),
            "File change detected"
        );
        loader.invalidate(watch_event.path.clone());
        // blocks the notify thread while the queue is full
        if events.blocking_send(watch_event).is_err() {
            tracing::debug!("Invalidation queue closed, dropping file event");
            return;
        }
    }
}

/// Recursive watcher over the project root.
///
/// Classified events are pushed onto the invalidation queue; every touched
/// path is also reported to the module loader so dependent requests stop.
pub struct ProjectWatcher {
    root: PathBuf,
    // dropping the watcher stops it
    _watcher: notify::RecommendedWatcher,
}

impl ProjectWatcher {
    pub fn start(
        root: &Path,
        events: mpsc::Sender<WatchEvent>,
        loader: Arc<FsModuleLoader>,
        ignore: Vec<String>,
    ) -> Result<Self> {
        let root = std::path::absolute(root).wrap_err("Failed to resolve project root")?;

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                forward(res, &events, &loader, &ignore)
            })
            .wrap_err("Failed to create file watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .wrap_err_with(|| format!("Failed to watch {}", root.display()))?;
        tracing::info!(root = %root.display(), "Watching project files");

        Ok(Self {
            root,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
