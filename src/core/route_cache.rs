//! Memoized request → route resolution outcomes.
//!
//! The cache has exactly two mutations: inserting a fresh entry and clearing
//! everything. There is no per-key invalidation; a single changed file cannot
//! be cheaply mapped back to the cached paths it affects, so every watch event
//! drops the whole map.
use std::{collections::BTreeMap, sync::Arc};

use axum::http::Method;
use scc::HashMap;

use crate::core::{environment::RuntimeMode, manifest::RouteDefinition};

/// Method plus normalized pathname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteCacheKey {
    method: Method,
    path: String,
}

impl RouteCacheKey {
    pub fn new(method: &Method, path: impl Into<String>) -> Self {
        Self {
            method: method.clone(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for RouteCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// What a request resolved to. Cloned out of the cache so a request keeps a
/// consistent copy even if the cache is cleared while it renders.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub route: Arc<RouteDefinition>,
    pub params: BTreeMap<String, String>,
    pub component_url: String,
    /// Manifest generation the outcome was computed against
    pub generation: u64,
}

pub struct RouteCache {
    mode: RuntimeMode,
    entries: HashMap<RouteCacheKey, ResolutionOutcome>,
}

impl RouteCache {
    pub fn new(mode: RuntimeMode) -> Self {
        Self {
            mode,
            entries: HashMap::new(),
        }
    }

    /// Return a copy of the cached outcome. Never computes anything.
    pub async fn lookup(&self, key: &RouteCacheKey) -> Option<ResolutionOutcome> {
        self.entries.read_async(key, |_, outcome| outcome.clone()).await
    }

    /// Store an outcome. An existing entry for the key is kept.
    pub async fn insert(&self, key: RouteCacheKey, outcome: ResolutionOutcome) {
        if let Err((key, _)) = self.entries.insert_async(key, outcome).await {
            match self.mode {
                RuntimeMode::Production => {
                    tracing::warn!("Internal warning: route cache entry for {} already set", key)
                }
                RuntimeMode::Development => {
                    tracing::debug!("Route cache entry for {} already set", key)
                }
            }
        }
    }

    /// Drop every entry.
    pub async fn clear_all(&self) {
        let dropped = self.entries.len();
        self.entries.clear_async().await;
        tracing::debug!(mode = %self.mode, dropped, "Route cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
