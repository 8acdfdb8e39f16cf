//! Per-request cancellation bookkeeping.
//!
//! Each accepted request gets a record with its own cancellation token. The
//! controller never decides on its own to cancel: it reacts to the module
//! loader's invalidation signals, cancelling exactly the requests that depend
//! on the invalidated module.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use scc::HashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ports::{error_overlay::ErrorPayload, module_loader::LoaderEvent};

pub type RequestId = Uuid;

/// Record of a request that is still being served.
#[derive(Debug)]
pub struct InFlightRequest {
    pub id: RequestId,
    pub token: CancellationToken,
    pub started_at: Instant,
    /// Modules the response is being built from
    pub modules: Vec<PathBuf>,
}

impl InFlightRequest {
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[derive(Default)]
pub struct RequestController {
    requests: HashMap<RequestId, InFlightRequest>,
    loader_error: ArcSwapOption<ErrorPayload>,
}

impl RequestController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and hand back its token.
    pub async fn begin(&self, id: RequestId) -> CancellationToken {
        let token = CancellationToken::new();
        let record = InFlightRequest {
            id,
            token: token.clone(),
            started_at: Instant::now(),
            modules: Vec::new(),
        };
        if self.requests.insert_async(id, record).await.is_err() {
            tracing::warn!(request.id = %id, "Request id already in flight");
        }
        token
    }

    /// Record that the request depends on `module`.
    pub async fn track(&self, id: RequestId, module: PathBuf) {
        if let Some(mut entry) = self.requests.get_async(&id).await {
            entry.get_mut().modules.push(module);
        }
    }

    /// Cancel one request. Returns false if it is not in flight.
    pub async fn cancel(&self, id: RequestId) -> bool {
        let token = self
            .requests
            .read_async(&id, |_, record| record.token.clone())
            .await;
        match token {
            Some(token) => {
                token.cancel();
                tracing::debug!(request.id = %id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop the record once the response is finished or aborted.
    pub async fn end(&self, id: RequestId) {
        if let Some((_, record)) = self.requests.remove_async(&id).await {
            tracing::trace!(request.id = %id, age = ?record.age(), "Request finished");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    /// Error reported by the loader that has not been superseded by a change yet
    pub fn loader_error(&self) -> Option<Arc<ErrorPayload>> {
        self.loader_error.load_full()
    }

    /// React to one loader signal.
    pub async fn on_loader_event(&self, event: LoaderEvent) {
        match event {
            LoaderEvent::Invalidated { module } => {
                self.loader_error.store(None);
                let cancelled = self.cancel_dependents(&module).await;
                if cancelled > 0 {
                    tracing::debug!(
                        module = %module.display(),
                        cancelled,
                        "Cancelled requests depending on invalidated module"
                    );
                }
            }
            LoaderEvent::FullReload => {
                self.loader_error.store(None);
                let cancelled = self.cancel_all().await;
                tracing::debug!(cancelled, "Full reload, cancelled in-flight requests");
            }
            LoaderEvent::Error(payload) => {
                tracing::warn!(error = %payload.message, "Module loader reported an error");
                self.loader_error.store(Some(Arc::new(payload)));
            }
        }
    }

    /// Follow the loader's signals until shutdown or the loader goes away.
    pub async fn watch_loader(
        self: Arc<Self>,
        mut events: broadcast::Receiver<LoaderEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.on_loader_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // we cannot know which modules were missed
                        tracing::warn!(skipped, "Loader events lagged, cancelling all requests");
                        self.cancel_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Loader watch task is shutting down.");
    }

    async fn cancel_dependents(&self, module: &Path) -> usize {
        let mut cancelled = 0;
        let cancelled_ref = &mut cancelled;
        self.requests
            .retain_async(|_, record| {
                if record.modules.iter().any(|m| m == module) {
                    record.token.cancel();
                    *cancelled_ref += 1;
                }
                true
            })
            .await;
        cancelled
    }

    async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        let cancelled_ref = &mut cancelled;
        self.requests
            .retain_async(|_, record| {
                record.token.cancel();
                *cancelled_ref += 1;
                true
            })
            .await;
        cancelled
    }
}

/// Ends the in-flight record when dropped.
///
/// Moved into the response body for streamed responses, so the record lives
/// exactly as long as the body is being produced.
pub struct InFlightGuard {
    controller: Arc<RequestController>,
    id: RequestId,
    finished: bool,
}

impl InFlightGuard {
    pub fn new(controller: Arc<RequestController>, id: RequestId) -> Self {
        Self {
            controller,
            id,
            finished: false,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// End the record now instead of on drop.
    pub async fn finish(mut self) {
        self.finished = true;
        self.controller.end(self.id).await;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let controller = self.controller.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { controller.end(id).await });
        }
    }
}
