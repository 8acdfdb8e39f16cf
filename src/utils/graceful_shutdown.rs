use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Why the server is going down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal,
    /// Requested from code, e.g. a fatal background task error
    Requested,
}

/// Fans a single shutdown signal out to the server and its background tasks.
///
/// Every task gets a child of the root token; cancelling the root stops all
/// of them.
pub struct GracefulShutdown {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a manager with a 10 second drain timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
            drain_timeout,
        }
    }

    /// Token for a background task
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|reason| *reason)
    }

    /// Start shutting down. Later calls are ignored.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut current) = self.reason.lock() {
            if current.is_some() {
                tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
                return;
            }
            *current = Some(reason);
        }
        tracing::info!("Shutdown initiated: {:?}", reason);
        self.token.cancel();
    }

    /// Wait for SIGINT / SIGTERM and trigger shutdown.
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                    self.trigger_shutdown(ShutdownReason::Signal);
                }
                Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
            },
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Signal);
            }
            _ = self.token.cancelled() => {}
        }
    }

    /// Resolves once shutdown has been triggered
    pub async fn wait_for_shutdown_signal(&self) {
        self.token.cancelled().await;
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // only Ctrl+C is available here
    std::future::pending::<()>().await;
}
