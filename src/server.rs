//! Wiring of the dev server: adapters, core components and background tasks.
use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use eyre::{Result, WrapErr};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;

use crate::{
    adapters::{
        FsModuleLoader, FsProjectFiles, JsonErrorOverlay, ProjectWatcher, build_router,
    },
    config::DevServerConfig,
    core::{
        Environment, InvalidationController, RequestController, RequestDispatcher,
        RouteManifestBuilder, RouteTable, create_development_environment,
    },
    ports::module_loader::ModuleLoader,
    tracing_setup::create_task_span,
    utils::GracefulShutdown,
};

/// A fully assembled, not yet listening, dev server.
pub struct DevServer {
    config: Arc<DevServerConfig>,
    env: Arc<Environment>,
    routes: Arc<RouteTable>,
    controller: Arc<RequestController>,
    dispatcher: Arc<RequestDispatcher>,
    loader: Arc<FsModuleLoader>,
}

/// Handles of the tasks that keep the server's state in sync with the disk
pub struct BackgroundTasks {
    _watcher: ProjectWatcher,
    invalidation: JoinHandle<()>,
    loader_follower: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for the tasks to stop after shutdown was triggered.
    pub async fn join(self) {
        for (name, handle) in [
            ("invalidation", self.invalidation),
            ("loader follower", self.loader_follower),
        ] {
            if let Err(e) = handle.await {
                tracing::error!("{} task failed: {}", name, e);
            }
        }
    }
}

impl DevServer {
    /// Build the initial manifest and every component around it.
    pub async fn new(config: DevServerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let loader = Arc::new(FsModuleLoader::new(
            config.root.clone(),
            config.renderers.clone(),
        ));
        let files = Arc::new(FsProjectFiles::new(
            loader.root().to_path_buf(),
            config.pages_dir.clone(),
        ));

        let env = Arc::new(create_development_environment(&config, loader.clone()));
        let routes = Arc::new(
            RouteTable::load(RouteManifestBuilder::from_config(&config), files)
                .await
                .wrap_err("Failed to build the initial route manifest")?,
        );
        let controller = Arc::new(RequestController::new());
        let dispatcher = Arc::new(RequestDispatcher::new(
            env.clone(),
            routes.clone(),
            controller.clone(),
            loader.clone(),
            Arc::new(JsonErrorOverlay::new()),
        ));

        Ok(Self {
            config,
            env,
            routes,
            controller,
            dispatcher,
            loader,
        })
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.config
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn router(&self) -> Router {
        build_router(self.dispatcher.clone(), &self.config.base)
    }

    /// Start the file watcher, the invalidation controller and the loader follower.
    pub fn start_background(&self, shutdown: &GracefulShutdown) -> Result<BackgroundTasks> {
        let (tx, rx) = mpsc::channel(self.config.watch.queue_capacity);

        let watcher = ProjectWatcher::start(
            self.loader.root(),
            tx,
            self.loader.clone(),
            self.config.watch.ignore.clone(),
        )?;

        let invalidation = InvalidationController::new(self.env.clone(), self.routes.clone());
        let invalidation = tokio::spawn(
            invalidation
                .run(rx, shutdown.child_token())
                .instrument(create_task_span("invalidation")),
        );

        let loader_follower = tokio::spawn(
            self.controller
                .clone()
                .watch_loader(self.loader.subscribe(), shutdown.child_token())
                .instrument(create_task_span("loader_follower")),
        );

        Ok(BackgroundTasks {
            _watcher: watcher,
            invalidation,
            loader_follower,
        })
    }

    /// Listen until shutdown is triggered, then drain.
    pub async fn serve(self, shutdown: Arc<GracefulShutdown>) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .wrap_err("Failed to parse listen address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

        let background = self.start_background(&shutdown)?;
        let manifest = self.routes.current().await;
        tracing::info!(
            %addr,
            base = %self.config.base,
            routes = manifest.len(),
            "devroute listening on http://{}{}",
            addr,
            self.config.base
        );

        let app = self.router();
        let signal = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait_for_shutdown_signal().await }
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .wrap_err("Server error")?;

        let in_flight = self.controller.in_flight();
        if in_flight > 0 {
            tracing::info!(in_flight, "Requests still in flight at shutdown");
        }
        if tokio::time::timeout(shutdown.drain_timeout(), background.join())
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not stop within {:?}", shutdown.drain_timeout());
        }
        tracing::info!("devroute stopped");
        Ok(())
    }
}
