pub mod dispatcher;
pub mod environment;
pub mod invalidation;
pub mod manifest;
pub mod manifest_builder;
pub mod request;
pub mod request_controller;
pub mod route_cache;
pub mod route_table;

pub use dispatcher::RequestDispatcher;
pub use environment::{Environment, create_development_environment};
pub use invalidation::{InvalidationController, WatchEvent, WatchEventKind};
pub use manifest::{RouteDefinition, RouteManifest};
pub use manifest_builder::RouteManifestBuilder;
pub use request_controller::RequestController;
pub use route_cache::RouteCache;
pub use route_table::RouteTable;
