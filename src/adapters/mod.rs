pub mod error_overlay;
pub mod fs_loader;
pub mod html_renderer;
pub mod http_server;
pub mod middleware;
pub mod project_files;
pub mod watcher;

/// Re-export commonly used types from adapters
pub use error_overlay::JsonErrorOverlay;
pub use fs_loader::FsModuleLoader;
pub use html_renderer::HtmlRenderer;
pub use http_server::build_router;
pub use project_files::{FsProjectFiles, InMemoryProjectFiles};
pub use watcher::ProjectWatcher;
