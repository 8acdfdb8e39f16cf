pub mod error_overlay;
pub mod module_loader;
pub mod project_files;
pub mod renderer;
