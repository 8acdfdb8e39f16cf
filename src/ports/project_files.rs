use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error type for project file access
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProjectFilesError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for project file access
pub type ProjectFilesResult<T> = Result<T, ProjectFilesError>;

/// ProjectFiles is the read-only view of the project the route manifest is built from
pub trait ProjectFiles: Send + Sync + 'static {
    /// Directory (relative to the project root) the page files live in
    fn pages_dir(&self) -> &Path;

    /// All files below the pages directory, relative to it, using `/` separators
    fn page_files(&self) -> ProjectFilesResult<Vec<PathBuf>>;

    /// Read a page file's source; `path` is relative to the pages directory
    fn read_source(&self, path: &Path) -> ProjectFilesResult<String>;
}
