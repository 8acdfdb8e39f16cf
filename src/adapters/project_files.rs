use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    sync::RwLock,
};

use crate::ports::project_files::{ProjectFiles, ProjectFilesError, ProjectFilesResult};

/// Project files read straight from disk
#[derive(Debug, Clone)]
pub struct FsProjectFiles {
    root: PathBuf,
    pages_dir: PathBuf,
}

impl FsProjectFiles {
    pub fn new(root: impl Into<PathBuf>, pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pages_dir: pages_dir.into(),
        }
    }

    fn pages_root(&self) -> PathBuf {
        self.root.join(&self.pages_dir)
    }

    fn collect(dir: &Path, prefix: &Path, out: &mut Vec<PathBuf>) -> ProjectFilesResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let relative = prefix.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::collect(&entry.path(), &relative, out)?;
            } else if file_type.is_file() {
                out.push(relative);
            }
        }
        Ok(())
    }
}

impl ProjectFiles for FsProjectFiles {
    fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    fn page_files(&self) -> ProjectFilesResult<Vec<PathBuf>> {
        let pages_root = self.pages_root();
        let mut files = Vec::new();
        match Self::collect(&pages_root, Path::new(""), &mut files) {
            Ok(()) => Ok(files),
            // a project without a pages directory simply has no routes
            Err(ProjectFilesError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %pages_root.display(), "Pages directory does not exist");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn read_source(&self, path: &Path) -> ProjectFilesResult<String> {
        // Security check: prevent path traversal
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ProjectFilesError::InvalidPath(path.display().to_string()));
        }
        Ok(std::fs::read_to_string(self.pages_root().join(path))?)
    }
}

/// Project files held in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryProjectFiles {
    pages_dir: PathBuf,
    files: RwLock<BTreeMap<PathBuf, String>>,
}

impl InMemoryProjectFiles {
    pub fn new(pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builder-style insert
    pub fn with_file(self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, source: impl Into<String>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), source.into());
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.files
            .write()
            .map(|mut files| files.remove(path.as_ref()).is_some())
            .unwrap_or(false)
    }
}

impl ProjectFiles for InMemoryProjectFiles {
    fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    fn page_files(&self) -> ProjectFilesResult<Vec<PathBuf>> {
        let files = self
            .files
            .read()
            .map_err(|_| ProjectFilesError::InvalidPath("file table poisoned".to_string()))?;
        Ok(files.keys().cloned().collect())
    }

    fn read_source(&self, path: &Path) -> ProjectFilesResult<String> {
        let files = self
            .files
            .read()
            .map_err(|_| ProjectFilesError::InvalidPath("file table poisoned".to_string()))?;
        files.get(path).cloned().ok_or_else(|| {
            ProjectFilesError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }
}
