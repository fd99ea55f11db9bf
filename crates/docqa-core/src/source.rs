//! Plain-text document source backed by the local filesystem.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::traits::DocumentSource;

/// Reads `.txt` files, falling back to lossy UTF-8 for invalid bytes.
/// Relative locations resolve against `base_dir`.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    base_dir: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self { Self::default() }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: Some(base_dir.into()) }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => crate::config::resolve_with_base(base, location),
            None => crate::config::expand_path(location),
        }
    }

    /// Every `.txt` file under `root`, sorted by path.
    pub fn list_txt_files(root: &Path) -> Vec<PathBuf> {
        let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
            .map(|e| e.path().to_path_buf())
            .collect();
        txt_files.sort();
        txt_files
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    async fn fetch(&self, location: &str) -> Result<String> {
        let path = self.resolve(location);
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Upstream(format!("reading {}: {e}", path.display())),
        })?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        }
    }
}
