use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as async_fs;
use tokio::sync::Mutex;

use crate::utils::{P2PError, Result};

struct CatalogState {
    shared_dir: PathBuf,
    files: Vec<String>,
}

/// Names of the regular files in the shared directory.
///
/// Directory I/O runs without the lock held; only the swap of the cached
/// list is done under it.
#[derive(Clone)]
pub struct FileCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl FileCatalog {
    pub async fn new(shared_dir: PathBuf) -> Result<Self> {
        let catalog = Self {
            state: Arc::new(Mutex::new(CatalogState {
                shared_dir,
                files: Vec::new(),
            })),
        };
        catalog.rescan().await?;
        Ok(catalog)
    }

    /// Re-list the active directory, creating it when absent.
    pub async fn rescan(&self) -> Result<Vec<String>> {
        let shared_dir = self.directory().await;
        let files = Self::scan_dir(&shared_dir).await?;

        let mut state = self.state.lock().await;
        if state.shared_dir != shared_dir {
            // The directory changed while scanning; that change rescans itself.
            debug!("Discarding stale scan of {:?}", shared_dir);
            return Ok(state.files.clone());
        }
        state.files = files.clone();
        Ok(files)
    }

    /// Switch to `path` and rescan it.
    pub async fn set_directory(&self, path: PathBuf) -> Result<Vec<String>> {
        let files = Self::scan_dir(&path).await?;

        let mut state = self.state.lock().await;
        info!("Shared directory set to {:?} ({} files)", path, files.len());
        state.shared_dir = path;
        state.files = files.clone();
        Ok(files)
    }

    pub async fn current(&self) -> Vec<String> {
        self.state.lock().await.files.clone()
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.state.lock().await.files.iter().any(|f| f == filename)
    }

    pub async fn directory(&self) -> PathBuf {
        self.state.lock().await.shared_dir.clone()
    }

    /// Path of `filename` inside the active directory.
    pub async fn path_of(&self, filename: &str) -> Result<PathBuf> {
        validate_file_name(filename)?;
        Ok(self.directory().await.join(filename))
    }

    async fn scan_dir(dir: &Path) -> Result<Vec<String>> {
        async_fs::create_dir_all(dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create directory: {}", e)))?;

        let mut entries = async_fs::read_dir(dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if !is_partial_download(name) => files.push(name.to_string()),
                _ => {}
            }
        }

        files.sort();
        debug!("Scanned {} files in {:?}", files.len(), dir);
        Ok(files)
    }
}

const PARTIAL_SUFFIX: &str = ".part";

/// Name a download is written under until it is complete.
pub fn partial_download_name(filename: &str) -> String {
    format!(".{}{}", filename, PARTIAL_SUFFIX)
}

/// In-flight downloads are never listed or served.
pub fn is_partial_download(name: &str) -> bool {
    name.len() > 1 + PARTIAL_SUFFIX.len()
        && name.starts_with('.')
        && name.ends_with(PARTIAL_SUFFIX)
}

/// A shared file name must name a direct child of the shared directory.
pub fn validate_file_name(filename: &str) -> Result<()> {
    let bad = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0');
    if bad {
        return Err(P2PError::InvalidFileName(filename.to_string()));
    }
    Ok(())
}
