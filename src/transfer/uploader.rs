use log::{debug, info, warn};
use tokio::fs as async_fs;

use crate::core::{FileGetStatus, Response};
use crate::storage::FileCatalog;

/// Serves FILEGET requests out of the shared directory.
#[derive(Clone)]
pub struct Uploader {
    catalog: FileCatalog,
}

impl Uploader {
    pub fn new(catalog: FileCatalog) -> Self {
        Self { catalog }
    }

    /// Only names present in the current catalog are ever read from disk.
    pub async fn serve(&self, filename: &str) -> Response {
        if !self.catalog.contains(filename).await {
            debug!("FILEGET for unknown file {:?}", filename);
            return Response::FileGetResponse(FileGetStatus::Missing);
        }

        let path = match self.catalog.path_of(filename).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Refusing to serve {:?}: {}", filename, e);
                return Response::FileGetResponse(FileGetStatus::Missing);
            }
        };

        match async_fs::read(&path).await {
            Ok(data) => {
                info!("Serving {} ({} bytes)", filename, data.len());
                Response::FileGetResponse(FileGetStatus::Found(data))
            }
            Err(e) => {
                // Removed since the last rescan.
                warn!("Failed to read {:?}: {}", path, e);
                Response::FileGetResponse(FileGetStatus::Missing)
            }
        }
    }
}
