use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use crate::core::{FileGetStatus, NodeId, PeerRecord, PeerRegistry, Request, Response};
use crate::network::connection::{self, unexpected, ClientSettings};
use crate::storage::{partial_download_name, validate_file_name, FileCatalog};
use crate::utils::{P2PError, Result};

/// Outbound file listing and fetching.
#[derive(Clone)]
pub struct Downloader {
    registry: PeerRegistry,
    catalog: FileCatalog,
    settings: ClientSettings,
}

impl Downloader {
    pub fn new(registry: PeerRegistry, catalog: FileCatalog, settings: ClientSettings) -> Self {
        Self {
            registry,
            catalog,
            settings,
        }
    }

    /// Catalog of one peer, keyed by the identity it reports.
    pub async fn request_file_list(&self, peer: &PeerRecord) -> Result<(NodeId, Vec<String>)> {
        match connection::request(&peer.ip, peer.port, &Request::FileList, self.settings).await? {
            Response::FileListResponse { uid, files } => Ok((uid, files)),
            other => Err(unexpected("FILELISTRESPONSE", &other)),
        }
    }

    /// Files shared by every reachable known peer. Peers that fail are left out.
    pub async fn list_files_on_network(&self) -> HashMap<NodeId, Vec<String>> {
        let mut file_list = HashMap::new();

        for peer in self.registry.snapshot().await {
            match self.request_file_list(&peer).await {
                Ok((uid, files)) => {
                    debug!("{} shares {} files", uid, files.len());
                    file_list.insert(uid, files);
                }
                Err(e) => debug!("Skipping {} in file listing: {}", peer, e),
            }
        }

        file_list
    }

    /// Fetch `filename` from a known peer into the shared directory.
    ///
    /// Nothing is written unless the whole file arrived and decoded.
    pub async fn fetch_file(&self, peer_uid: &NodeId, filename: &str) -> Result<PathBuf> {
        validate_file_name(filename)?;
        let peer = self.registry.get(peer_uid).await?;

        let request = Request::FileGet {
            filename: filename.to_string(),
        };
        let data = match connection::request(&peer.ip, peer.port, &request, self.settings).await? {
            Response::FileGetResponse(FileGetStatus::Found(data)) => data,
            Response::FileGetResponse(FileGetStatus::Missing) => {
                return Err(P2PError::FileNotFound(format!(
                    "{} on peer {}",
                    filename, peer.uid
                )))
            }
            other => return Err(unexpected("FILEGETRESPONSE", &other)),
        };

        let target = self.catalog.path_of(filename).await?;
        write_atomically(&target, &data).await?;
        info!(
            "Received {} ({} bytes) from {}",
            filename,
            data.len(),
            peer
        );

        if let Err(e) = self.catalog.rescan().await {
            warn!("Rescan after download failed: {}", e);
        }
        Ok(target)
    }
}

/// Write to a hidden sibling, then rename over `target`.
async fn write_atomically(target: &Path, data: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| P2PError::InvalidFileName(target.display().to_string()))?;
    let partial = target.with_file_name(partial_download_name(file_name));

    if let Some(parent) = target.parent() {
        async_fs::create_dir_all(parent)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create directory: {}", e)))?;
    }

    async_fs::write(&partial, data)
        .await
        .map_err(|e| P2PError::IoError(format!("Failed to write {:?}: {}", partial, e)))?;

    if let Err(e) = async_fs::rename(&partial, target).await {
        let _ = async_fs::remove_file(&partial).await;
        return Err(P2PError::IoError(format!(
            "Failed to move download into place: {}",
            e
        )));
    }
    Ok(())
}
