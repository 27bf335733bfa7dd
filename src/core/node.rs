use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::maintenance::{sweep_peers, MaintenanceScheduler, SweepReport};
use crate::core::{Config, NodeId, PeerRecord, PeerRegistry};
use crate::network::{AddressValidator, ClientSettings, Discovery, Listener, MessageHandler};
use crate::storage::FileCatalog;
use crate::transfer::Downloader;
use crate::utils::{NodeUtils, P2PError, Result};

/// A peer node: listener, maintenance loops, and the client operations a
/// front end drives.
pub struct Node {
    id: NodeId,
    config: Config,
    registry: PeerRegistry,
    catalog: FileCatalog,
    validator: AddressValidator,
    downloader: Downloader,
    discovery: Option<Discovery>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let id = match &config.node_id {
            Some(raw) => NodeId::parse(raw)?,
            None => NodeId::generate(),
        };
        let registry = PeerRegistry::new(id.clone());
        let catalog = FileCatalog::new(config.shared_dir.clone()).await?;
        let validator = AddressValidator::new(config.probe_timeout(), config.max_message_size);
        let downloader = Downloader::new(
            registry.clone(),
            catalog.clone(),
            ClientSettings::from_config(&config),
        );

        info!("Node {} sharing {:?}", id, config.shared_dir);

        Ok(Self {
            id,
            config,
            registry,
            catalog,
            validator,
            downloader,
            discovery: None,
            local_addr: None,
            shutdown_tx: None,
            tasks: Vec::new(),
        })
    }

    /// Bind the listener, verify the node can reach itself, then start the
    /// maintenance loops. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(P2PError::AlreadyRunning);
        }

        let bind_addr = NodeUtils::resolve_bind_addr(&self.config.host, self.config.port).await?;

        let handler = MessageHandler::new(
            self.registry.clone(),
            self.catalog.clone(),
            self.validator,
        );
        let listener = Listener::bind(
            bind_addr,
            handler,
            self.config.request_timeout(),
            self.config.max_message_size,
        )?;
        let local_addr = listener.local_addr();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener_task = listener.spawn(shutdown_rx.clone());

        let probe_addr = NodeUtils::reachable_address(local_addr);
        if let Err(e) = self
            .validator
            .probe(&probe_addr.ip().to_string(), probe_addr.port())
            .await
        {
            let _ = shutdown_tx.send(true);
            let _ = listener_task.await;
            return Err(P2PError::NetworkError(format!(
                "Could not validate own address {}: {}",
                local_addr, e
            )));
        }

        let scheduler = MaintenanceScheduler::new(shutdown_rx);
        self.tasks = vec![
            listener_task,
            scheduler.spawn_peer_sweep(
                self.registry.clone(),
                self.validator,
                self.config.peer_update_interval(),
            ),
            scheduler.spawn_catalog_refresh(
                self.catalog.clone(),
                self.config.file_update_interval(),
            ),
        ];

        self.discovery = Some(Discovery::new(
            self.registry.clone(),
            local_addr.port(),
            ClientSettings::from_config(&self.config),
        ));
        self.local_addr = Some(local_addr);
        self.shutdown_tx = Some(shutdown_tx);

        info!("Node {} running on {}", self.id, local_addr);
        Ok(local_addr)
    }

    /// Stop the listener and maintenance loops and wait for them to exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        if let Some(addr) = self.local_addr.take() {
            info!("Node {} on {} stopped", self.id, addr);
        }
        self.discovery = None;
        Ok(())
    }

    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received, shutting down");
        self.shutdown().await
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Change where the listener will bind. Only allowed before `start`.
    pub fn set_network_address(&mut self, host: impl Into<String>, port: u16) -> Result<()> {
        if self.is_running() {
            return Err(P2PError::AlreadyRunning);
        }
        self.config.host = host.into();
        self.config.port = port;
        Ok(())
    }

    pub async fn add_known_peer(&self, record: PeerRecord) -> Result<()> {
        self.registry.add(record).await
    }

    pub async fn remove_known_peer(&self, uid: &NodeId) -> Result<PeerRecord> {
        self.registry.remove(uid).await
    }

    pub async fn get_known_peer(&self, uid: &NodeId) -> Result<PeerRecord> {
        self.registry.get(uid).await
    }

    pub async fn known_peers(&self) -> Vec<PeerRecord> {
        self.registry.snapshot().await
    }

    pub async fn peer_count(&self) -> usize {
        self.registry.len().await
    }

    /// Admission handshake with `host:port`; on ACK both sides know each other.
    pub async fn manual_peer_add(&self, host: &str, port: u16) -> Result<PeerRecord> {
        self.discovery
            .as_ref()
            .ok_or(P2PError::NotRunning)?
            .manual_peer_add(host, port)
            .await
    }

    /// One gossip round. Returns the number of newly admitted peers.
    pub async fn broadcast_discovery(&self) -> usize {
        match &self.discovery {
            Some(discovery) => discovery.broadcast_discovery().await,
            None => {
                warn!("Discovery skipped: node is not running");
                0
            }
        }
    }

    pub async fn list_files_on_network(&self) -> HashMap<NodeId, Vec<String>> {
        self.downloader.list_files_on_network().await
    }

    pub async fn fetch_file(&self, peer_uid: &NodeId, filename: &str) -> Result<PathBuf> {
        self.downloader.fetch_file(peer_uid, filename).await
    }

    /// Run one liveness sweep now.
    pub async fn update_peer_list(&self) -> SweepReport {
        sweep_peers(&self.registry, self.validator).await
    }

    pub async fn update_file_list(&self) -> Result<Vec<String>> {
        self.catalog.rescan().await
    }

    pub async fn set_file_directory(&self, path: PathBuf) -> Result<Vec<String>> {
        self.catalog.set_directory(path).await
    }

    pub async fn files(&self) -> Vec<String> {
        self.catalog.current().await
    }

    pub async fn file_directory(&self) -> PathBuf {
        self.catalog.directory().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Request, Response};
    use crate::network::connection;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_node(id: &str) -> (Node, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            shared_dir: dir.path().to_path_buf(),
            node_id: Some(id.to_string()),
            probe_timeout_ms: 500,
            request_timeout_ms: 3_000,
            // Sweeps are driven explicitly by the tests.
            peer_update_interval_ms: 60_000,
            ..Config::default()
        };
        let mut node = Node::new(config).await.unwrap();
        node.start().await.unwrap();
        (node, dir)
    }

    fn id(raw: &str) -> NodeId {
        NodeId::parse(raw).unwrap()
    }

    fn port(node: &Node) -> u16 {
        node.local_addr().unwrap().port()
    }

    fn dir_entries(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_manual_peer_add_registers_both_sides() {
        let (mut a, _da) = test_node("AAAAAAAA").await;
        let (mut b, _db) = test_node("BBBBBBBB").await;

        let record = b.manual_peer_add("127.0.0.1", port(&a)).await.unwrap();
        assert_eq!(record.uid, id("AAAAAAAA"));
        assert_eq!(record.port, port(&a));

        assert!(a.get_known_peer(&id("BBBBBBBB")).await.is_ok());
        assert_eq!(a.get_known_peer(&id("BBBBBBBB")).await.unwrap().port, port(&b));
        assert!(b.get_known_peer(&id("AAAAAAAA")).await.is_ok());

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_peer_add_to_closed_port_is_unreachable() {
        let (a, _da) = test_node("AAAAAAAA").await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = listener.local_addr().unwrap().port();
        drop(listener);

        let err = a.manual_peer_add("127.0.0.1", closed).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(a.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_admission_requires_reachable_claimed_port() {
        let (b, _db) = test_node("BBBBBBBB").await;
        let (c, _dc) = test_node("CCCCCCCC").await;
        let settings = ClientSettings::probe(Duration::from_secs(3), 1 << 20);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = listener.local_addr().unwrap().port();
        drop(listener);

        let refused = Request::AddMe {
            uid: id("DDDDDDDD"),
            port: closed,
        };
        let response = connection::request("127.0.0.1", port(&b), &refused, settings)
            .await
            .unwrap();
        assert_eq!(response, Response::Nack);
        assert!(b.get_known_peer(&id("DDDDDDDD")).await.is_err());

        // C's listener answers the connect-back probe on the claimed port.
        let accepted = Request::AddMe {
            uid: id("DDDDDDDD"),
            port: port(&c),
        };
        let response = connection::request("127.0.0.1", port(&b), &accepted, settings)
            .await
            .unwrap();
        assert_eq!(response, Response::Ack { uid: id("BBBBBBBB") });
        assert!(b.get_known_peer(&id("DDDDDDDD")).await.is_ok());
    }

    #[tokio::test]
    async fn test_discovery_learns_peers_of_peers() {
        let (a, _da) = test_node("AAAAAAAA").await;
        let (b, _db) = test_node("BBBBBBBB").await;
        let (c, _dc) = test_node("CCCCCCCC").await;

        b.manual_peer_add("127.0.0.1", port(&c)).await.unwrap();
        a.manual_peer_add("127.0.0.1", port(&b)).await.unwrap();
        assert!(a.get_known_peer(&id("CCCCCCCC")).await.is_err());

        let admitted = a.broadcast_discovery().await;

        assert_eq!(admitted, 1);
        let learned = a.get_known_peer(&id("CCCCCCCC")).await.unwrap();
        assert_eq!(learned.port, port(&c));
        assert!(c.get_known_peer(&id("AAAAAAAA")).await.is_ok());
        assert!(a.get_known_peer(&id("AAAAAAAA")).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_file_is_byte_identical() {
        let (a, dir_a) = test_node("AAAAAAAA").await;
        let (b, dir_b) = test_node("BBBBBBBB").await;

        // Exact multiple of the old 1024-byte read buffer.
        let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(dir_b.path().join("data.bin"), &content).unwrap();
        b.update_file_list().await.unwrap();

        a.manual_peer_add("127.0.0.1", port(&b)).await.unwrap();
        let path = a.fetch_file(&id("BBBBBBBB"), "data.bin").await.unwrap();

        assert_eq!(path, dir_a.path().join("data.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), content);
        assert!(a.files().await.contains(&"data.bin".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_missing_file_leaves_directory_untouched() {
        let (a, dir_a) = test_node("AAAAAAAA").await;
        let (b, _db) = test_node("BBBBBBBB").await;
        a.manual_peer_add("127.0.0.1", port(&b)).await.unwrap();

        let before = dir_entries(dir_a.path());
        let err = a
            .fetch_file(&id("BBBBBBBB"), "missing.txt")
            .await
            .unwrap_err();

        assert!(matches!(err, P2PError::FileNotFound(_)));
        assert!(err.is_not_found() && !err.is_unreachable());
        assert_eq!(dir_entries(dir_a.path()), before);
    }

    #[tokio::test]
    async fn test_list_files_on_network() {
        let (a, _da) = test_node("AAAAAAAA").await;
        let (b, dir_b) = test_node("BBBBBBBB").await;
        std::fs::write(dir_b.path().join("shared.txt"), b"hi").unwrap();
        b.update_file_list().await.unwrap();

        a.manual_peer_add("127.0.0.1", port(&b)).await.unwrap();
        let listing = a.list_files_on_network().await;

        assert_eq!(listing.len(), 1);
        assert_eq!(listing[&id("BBBBBBBB")], vec!["shared.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_update_peer_list_drops_stopped_peer() {
        let (a, _da) = test_node("AAAAAAAA").await;
        let (mut b, _db) = test_node("BBBBBBBB").await;
        let (c, _dc) = test_node("CCCCCCCC").await;
        a.manual_peer_add("127.0.0.1", port(&b)).await.unwrap();
        a.manual_peer_add("127.0.0.1", port(&c)).await.unwrap();

        b.shutdown().await.unwrap();
        let report = a.update_peer_list().await;

        assert_eq!(report.dropped, vec![id("BBBBBBBB")]);
        assert!(a.get_known_peer(&id("BBBBBBBB")).await.is_err());
        assert!(a.get_known_peer(&id("CCCCCCCC")).await.is_ok());
    }

    #[tokio::test]
    async fn test_lifecycle_guards() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            host: "127.0.0.1".to_string(),
            shared_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let mut node = Node::new(config).await.unwrap();

        assert!(matches!(
            node.manual_peer_add("127.0.0.1", 1).await,
            Err(P2PError::NotRunning)
        ));
        node.set_network_address("127.0.0.1", 0).unwrap();

        node.start().await.unwrap();
        assert!(matches!(node.start().await, Err(P2PError::AlreadyRunning)));
        assert!(matches!(
            node.set_network_address("127.0.0.1", 0),
            Err(P2PError::AlreadyRunning)
        ));

        tokio::time::timeout(Duration::from_secs(3), node.shutdown())
            .await
            .expect("shutdown hung")
            .unwrap();
        assert!(!node.is_running());
        assert!(node.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_set_file_directory() {
        let (a, _da) = test_node("AAAAAAAA").await;
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("moved.txt"), b"m").unwrap();

        let files = a
            .set_file_directory(other.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(files, vec!["moved.txt".to_string()]);
        assert_eq!(a.file_directory().await, other.path());
    }
}
