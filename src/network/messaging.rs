use log::{debug, info, warn};
use std::net::SocketAddr;

use crate::core::{NodeId, PeerRecord, PeerRegistry, Request, Response};
use crate::network::AddressValidator;
use crate::storage::FileCatalog;
use crate::transfer::Uploader;

/// Maps each inbound request to its response.
#[derive(Clone)]
pub struct MessageHandler {
    local_id: NodeId,
    registry: PeerRegistry,
    catalog: FileCatalog,
    uploader: Uploader,
    validator: AddressValidator,
}

impl MessageHandler {
    pub fn new(
        registry: PeerRegistry,
        catalog: FileCatalog,
        validator: AddressValidator,
    ) -> Self {
        Self {
            local_id: registry.local_id().clone(),
            uploader: Uploader::new(catalog.clone()),
            registry,
            catalog,
            validator,
        }
    }

    /// `remote` is the address of the live connection the request came in on.
    pub async fn handle(&self, request: Request, remote: SocketAddr) -> Response {
        debug!("Handling {} from {}", request.message_type(), remote);

        match request {
            Request::Hello => Response::HelloBack,
            Request::AddMe { uid, port } => self.handle_add_me(uid, port, remote).await,
            Request::BroadcastRequest => Response::BroadcastResponse {
                peers: self.registry.snapshot().await,
            },
            Request::FileList => Response::FileListResponse {
                uid: self.local_id.clone(),
                files: self.catalog.current().await,
            },
            Request::FileGet { filename } => self.uploader.serve(&filename).await,
        }
    }

    async fn handle_add_me(&self, uid: NodeId, port: u16, remote: SocketAddr) -> Response {
        if uid == self.local_id {
            warn!("ADDME from {} claims our own identity {}", remote, uid);
            return Response::Nack;
        }

        // The claimed port is trusted, the claimed address never is.
        let ip = remote.ip().to_canonical().to_string();

        // Connect back: a peer behind NAT or lying about its port fails here.
        if !self.validator.validate(&ip, port).await {
            info!("Client {} ({}:{}) could not be validated", uid, ip, port);
            return Response::Nack;
        }

        let record = PeerRecord::new(uid, ip, port);
        match self.registry.add(record.clone()).await {
            Ok(()) => {
                info!("Client {} connected, added to known peers", record);
                Response::Ack {
                    uid: self.local_id.clone(),
                }
            }
            Err(e) => {
                warn!("Failed to admit {}: {}", record, e);
                Response::Nack
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FileGetStatus;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn id(raw: &str) -> NodeId {
        NodeId::parse(raw).unwrap()
    }

    async fn handler(dir: &std::path::Path) -> MessageHandler {
        let registry = PeerRegistry::new(id("AAAAAAAA"));
        let catalog = FileCatalog::new(dir.to_path_buf()).await.unwrap();
        let validator = AddressValidator::new(Duration::from_millis(300), 1 << 20);
        MessageHandler::new(registry, catalog, validator)
    }

    fn remote() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_hello_is_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;
        assert_eq!(handler.handle(Request::Hello, remote()).await, Response::HelloBack);
    }

    #[tokio::test]
    async fn test_add_me_with_closed_port_is_nacked() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = listener.local_addr().unwrap().port();
        drop(listener);

        let response = handler
            .handle(
                Request::AddMe {
                    uid: id("BBBBBBBB"),
                    port: closed_port,
                },
                remote(),
            )
            .await;

        assert_eq!(response, Response::Nack);
        assert!(handler.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_me_with_own_identity_is_nacked() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;

        let response = handler
            .handle(
                Request::AddMe {
                    uid: id("AAAAAAAA"),
                    port: 51000,
                },
                remote(),
            )
            .await;
        assert_eq!(response, Response::Nack);
    }

    #[tokio::test]
    async fn test_broadcast_request_returns_registry() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;
        let peer = PeerRecord::new(id("CCCCCCCC"), "10.0.0.3", 51002);
        handler.registry.add(peer.clone()).await.unwrap();

        assert_eq!(
            handler.handle(Request::BroadcastRequest, remote()).await,
            Response::BroadcastResponse { peers: vec![peer] }
        );
    }

    #[tokio::test]
    async fn test_file_requests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let handler = handler(dir.path()).await;

        assert_eq!(
            handler.handle(Request::FileList, remote()).await,
            Response::FileListResponse {
                uid: id("AAAAAAAA"),
                files: vec!["a.txt".to_string()],
            }
        );
        assert_eq!(
            handler
                .handle(
                    Request::FileGet {
                        filename: "missing.txt".to_string()
                    },
                    remote()
                )
                .await,
            Response::FileGetResponse(FileGetStatus::Missing)
        );
    }
}
