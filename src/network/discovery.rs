use log::{debug, info};

use crate::core::{NodeId, PeerRecord, PeerRegistry, Request, Response};
use crate::network::connection::{self, unexpected, ClientSettings};
use crate::utils::{P2PError, Result};

/// Outbound admission handshakes and gossip pulls.
#[derive(Clone)]
pub struct Discovery {
    local_id: NodeId,
    listen_port: u16,
    registry: PeerRegistry,
    settings: ClientSettings,
}

impl Discovery {
    /// `listen_port` is the port our own listener is bound to; remote peers
    /// connect back to it before accepting us.
    pub fn new(registry: PeerRegistry, listen_port: u16, settings: ClientSettings) -> Self {
        Self {
            local_id: registry.local_id().clone(),
            listen_port,
            registry,
            settings,
        }
    }

    /// ADDME handshake with `host:port`. On ACK the responder is registered
    /// under the identity it answered with.
    pub async fn manual_peer_add(&self, host: &str, port: u16) -> Result<PeerRecord> {
        let request = Request::AddMe {
            uid: self.local_id.clone(),
            port: self.listen_port,
        };

        match connection::request(host, port, &request, self.settings).await? {
            Response::Ack { uid } => {
                if uid == self.local_id {
                    return Err(P2PError::InvalidPeer(format!(
                        "{}:{} is this node",
                        host, port
                    )));
                }
                let record = PeerRecord::new(uid, host, port);
                self.registry.add(record.clone()).await?;
                info!("Admitted by {}", record);
                Ok(record)
            }
            Response::Nack => Err(P2PError::AdmissionRejected(format!("{}:{}", host, port))),
            other => Err(unexpected("ACK or NACK", &other)),
        }
    }

    /// Ask `peer` for its registry.
    pub async fn request_peer_list(&self, peer: &PeerRecord) -> Result<Vec<PeerRecord>> {
        match connection::request(&peer.ip, peer.port, &Request::BroadcastRequest, self.settings)
            .await?
        {
            Response::BroadcastResponse { peers } => Ok(peers),
            other => Err(unexpected("BROADCASTRESPONSE", &other)),
        }
    }

    /// One gossip round: pull every known peer's list and attempt admission
    /// with each peer not yet known. Returns how many peers were admitted.
    pub async fn broadcast_discovery(&self) -> usize {
        let known = self.registry.snapshot().await;
        let mut admitted = 0;

        for peer in known {
            let candidates = match self.request_peer_list(&peer).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    debug!("{} contributed nothing this round: {}", peer, e);
                    continue;
                }
            };

            for candidate in candidates {
                if candidate.uid == self.local_id || self.registry.contains(&candidate.uid).await {
                    continue;
                }
                match self.manual_peer_add(&candidate.ip, candidate.port).await {
                    Ok(_) => admitted += 1,
                    Err(e) => debug!(
                        "Admission with {} (via {}) failed: {}",
                        candidate, peer.uid, e
                    ),
                }
            }
        }

        info!("Discovery round finished: {} new peers", admitted);
        admitted
    }
}
