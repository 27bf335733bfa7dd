use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::utils::{P2PError, Result};

const NODE_ID_LEN: usize = 8;
const MAX_NODE_ID_LEN: usize = 64;

/// Identity token of a node: 8 uppercase hex digits for generated ids.
///
/// Uniqueness is probabilistic only; collisions are not detected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string().to_uppercase();
        Self(hex[..NODE_ID_LEN].to_string())
    }

    /// Accepts any short alphanumeric token, so ids from other
    /// implementations still round-trip through the registry.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_NODE_ID_LEN {
            return Err(P2PError::InvalidPeer(format!(
                "node id must be 1..={} characters, got {}",
                MAX_NODE_ID_LEN,
                raw.len()
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(P2PError::InvalidPeer(format!(
                "node id must be alphanumeric: {:?}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = P2PError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub uid: NodeId,
    pub ip: String,
    pub port: u16,
}

impl PeerRecord {
    pub fn new(uid: NodeId, ip: impl Into<String>, port: u16) -> Self {
        Self {
            uid,
            ip: ip.into(),
            port,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uid, self.endpoint())
    }
}

/// Table of known peers behind one exclusive lock.
///
/// Clones share the same table. The local identity is never stored.
#[derive(Clone)]
pub struct PeerRegistry {
    local_id: NodeId,
    peers: Arc<Mutex<HashMap<NodeId, PeerRecord>>>,
}

impl PeerRegistry {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub async fn add(&self, record: PeerRecord) -> Result<()> {
        if record.uid == self.local_id {
            return Err(P2PError::InvalidPeer(format!(
                "refusing to register the local identity {}",
                record.uid
            )));
        }

        let mut peers = self.peers.lock().await;
        info!("Added peer: {} ({})", record, peers.len() + 1);
        peers.insert(record.uid.clone(), record);
        Ok(())
    }

    pub async fn remove(&self, uid: &NodeId) -> Result<PeerRecord> {
        let mut peers = self.peers.lock().await;
        match peers.remove(uid) {
            Some(record) => {
                info!("Removed peer: {} ({})", record, peers.len());
                Ok(record)
            }
            None => Err(P2PError::PeerNotFound(uid.to_string())),
        }
    }

    pub async fn get(&self, uid: &NodeId) -> Result<PeerRecord> {
        self.peers
            .lock()
            .await
            .get(uid)
            .cloned()
            .ok_or_else(|| P2PError::PeerNotFound(uid.to_string()))
    }

    pub async fn contains(&self, uid: &NodeId) -> bool {
        self.peers.lock().await.contains_key(uid)
    }

    /// Copy of every record; iterate it without holding the lock.
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    /// Atomically swap the whole table. [`PeerRegistry::apply_sweep`] is the
    /// sweep-aware form: it builds the table under the lock and installs it
    /// through the same swap.
    pub async fn replace(&self, new_map: HashMap<NodeId, PeerRecord>) {
        let mut peers = self.peers.lock().await;
        self.install(&mut peers, new_map);
    }

    /// Install the result of a liveness sweep in one swap.
    ///
    /// `probed` is the snapshot the sweep started from and `reachable` the
    /// records that answered. Entries that changed while the sweep was
    /// probing (admitted, re-admitted or removed) keep their current state.
    pub async fn apply_sweep(&self, probed: &[PeerRecord], reachable: Vec<PeerRecord>) {
        let mut peers = self.peers.lock().await;

        let mut next: HashMap<NodeId, PeerRecord> = reachable
            .into_iter()
            .filter(|record| peers.contains_key(&record.uid))
            .map(|record| (record.uid.clone(), record))
            .collect();

        for (uid, current) in peers.iter() {
            if !probed.contains(current) {
                next.insert(uid.clone(), current.clone());
            }
        }

        self.install(&mut peers, next);
    }

    fn install(
        &self,
        peers: &mut HashMap<NodeId, PeerRecord>,
        new_map: HashMap<NodeId, PeerRecord>,
    ) {
        let filtered: HashMap<_, _> = new_map
            .into_iter()
            .filter(|(uid, _)| *uid != self.local_id)
            .collect();

        debug!("Registry replaced: {} -> {} peers", peers.len(), filtered.len());
        *peers = filtered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> NodeId {
        NodeId::parse(raw).unwrap()
    }

    #[test]
    fn test_generated_id_format() {
        let node_id = NodeId::generate();
        assert_eq!(node_id.as_str().len(), 8);
        assert!(node_id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_parse_rejects_separator_and_empty() {
        assert!(NodeId::parse("").is_err());
        assert!(NodeId::parse("AB|||CD").is_err());
        assert!(NodeId::parse("AAAAAAAA").is_ok());
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        assert_eq!(PeerRecord::new(id("A1"), "::1", 51000).endpoint(), "[::1]:51000");
        assert_eq!(
            PeerRecord::new(id("A1"), "127.0.0.1", 51000).endpoint(),
            "127.0.0.1:51000"
        );
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = PeerRegistry::new(id("AAAAAAAA"));
        let record = PeerRecord::new(id("BBBBBBBB"), "127.0.0.1", 51001);

        registry.add(record.clone()).await.unwrap();
        assert_eq!(registry.get(&record.uid).await.unwrap(), record);
        assert_eq!(registry.len().await, 1);

        registry.remove(&record.uid).await.unwrap();
        assert!(matches!(
            registry.get(&record.uid).await,
            Err(P2PError::PeerNotFound(_))
        ));
        assert!(matches!(
            registry.remove(&record.uid).await,
            Err(P2PError::PeerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_never_registers_self() {
        let registry = PeerRegistry::new(id("AAAAAAAA"));
        let me = PeerRecord::new(id("AAAAAAAA"), "127.0.0.1", 51000);

        assert!(matches!(
            registry.add(me.clone()).await,
            Err(P2PError::InvalidPeer(_))
        ));

        let mut map = HashMap::new();
        map.insert(me.uid.clone(), me);
        registry.replace(map).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_apply_sweep_keeps_concurrent_admissions() {
        let registry = PeerRegistry::new(id("AAAAAAAA"));
        let alive = PeerRecord::new(id("BBBBBBBB"), "127.0.0.1", 51001);
        let dead = PeerRecord::new(id("CCCCCCCC"), "127.0.0.1", 51002);
        registry.add(alive.clone()).await.unwrap();
        registry.add(dead.clone()).await.unwrap();

        let probed = registry.snapshot().await;
        let late = PeerRecord::new(id("DDDDDDDD"), "127.0.0.1", 51003);
        registry.add(late.clone()).await.unwrap();

        registry.apply_sweep(&probed, vec![alive.clone()]).await;

        assert!(registry.contains(&alive.uid).await);
        assert!(!registry.contains(&dead.uid).await);
        assert!(registry.contains(&late.uid).await);
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_table() {
        let registry = PeerRegistry::new(id("AAAAAAAA"));
        let old = PeerRecord::new(id("BBBBBBBB"), "127.0.0.1", 51001);
        let new = PeerRecord::new(id("CCCCCCCC"), "127.0.0.1", 51002);
        registry.add(old.clone()).await.unwrap();

        let mut map = HashMap::new();
        map.insert(new.uid.clone(), new.clone());
        registry.replace(map).await;

        assert_eq!(registry.snapshot().await, vec![new]);
        assert!(!registry.contains(&old.uid).await);
    }
}
