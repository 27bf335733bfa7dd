//! Gossip Share
//!
//! A small peer-to-peer node: keeps a registry of known peers, spreads it by
//! gossip, prunes peers that stop answering, and exchanges files over a
//! one-request-per-connection TCP protocol.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use self::core::{Config, Node, NodeId, PeerRecord, SweepReport};
pub use network::{AddressValidator, Discovery};
pub use storage::FileCatalog;
pub use utils::{
    error::{P2PError, Result},
    NodeUtils,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
