pub mod config;
pub mod maintenance;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::Config;
pub use maintenance::{MaintenanceScheduler, SweepReport};
pub use node::Node;
pub use peer::{NodeId, PeerRecord, PeerRegistry};
pub use protocol::{FileGetStatus, MessageType, Request, Response};
