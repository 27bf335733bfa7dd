use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Admission rejected by {0}")]
    AdmissionRejected(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Invalid peer: {0}")]
    InvalidPeer(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Node is not running")]
    NotRunning,

    #[error("Node is already running")]
    AlreadyRunning,
}

impl P2PError {
    /// True for failures that only mean "the peer did not answer this round".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, P2PError::Unreachable(_))
    }

    /// True when the remote side answered but the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, P2PError::PeerNotFound(_) | P2PError::FileNotFound(_))
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}
