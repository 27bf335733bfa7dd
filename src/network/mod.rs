pub mod connection;
pub mod discovery;
pub mod listener;
pub mod messaging;
pub mod transport;
pub mod validator;

pub use connection::{ClientSettings, PeerConnection};
pub use discovery::Discovery;
pub use listener::Listener;
pub use messaging::MessageHandler;
pub use transport::Transport;
pub use validator::AddressValidator;
