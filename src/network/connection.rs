use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::core::{Config, Request, Response};
use crate::network::Transport;
use crate::utils::{P2PError, Result};

/// Timeouts and limits for outbound exchanges.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_message_size: usize,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.probe_timeout(),
            request_timeout: config.request_timeout(),
            max_message_size: config.max_message_size,
        }
    }

    /// Settings for a liveness probe: the whole exchange shares one short timeout.
    pub fn probe(timeout: Duration, max_message_size: usize) -> Self {
        Self {
            connect_timeout: timeout,
            request_timeout: timeout,
            max_message_size,
        }
    }
}

/// A short-lived outbound connection carrying exactly one request and one
/// response. Consumed by [`PeerConnection::exchange`], which closes it.
pub struct PeerConnection {
    stream: TcpStream,
    peer: String,
    settings: ClientSettings,
}

impl PeerConnection {
    pub async fn open(host: &str, port: u16, settings: ClientSettings) -> Result<Self> {
        let stream = Transport::connect(host, port, settings.connect_timeout).await?;
        Ok(Self {
            stream,
            peer: format!("{}:{}", host, port),
            settings,
        })
    }

    pub async fn exchange(mut self, request: &Request) -> Result<Response> {
        let body = request.encode();
        let max_size = self.settings.max_message_size;
        let peer = self.peer.clone();

        let reply = tokio::time::timeout(self.settings.request_timeout, async {
            Transport::send_data(&mut self.stream, &body).await?;
            Transport::receive_data(&mut self.stream, max_size).await
        })
        .await
        .map_err(|_| P2PError::Unreachable(format!("{} (request timeout)", peer)))?
        .map_err(|e| match e {
            P2PError::IoError(msg) => P2PError::Unreachable(format!("{} ({})", peer, msg)),
            other => other,
        })?;

        let response = Response::decode(&reply)?;
        debug!(
            "{} -> {}: {}",
            request.message_type(),
            peer,
            response.message_type()
        );
        Ok(response)
    }
}

/// Connect, send `request`, read the reply, close.
pub async fn request(
    host: &str,
    port: u16,
    request: &Request,
    settings: ClientSettings,
) -> Result<Response> {
    PeerConnection::open(host, port, settings)
        .await?
        .exchange(request)
        .await
}

/// Describe a reply that does not fit the request that was sent.
pub fn unexpected(expected: &str, response: &Response) -> P2PError {
    P2PError::ProtocolError(format!(
        "expected {}, got {}",
        expected,
        response.message_type()
    ))
}
