use log::debug;
use std::time::Duration;

use crate::core::{Request, Response};
use crate::network::connection::{self, unexpected, ClientSettings};
use crate::utils::Result;

/// HELLO/HELLOBACK reachability probe with a fixed short timeout.
#[derive(Debug, Clone, Copy)]
pub struct AddressValidator {
    settings: ClientSettings,
}

impl AddressValidator {
    pub fn new(timeout: Duration, max_message_size: usize) -> Self {
        Self {
            settings: ClientSettings::probe(timeout, max_message_size),
        }
    }

    /// Probe `host:port`, reporting why it failed.
    pub async fn probe(&self, host: &str, port: u16) -> Result<()> {
        match connection::request(host, port, &Request::Hello, self.settings).await? {
            Response::HelloBack => Ok(()),
            other => Err(unexpected("HELLOBACK", &other)),
        }
    }

    /// True iff `host:port` answered the probe with HELLOBACK. Never fails.
    pub async fn validate(&self, host: &str, port: u16) -> bool {
        match self.probe(host, port).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Validation of {}:{} failed: {}", host, port, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Transport;
    use tokio::net::TcpListener;

    fn validator() -> AddressValidator {
        AddressValidator::new(Duration::from_millis(500), 1 << 20)
    }

    /// Answer one connection with `reply`.
    async fn one_shot_server(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = Transport::receive_data(&mut stream, 1024).await.unwrap();
            assert_eq!(request, b"HELLO".to_vec());
            Transport::send_data(&mut stream, reply).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_validate_accepts_helloback() {
        let port = one_shot_server(b"HELLOBACK").await;
        assert!(validator().validate("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_validate_rejects_wrong_token() {
        let port = one_shot_server(b"NACK").await;
        assert!(!validator().validate("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_validate_closed_port_is_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!validator().validate("127.0.0.1", port).await);
        assert!(validator()
            .probe("127.0.0.1", port)
            .await
            .unwrap_err()
            .is_unreachable());
    }

    #[tokio::test]
    async fn test_validate_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        assert!(!validator().validate("127.0.0.1", port).await);
    }
}
