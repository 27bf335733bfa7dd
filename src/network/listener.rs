use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::core::Request;
use crate::network::{MessageHandler, Transport};
use crate::utils::{NodeUtils, P2PError, Result};

/// Owns the server socket. Connections are served one at a time: read one
/// request, write one response, close.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: MessageHandler,
    request_timeout: Duration,
    max_message_size: usize,
}

impl Listener {
    pub fn bind(
        addr: SocketAddr,
        handler: MessageHandler,
        request_timeout: Duration,
        max_message_size: usize,
    ) -> Result<Self> {
        let listener = NodeUtils::bind_reusable_listener(addr)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            handler,
            request_timeout,
            max_message_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Accept until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Listening for connections on {}", self.local_addr);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        if let Err(e) = self.serve_connection(stream, remote).await {
                            warn!("Exchange with {} aborted: {}", remote, e);
                        }
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        info!("Listener on {} stopped", self.local_addr);
    }

    async fn serve_connection(&self, mut stream: TcpStream, remote: SocketAddr) -> Result<()> {
        tokio::time::timeout(self.request_timeout, async {
            let body = Transport::receive_data(&mut stream, self.max_message_size).await?;
            let request = Request::decode(&body)?;
            let kind = request.message_type();

            let response = self.handler.handle(request, remote).await;
            debug!("{} from {} -> {}", kind, remote, response.message_type());

            Transport::send_data(&mut stream, &response.encode()?).await
        })
        .await
        .map_err(|_| P2PError::Unreachable(format!("{} (exchange timeout)", remote)))?
    }
}
