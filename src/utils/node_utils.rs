use crate::{P2PError, Result};
use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;

/// First port tried when the user asks for an automatically chosen one.
pub const FIRST_AUTO_PORT: u16 = 51000;
/// Auto selection gives up at this port (exclusive).
pub const LAST_AUTO_PORT: u16 = 52000;

pub struct NodeUtils;

impl NodeUtils {
    /// Create a TCP listener with SO_REUSEADDR so a restarted node can rebind
    /// while old connections linger in TIME_WAIT.
    pub fn bind_reusable_listener(addr: SocketAddr) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set reuse_address: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .listen(128)
            .map_err(|e| P2PError::NetworkError(format!("Failed to listen on {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set nonblocking: {}", e)))?;

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(|e| {
            P2PError::NetworkError(format!("Failed to convert to tokio listener: {}", e))
        })
    }

    /// Check if a TCP port is available for binding on `host`
    pub fn is_port_available(host: IpAddr, port: u16) -> bool {
        std::net::TcpListener::bind(SocketAddr::new(host, port)).is_ok()
    }

    /// Find the first bindable port in `[start_port, LAST_AUTO_PORT)`.
    pub fn find_available_port(host: IpAddr, start_port: u16) -> Result<u16> {
        for port in start_port..LAST_AUTO_PORT {
            if Self::is_port_available(host, port) {
                debug!("Port {} is available", port);
                return Ok(port);
            }
        }
        warn!(
            "No free port between {} and {}",
            start_port, LAST_AUTO_PORT
        );
        Err(P2PError::NetworkError(
            "No available ports found".to_string(),
        ))
    }

    /// Resolve a configured host (IP literal or name) to the address a
    /// listener would bind.
    pub async fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| P2PError::ConfigError(format!("Bad host {}: {}", host, e)))?
            .next()
            .ok_or_else(|| P2PError::ConfigError(format!("Bad host {}", host)))
    }

    /// The address other processes on this host can reach a listener bound
    /// to `bound` at. Wildcard binds are reached over loopback.
    pub fn reachable_address(bound: SocketAddr) -> SocketAddr {
        match bound.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
            }
            IpAddr::V6(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), bound.port())
            }
            _ => bound,
        }
    }
}
