use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::*;

/// Dials TCP connections through a proxy, for deployments where the TURN
/// server is only reachable that way.
#[async_trait]
pub trait ProxyDialer {
    /// Establishes a stream to `addr` (a `host:port` string) on the given
    /// network ("tcp4" or "tcp6") through the proxy.
    async fn dial(&self, network: &str, addr: &str) -> Result<TcpStream>;
}
