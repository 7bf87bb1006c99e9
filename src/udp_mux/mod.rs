use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use util::Conn;

use crate::error::*;

/// Allows multiple ICE agents to share a single UDP socket; inbound
/// packets are demultiplexed by the ufrag carried in their STUN binding
/// attributes.
#[async_trait]
pub trait UDPMux {
    /// Closes the mux and every connection handed out by it.
    async fn close(&self) -> Result<()>;

    /// Returns the shared connection for the given ufrag and family.
    async fn get_conn(&self, ufrag: &str, is_ipv6: bool) -> Result<Arc<dyn Conn + Send + Sync>>;

    /// Discards the connection state kept for the given ufrag.
    async fn remove_conn_by_ufrag(&self, ufrag: &str);
}

/// A UDP mux that can additionally resolve server reflexive addresses
/// through its shared socket, so no extra socket has to be bound for
/// STUN probing.
#[async_trait]
pub trait UDPMuxSrflx {
    /// Runs a STUN binding transaction against `server_addr` over the
    /// shared socket and returns the XOR-mapped address.
    async fn get_xor_mapped_addr(
        &self,
        server_addr: SocketAddr,
        deadline: Duration,
    ) -> Result<SocketAddr>;

    /// Returns a shared connection keyed by ufrag, server URL and family.
    async fn get_conn_for_url(
        &self,
        ufrag: &str,
        url: &str,
        is_ipv6: bool,
    ) -> Result<Arc<dyn Conn + Send + Sync>>;
}
