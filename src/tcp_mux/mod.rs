use std::sync::Arc;

use async_trait::async_trait;
use util::Conn;

use crate::error::*;

/// Hands out passive ICE-TCP connections accepted on a shared listener,
/// demultiplexed by ufrag.
///
/// An implementation that has no listener for the requested family
/// returns [`Error::ErrTcpMuxNotInitialized`]; callers treat that as
/// "ICE-TCP disabled" rather than a failure.
#[async_trait]
pub trait TCPMux {
    /// Returns the packet connection for the given ufrag and family.
    async fn get_conn_by_ufrag(
        &self,
        ufrag: &str,
        is_ipv6: bool,
    ) -> Result<Arc<dyn Conn + Send + Sync>>;

    /// Discards the connection state kept for the given ufrag.
    async fn remove_conn_by_ufrag(&self, ufrag: &str);
}
