use std::net::IpAddr;
use std::sync::Arc;

use util::vnet::net::Net;

use crate::candidate::CandidateType;
use crate::mdns::MulticastDnsMode;
use crate::network_type::NetworkType;
use crate::proxy::ProxyDialer;
use crate::tcp_mux::TCPMux;
use crate::udp_mux::{UDPMux, UDPMuxSrflx};
use crate::url::Url;

/// Filters interfaces by name during local candidate gathering.
pub type InterfaceFilterFn = Box<dyn (Fn(&str) -> bool) + Send + Sync>;

/// Filters interface addresses during local candidate gathering.
pub type IpFilterFn = Box<dyn (Fn(IpAddr) -> bool) + Send + Sync>;

pub(crate) fn default_candidate_types() -> Vec<CandidateType> {
    vec![
        CandidateType::Host,
        CandidateType::ServerReflexive,
        CandidateType::Relay,
    ]
}

/// Collects the arguments to `Agent` construction into a single structure, for
/// future-proofness of the interface.
#[derive(Default)]
pub struct AgentConfig {
    pub urls: Vec<Url>,

    /// It is used to perform connectivity checks. The values MUST be unguessable, with at least
    /// 128 bits of random number generator output used to generate the password, and at least 24
    /// bits of output to generate the username fragment.
    pub local_ufrag: String,
    /// It is used to perform connectivity checks. The values MUST be unguessable, with at least
    /// 128 bits of random number generator output used to generate the password, and at least 24
    /// bits of output to generate the username fragment.
    pub local_pwd: String,

    /// Controls mDNS behavior for the ICE agent.
    pub multicast_dns_mode: MulticastDnsMode,

    /// Controls the hostname for this agent. If none is specified a random one will be generated.
    pub multicast_dns_host_name: String,

    /// An optional configuration for disabling or enabling support for specific candidate types.
    pub candidate_types: Vec<CandidateType>,

    /// The network types the agent gathers candidates on.
    pub network_types: Vec<NetworkType>,

    /// Minimum port for allocation policy; candidate ports are picked inside
    /// `[port_min, port_max]` when both are non-zero.
    pub port_min: u16,
    /// Maximum port for allocation policy.
    pub port_max: u16,

    /// A function that you can use in order to whitelist or blacklist the
    /// interfaces which are used to gather ICE candidates.
    pub interface_filter: Arc<Option<InterfaceFilterFn>>,

    /// A function that you can use in order to whitelist or blacklist the
    /// IPs which are used to gather ICE candidates.
    pub ip_filter: Arc<Option<IpFilterFn>>,

    /// Include loopback addresses in the candidate list.
    pub include_loopback: bool,

    /// Specify mapped external addresses for 1:1 NAT setups. Each entry is
    /// either `"external"` or `"external/local"`.
    pub nat_1to1_ips: Vec<String>,

    /// Specify the candidate type the external addresses above map to.
    pub nat_1to1_ip_candidate_type: CandidateType,

    /// Controls if self-signed certificates are accepted when connecting to
    /// TURN servers via TLS or DTLS.
    pub insecure_skip_verify: bool,

    /// The virtualisable network the agent binds, resolves and enumerates
    /// through; defaults to the host network.
    pub net: Option<Arc<Net>>,

    /// Shares a single UDP socket between host candidates of multiple agents.
    pub udp_mux: Option<Arc<dyn UDPMux + Send + Sync>>,

    /// Shares a single UDP socket for server reflexive discovery.
    pub udp_mux_srflx: Option<Arc<dyn UDPMuxSrflx + Send + Sync>>,

    /// Hands out passive ICE-TCP connections accepted on a shared listener.
    pub tcp_mux: Option<Arc<dyn TCPMux + Send + Sync>>,

    /// Dials TURN servers through a proxy when set.
    pub proxy_dialer: Option<Arc<dyn ProxyDialer + Send + Sync>>,
}
