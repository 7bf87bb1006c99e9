#[cfg(test)]
mod agent_gather_test;

pub mod agent_config;
mod agent_gather;
pub(crate) mod agent_internal;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use util::vnet::net::Net;

use agent_config::*;
use agent_internal::*;

use crate::candidate::*;
use crate::error::*;
use crate::external_ip_mapper::ExternalIpMapper;
use crate::mdns::{generate_multicast_dns_name, MulticastDnsMode};
use crate::rand::{generate_pwd, generate_ufrag};
use crate::state::GatheringState;

pub use agent_internal::OnCandidateHdlrFn;

/// Gathers the local candidates of an ICE session: host addresses,
/// server reflexive mappings discovered over STUN, and TURN relay
/// allocations. Newly found candidates are streamed to the handler
/// installed with [`Agent::on_candidate`].
pub struct Agent {
    pub(crate) internal: Arc<AgentInternal>,
}

impl Agent {
    /// Creates a new Agent.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let candidate_types = if config.candidate_types.is_empty() {
            default_candidate_types()
        } else {
            config.candidate_types.clone()
        };

        if !config.urls.is_empty()
            && !contains_candidate_type(CandidateType::ServerReflexive, &candidate_types)
            && !contains_candidate_type(CandidateType::Relay, &candidate_types)
        {
            return Err(Error::ErrUselessUrlsProvided);
        }

        let mut local_ufrag = config.local_ufrag.clone();
        let mut local_pwd = config.local_pwd.clone();
        if local_ufrag.is_empty() {
            local_ufrag = generate_ufrag();
        }
        if local_pwd.is_empty() {
            local_pwd = generate_pwd();
        }
        if local_ufrag.len() * 8 < 24 {
            return Err(Error::ErrLocalUfragInsufficientBits);
        }
        if local_pwd.len() * 8 < 128 {
            return Err(Error::ErrLocalPwdInsufficientBits);
        }

        let mdns_mode = config.multicast_dns_mode;
        let mut mdns_name = config.multicast_dns_host_name.clone();
        if mdns_name.is_empty() {
            mdns_name = generate_multicast_dns_name();
        }
        if mdns_mode == MulticastDnsMode::QueryAndGather && !mdns_name.ends_with(".local") {
            return Err(Error::ErrInvalidMulticastDnsHostName);
        }

        let ext_ip_mapper =
            ExternalIpMapper::new(config.nat_1to1_ip_candidate_type, &config.nat_1to1_ips)?;
        if let Some(ext_ip_mapper) = &ext_ip_mapper {
            if mdns_mode == MulticastDnsMode::QueryAndGather
                && ext_ip_mapper.candidate_type == CandidateType::Host
            {
                return Err(Error::ErrMulticastDnsWithNat1to1IpMapping);
            }
        }

        let net = if let Some(net) = config.net {
            net
        } else {
            Arc::new(Net::new(None))
        };

        let (chan_candidate_tx, chan_candidate_rx) = mpsc::channel(1);
        let on_candidate_hdlr = Arc::new(ArcSwapOption::empty());
        AgentInternal::start_on_candidate_routine(
            chan_candidate_rx,
            Arc::clone(&on_candidate_hdlr),
        );

        let (done_tx, _) = broadcast::channel(1);

        let internal = Arc::new(AgentInternal {
            candidate_types,
            urls: config.urls,
            network_types: config.network_types,
            port_min: config.port_min,
            port_max: config.port_max,
            local_ufrag,
            local_pwd,
            mdns_mode,
            mdns_name,
            interface_filter: config.interface_filter,
            ip_filter: config.ip_filter,
            include_loopback: config.include_loopback,
            insecure_skip_verify: config.insecure_skip_verify,
            ext_ip_mapper: Arc::new(ext_ip_mapper),
            net,
            udp_mux: config.udp_mux,
            udp_mux_srflx: config.udp_mux_srflx,
            tcp_mux: config.tcp_mux,
            proxy_dialer: config.proxy_dialer,
            gathering_state: Arc::new(AtomicU8::new(GatheringState::New as u8)),
            on_candidate_hdlr,
            local_candidates: Mutex::new(vec![]),
            chan_candidate_tx,
            root_cancel: CancellationToken::new(),
            done_tx: Mutex::new(Some(done_tx)),
            gather_candidate_cancel: Mutex::new(None),
            gather_candidate_done: Mutex::new(None),
        });

        Ok(Self { internal })
    }

    /// Sets a handler that is fired when new candidates are gathered.
    /// When the gathering process completes the last candidate is `None`.
    ///
    /// A handler must be installed before [`Agent::gather_candidates`] is
    /// called.
    pub fn on_candidate(&self, f: OnCandidateHdlrFn) {
        self.internal
            .on_candidate_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Initiates the trickle based gathering process. The call returns
    /// once the session is set up; discovery itself proceeds in
    /// background tasks and reports through the candidate handler.
    pub async fn gather_candidates(&self) -> Result<()> {
        self.internal.gather_candidates().await
    }

    /// Returns the current gathering state.
    pub fn gathering_state(&self) -> GatheringState {
        GatheringState::from(self.internal.gathering_state.load(Ordering::SeqCst))
    }

    /// Returns the local candidates gathered so far.
    pub async fn get_local_candidates(&self) -> Vec<Arc<dyn Candidate + Send + Sync>> {
        let local_candidates = self.internal.local_candidates.lock().await;
        local_candidates.clone()
    }

    /// Returns the local user credentials.
    pub fn get_local_user_credentials(&self) -> (String, String) {
        (
            self.internal.local_ufrag.clone(),
            self.internal.local_pwd.clone(),
        )
    }

    /// Cleans up the Agent: cancels any gather session in flight and
    /// closes every gathered candidate together with the socket it owns.
    pub async fn close(&self) -> Result<()> {
        self.internal.close().await
    }
}
