use tokio::sync::Mutex;

use super::candidate_base::*;
use super::*;
use crate::network_type::determine_network_type;
use crate::rand::generate_cand_id;

/// The config required to create a new `CandidateRelay`.
#[derive(Default)]
pub struct CandidateRelayConfig {
    pub base_config: CandidateBaseConfig,

    pub rel_addr: String,
    pub rel_port: u16,
    pub relay_protocol: String,

    /// Hook run exactly once when the candidate closes; releases the
    /// resources upstream of the relayed socket (TURN client and the
    /// host-side connection).
    pub on_close: Option<OnClose>,
}

impl CandidateRelayConfig {
    /// Creates a new relay candidate.
    pub fn new_candidate_relay(self) -> Result<CandidateBase> {
        let mut candidate_id = self.base_config.candidate_id;
        if candidate_id.is_empty() {
            candidate_id = generate_cand_id();
        }

        let ip: IpAddr = match self.base_config.address.parse() {
            Ok(ip) => ip,
            Err(_) => return Err(Error::ErrAddressParseFailed),
        };
        let network_type = determine_network_type(&self.base_config.network, &ip)?;

        Ok(CandidateBase {
            id: candidate_id,
            network_type,
            candidate_type: CandidateType::Relay,
            address: self.base_config.address,
            port: self.base_config.port,
            resolved_addr: SocketAddr::new(ip, self.base_config.port),
            component: self.base_config.component,
            foundation_override: self.base_config.foundation,
            priority_override: self.base_config.priority,
            network: self.base_config.network,
            related_address: Some(CandidateRelatedAddress {
                address: self.rel_addr,
                port: self.rel_port,
            }),
            relay_protocol: self.relay_protocol,
            conn: self.base_config.conn,
            on_close: Mutex::new(self.on_close),
            ..CandidateBase::default()
        })
    }
}
