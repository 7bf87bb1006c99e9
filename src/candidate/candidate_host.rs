use super::candidate_base::*;
use super::*;
use crate::network_type::determine_network_type;
use crate::rand::generate_cand_id;

/// The config required to create a new `CandidateHost`.
#[derive(Default)]
pub struct CandidateHostConfig {
    pub base_config: CandidateBaseConfig,

    pub tcp_type: TcpType,
}

impl CandidateHostConfig {
    /// Creates a new host candidate.
    pub fn new_candidate_host(self) -> Result<CandidateBase> {
        let mut candidate_id = self.base_config.candidate_id;
        if candidate_id.is_empty() {
            candidate_id = generate_cand_id();
        }

        let mut network_type = NetworkType::Unspecified;
        let mut resolved_addr = SocketAddr::new(IpAddr::from([0, 0, 0, 0]), self.base_config.port);
        if !self.base_config.address.ends_with(".local") {
            let ip: IpAddr = match self.base_config.address.parse() {
                Ok(ip) => ip,
                Err(_) => return Err(Error::ErrAddressParseFailed),
            };
            network_type = determine_network_type(&self.base_config.network, &ip)?;
            resolved_addr = SocketAddr::new(ip, self.base_config.port);
        };

        Ok(CandidateBase {
            id: candidate_id,
            network_type,
            candidate_type: CandidateType::Host,
            address: self.base_config.address,
            port: self.base_config.port,
            resolved_addr,
            component: self.base_config.component,
            foundation_override: self.base_config.foundation,
            priority_override: self.base_config.priority,
            network: self.base_config.network,
            tcp_type: self.tcp_type,
            conn: self.base_config.conn,
            ..CandidateBase::default()
        })
    }
}
