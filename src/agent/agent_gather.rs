use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio_rustls::rustls;
use tokio_util::sync::CancellationToken;
use util::Conn;
use waitgroup::WaitGroup;

use crate::agent::agent_internal::AgentInternal;
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_relay::CandidateRelayConfig;
use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::candidate::*;
use crate::error::*;
use crate::mdns::MulticastDnsMode;
use crate::network_type::{NetworkType, TCP, UDP};
use crate::state::GatheringState;
use crate::stun_conn::StunConn;
use crate::tcp_type::TcpType;
use crate::url::{ProtoType, SchemeType, Url};
use crate::util::{get_xormapped_addr, listen_udp_in_port_range, local_interfaces};

pub(crate) const STUN_GATHER_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps a connection-oriented `Conn` so it can stand in for an
/// unconnected packet socket: writes ignore the supplied destination and
/// reads report the peer address.
struct PacketConnWrapper {
    next_conn: Arc<dyn Conn + Send + Sync>,
    remote_addr: SocketAddr,
}

#[async_trait]
impl Conn for PacketConnWrapper {
    async fn connect(&self, _addr: SocketAddr) -> std::result::Result<(), util::Error> {
        Err(util::Error::Other(
            "connect is not supported on a wrapped connection".to_owned(),
        ))
    }

    async fn recv(&self, buf: &mut [u8]) -> std::result::Result<usize, util::Error> {
        self.next_conn.recv(buf).await
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> std::result::Result<(usize, SocketAddr), util::Error> {
        let n = self.next_conn.recv(buf).await?;
        Ok((n, self.remote_addr))
    }

    async fn send(&self, buf: &[u8]) -> std::result::Result<usize, util::Error> {
        self.next_conn.send(buf).await
    }

    async fn send_to(
        &self,
        buf: &[u8],
        _target: SocketAddr,
    ) -> std::result::Result<usize, util::Error> {
        self.next_conn.send(buf).await
    }

    fn local_addr(&self) -> std::result::Result<SocketAddr, util::Error> {
        self.next_conn.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }

    async fn close(&self) -> std::result::Result<(), util::Error> {
        self.next_conn.close().await
    }
}

/// Certificate verifier that accepts any server certificate; installed
/// only when the agent is configured with `insecure_skip_verify`.
struct NoCertVerifier;

impl rustls::client::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// Close a conn and log if we have a failure.
async fn close_conn_and_log(conn: &Arc<dyn Conn + Send + Sync>, msg: &str) {
    log::warn!("{msg}");
    if let Err(err) = conn.close().await {
        log::warn!("failed to close conn: {err}");
    }
}

impl AgentInternal {
    /// Initiates the trickle based gathering process.
    pub(crate) async fn gather_candidates(self: &Arc<Self>) -> Result<()> {
        let cancel = {
            let mut gather_cancel = self.gather_candidate_cancel.lock().await;

            if GatheringState::from(self.gathering_state.load(Ordering::SeqCst))
                != GatheringState::New
            {
                return Err(Error::ErrMultipleGatherAttempted);
            }
            if self.on_candidate_hdlr.load().is_none() {
                return Err(Error::ErrNoOnCandidateHandler);
            }

            // Cancel the previous gathering routine, should one still be
            // lingering.
            if let Some(prev_cancel) = gather_cancel.take() {
                prev_cancel.cancel();
            }

            let cancel = self.root_cancel.child_token();
            *gather_cancel = Some(cancel.clone());

            let (done_tx, _) = broadcast::channel(1);
            {
                let mut gather_done = self.gather_candidate_done.lock().await;
                *gather_done = Some(done_tx);
            }

            // The state must leave `New` before any strategy runs; doing it
            // here also makes a second gather attempt fail deterministically.
            self.gathering_state
                .store(GatheringState::Gathering as u8, Ordering::SeqCst);

            cancel
        };

        let ai = Arc::clone(self);
        tokio::spawn(async move {
            ai.gather_candidates_internal(cancel).await;
        });

        Ok(())
    }

    async fn gather_candidates_internal(self: Arc<Self>, cancel: CancellationToken) {
        let wg = WaitGroup::new();

        for t in &self.candidate_types {
            match t {
                CandidateType::Host => {
                    let w = wg.worker();
                    let ai = Arc::clone(&self);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let _d = w;
                        ai.gather_candidates_local(&cancel).await;
                    });
                }
                CandidateType::ServerReflexive => {
                    let w = wg.worker();
                    let ai = Arc::clone(&self);
                    let cancel2 = cancel.clone();
                    tokio::spawn(async move {
                        let _d = w;
                        if ai.udp_mux_srflx.is_some() {
                            ai.gather_candidates_srflx_udp_mux(&cancel2).await;
                        } else {
                            ai.gather_candidates_srflx(&cancel2).await;
                        }
                    });

                    if let Some(ext_ip_mapper) = &*self.ext_ip_mapper {
                        if ext_ip_mapper.candidate_type == CandidateType::ServerReflexive {
                            let w = wg.worker();
                            let ai = Arc::clone(&self);
                            let cancel2 = cancel.clone();
                            tokio::spawn(async move {
                                let _d = w;
                                ai.gather_candidates_srflx_mapped(&cancel2).await;
                            });
                        }
                    }
                }
                CandidateType::Relay => {
                    let w = wg.worker();
                    let ai = Arc::clone(&self);
                    let cancel2 = cancel.clone();
                    tokio::spawn(async move {
                        let _d = w;
                        ai.gather_candidates_relay(&cancel2).await;
                    });
                }
                CandidateType::PeerReflexive | CandidateType::Unspecified => {}
            }
        }

        // Block until all STUN and TURN URLs have been gathered (or timed
        // out).
        wg.wait().await;

        if let Err(err) = self.set_gathering_state(GatheringState::Complete).await {
            log::warn!("failed to set gathering state to complete: {err}");
        }

        // Fire the session done signal.
        {
            let mut gather_done = self.gather_candidate_done.lock().await;
            gather_done.take();
        }
    }

    pub(crate) async fn gather_candidates_local(&self, cancel: &CancellationToken) {
        let mut networks = HashSet::new();
        for network_type in &self.network_types {
            if network_type.is_tcp() {
                networks.insert(TCP.to_owned());
            } else {
                networks.insert(UDP.to_owned());
            }
        }

        // When a UDP mux is configured it owns the UDP host candidates;
        // gathering them again here would produce duplicates.
        if self.udp_mux.is_some() {
            if let Err(err) = self.gather_candidates_local_udp_mux(cancel).await {
                log::warn!("could not create host candidate for UDP mux: {err}");
            }
            networks.remove(UDP);
        }

        let local_ips = local_interfaces(
            &self.net,
            &self.interface_filter,
            &self.ip_filter,
            &self.network_types,
            self.include_loopback,
        )
        .await;

        for ip in local_ips {
            let mut mapped_ip = ip;

            if self.mdns_mode != MulticastDnsMode::QueryAndGather {
                if let Some(ext_ip_mapper) = &*self.ext_ip_mapper {
                    if ext_ip_mapper.candidate_type == CandidateType::Host {
                        match ext_ip_mapper.find_external_ip(&ip.to_string()) {
                            Ok(ip) => mapped_ip = ip,
                            Err(_) => log::warn!(
                                "1:1 NAT mapping is enabled but no external IP is found for {ip}"
                            ),
                        }
                    }
                }
            }

            let address = if self.mdns_mode == MulticastDnsMode::QueryAndGather {
                self.mdns_name.clone()
            } else {
                mapped_ip.to_string()
            };

            for network in &networks {
                let (conn, port, tcp_type) = if network.as_str() == TCP {
                    // ICE-TCP is passive only; the mux hands out connections
                    // accepted on its shared listener.
                    let tcp_mux = match &self.tcp_mux {
                        Some(tcp_mux) => tcp_mux,
                        None => continue,
                    };

                    log::debug!("getting conn by ufrag: {}", self.local_ufrag);
                    let conn = match tcp_mux
                        .get_conn_by_ufrag(&self.local_ufrag, mapped_ip.is_ipv6())
                        .await
                    {
                        Ok(conn) => conn,
                        Err(Error::ErrTcpMuxNotInitialized) => continue,
                        Err(err) => {
                            log::warn!(
                                "error getting tcp conn by ufrag: {network} {ip} {}: {err}",
                                self.local_ufrag
                            );
                            continue;
                        }
                    };

                    let port = match conn.local_addr() {
                        Ok(addr) => addr.port(),
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!(
                                    "failed to get port of conn from TCP mux: {network} {ip}: {err}"
                                ),
                            )
                            .await;
                            continue;
                        }
                    };

                    (conn, port, TcpType::Passive)
                } else {
                    let conn = match listen_udp_in_port_range(
                        &self.net,
                        self.port_max,
                        self.port_min,
                        SocketAddr::new(ip, 0),
                    )
                    .await
                    {
                        Ok(conn) => conn,
                        Err(err) => {
                            log::warn!("could not listen {network} {ip}: {err}");
                            continue;
                        }
                    };

                    let port = match conn.local_addr() {
                        Ok(addr) => addr.port(),
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!("failed to get port of UDP conn: {network} {ip}: {err}"),
                            )
                            .await;
                            continue;
                        }
                    };

                    (conn, port, TcpType::Unspecified)
                };

                let host_config = CandidateHostConfig {
                    base_config: CandidateBaseConfig {
                        network: network.clone(),
                        address: address.clone(),
                        port,
                        component: COMPONENT_RTP,
                        conn: Some(Arc::clone(&conn)),
                        ..CandidateBaseConfig::default()
                    },
                    tcp_type,
                };

                let candidate: Arc<dyn Candidate + Send + Sync> =
                    match host_config.new_candidate_host() {
                        Ok(mut candidate) => {
                            if self.mdns_mode == MulticastDnsMode::QueryAndGather {
                                // The advertised address is the mDNS name; the
                                // real IP stays on the candidate for the rest
                                // of the agent.
                                if let Err(err) = candidate.set_ip(&ip) {
                                    close_conn_and_log(
                                        &conn,
                                        &format!(
                                        "failed to create host candidate: {network} {mapped_ip} {port}: {err}"
                                    ),
                                    )
                                    .await;
                                    continue;
                                }
                            }
                            Arc::new(candidate)
                        }
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!(
                                    "failed to create host candidate: {network} {mapped_ip} {port}: {err}"
                                ),
                            )
                            .await;
                            continue;
                        }
                    };

                if let Err(err) = self.add_candidate(&candidate, cancel).await {
                    if let Err(close_err) = candidate.close().await {
                        log::warn!("failed to close candidate: {close_err}");
                    }
                    log::warn!("failed to append to local candidates and run on_candidate: {err}");
                }
            }
        }
    }

    pub(crate) async fn gather_candidates_local_udp_mux(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let udp_mux = match &self.udp_mux {
            Some(udp_mux) => Arc::clone(udp_mux),
            None => return Err(Error::ErrUdpMuxDisabled),
        };

        let local_ips = local_interfaces(
            &self.net,
            &self.interface_filter,
            &self.ip_filter,
            &self.network_types,
            self.include_loopback,
        )
        .await;
        if local_ips.is_empty() {
            return Err(Error::ErrCandidateIpNotFound);
        }

        for candidate_ip in local_ips {
            let mut candidate_ip = candidate_ip;

            if let Some(ext_ip_mapper) = &*self.ext_ip_mapper {
                if ext_ip_mapper.candidate_type == CandidateType::Host {
                    match ext_ip_mapper.find_external_ip(&candidate_ip.to_string()) {
                        Ok(mapped_ip) => candidate_ip = mapped_ip,
                        Err(_) => {
                            log::warn!(
                                "1:1 NAT mapping is enabled but no external IP is found for {candidate_ip}"
                            );
                            continue;
                        }
                    }
                }
            }

            let conn = udp_mux
                .get_conn(&self.local_ufrag, candidate_ip.is_ipv6())
                .await?;

            let port = match conn.local_addr() {
                Ok(addr) => addr.port(),
                Err(err) => {
                    close_conn_and_log(
                        &conn,
                        &format!(
                            "failed to get port of conn from UDP mux: {candidate_ip}: {err}"
                        ),
                    )
                    .await;
                    continue;
                }
            };

            let host_config = CandidateHostConfig {
                base_config: CandidateBaseConfig {
                    network: UDP.to_owned(),
                    address: candidate_ip.to_string(),
                    port,
                    component: COMPONENT_RTP,
                    conn: Some(Arc::clone(&conn)),
                    ..CandidateBaseConfig::default()
                },
                ..CandidateHostConfig::default()
            };

            let candidate: Arc<dyn Candidate + Send + Sync> = match host_config
                .new_candidate_host()
            {
                Ok(candidate) => Arc::new(candidate),
                Err(err) => {
                    close_conn_and_log(
                        &conn,
                        &format!("failed to create host mux candidate: {candidate_ip} {port}: {err}"),
                    )
                    .await;
                    continue;
                }
            };

            if let Err(err) = self.add_candidate(&candidate, cancel).await {
                if let Err(close_err) = candidate.close().await {
                    log::warn!("failed to close candidate: {close_err}");
                }
                close_conn_and_log(
                    &conn,
                    &format!("failed to add candidate: {candidate_ip} {port}: {err}"),
                )
                .await;
                continue;
            }
        }

        Ok(())
    }

    pub(crate) async fn gather_candidates_srflx_mapped(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) {
        let wg = WaitGroup::new();

        for network_type in &self.network_types {
            if network_type.is_tcp() {
                continue;
            }

            let w = wg.worker();
            let ai = Arc::clone(self);
            let cancel = cancel.clone();
            let network_type = *network_type;
            tokio::spawn(async move {
                let _d = w;
                let network = network_type.to_string();

                let any_ip: IpAddr = if network_type.is_ipv6() {
                    Ipv6Addr::UNSPECIFIED.into()
                } else {
                    Ipv4Addr::UNSPECIFIED.into()
                };
                let conn = match listen_udp_in_port_range(
                    &ai.net,
                    ai.port_max,
                    ai.port_min,
                    SocketAddr::new(any_ip, 0),
                )
                .await
                {
                    Ok(conn) => conn,
                    Err(err) => {
                        log::warn!("failed to listen {network}: {err}");
                        return;
                    }
                };

                let laddr = match conn.local_addr() {
                    Ok(laddr) => laddr,
                    Err(err) => {
                        close_conn_and_log(
                            &conn,
                            &format!("failed to get local address of UDP conn: {err}"),
                        )
                        .await;
                        return;
                    }
                };

                let ext_ip_mapper = match &*ai.ext_ip_mapper {
                    Some(ext_ip_mapper) => ext_ip_mapper,
                    None => {
                        close_conn_and_log(&conn, "1:1 NAT mapping is not configured").await;
                        return;
                    }
                };
                let mapped_ip = match ext_ip_mapper.find_external_ip(&laddr.ip().to_string()) {
                    Ok(ip) => ip,
                    Err(_) => {
                        close_conn_and_log(
                            &conn,
                            &format!(
                                "1:1 NAT mapping is enabled but no external IP is found for {}",
                                laddr.ip()
                            ),
                        )
                        .await;
                        return;
                    }
                };

                let srflx_config = CandidateServerReflexiveConfig {
                    base_config: CandidateBaseConfig {
                        network: network.clone(),
                        address: mapped_ip.to_string(),
                        port: laddr.port(),
                        component: COMPONENT_RTP,
                        conn: Some(Arc::clone(&conn)),
                        ..CandidateBaseConfig::default()
                    },
                    rel_addr: laddr.ip().to_string(),
                    rel_port: laddr.port(),
                };

                let candidate: Arc<dyn Candidate + Send + Sync> = match srflx_config
                    .new_candidate_server_reflexive()
                {
                    Ok(candidate) => Arc::new(candidate),
                    Err(err) => {
                        close_conn_and_log(
                            &conn,
                            &format!(
                                "failed to create server reflexive candidate: {network} {mapped_ip} {}: {err}",
                                laddr.port()
                            ),
                        )
                        .await;
                        return;
                    }
                };

                if let Err(err) = ai.add_candidate(&candidate, &cancel).await {
                    if let Err(close_err) = candidate.close().await {
                        log::warn!("failed to close candidate: {close_err}");
                    }
                    log::warn!("failed to append to local candidates and run on_candidate: {err}");
                }
            });
        }

        wg.wait().await;
    }

    pub(crate) async fn gather_candidates_srflx_udp_mux(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) {
        let wg = WaitGroup::new();

        for network_type in &self.network_types {
            if network_type.is_tcp() {
                continue;
            }

            for url in &self.urls {
                let w = wg.worker();
                let ai = Arc::clone(self);
                let cancel = cancel.clone();
                let url = url.clone();
                let network_type = *network_type;
                tokio::spawn(async move {
                    let _d = w;
                    let network = network_type.to_string();

                    let udp_mux_srflx = match &ai.udp_mux_srflx {
                        Some(udp_mux_srflx) => Arc::clone(udp_mux_srflx),
                        None => return,
                    };

                    let host_port = format!("{}:{}", url.host, url.port);
                    let server_addr =
                        match ai.net.resolve_addr(network_type.is_ipv4(), &host_port).await {
                            Ok(addr) => addr,
                            Err(err) => {
                                log::warn!("failed to resolve stun host: {host_port}: {err}");
                                return;
                            }
                        };

                    let xor_addr = match udp_mux_srflx
                        .get_xor_mapped_addr(server_addr, STUN_GATHER_TIMEOUT)
                        .await
                    {
                        Ok(addr) => addr,
                        Err(err) => {
                            log::warn!(
                                "could not get server reflexive address {network} {url}: {err}"
                            );
                            return;
                        }
                    };

                    let conn = match udp_mux_srflx
                        .get_conn_for_url(&ai.local_ufrag, &url.to_string(), network_type.is_ipv6())
                        .await
                    {
                        Ok(conn) => conn,
                        Err(err) => {
                            log::warn!(
                                "could not find connection in srflx UDP mux {network} {url}: {err}"
                            );
                            return;
                        }
                    };

                    let (ip, port) = (xor_addr.ip(), xor_addr.port());

                    let laddr = match conn.local_addr() {
                        Ok(laddr) => laddr,
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!(
                                    "failed to create server reflexive candidate: {network} {ip} {port}: {err}"
                                ),
                            )
                            .await;
                            return;
                        }
                    };

                    let srflx_config = CandidateServerReflexiveConfig {
                        base_config: CandidateBaseConfig {
                            network: network.clone(),
                            address: ip.to_string(),
                            port,
                            component: COMPONENT_RTP,
                            conn: Some(Arc::clone(&conn)),
                            ..CandidateBaseConfig::default()
                        },
                        rel_addr: laddr.ip().to_string(),
                        rel_port: laddr.port(),
                    };

                    let candidate: Arc<dyn Candidate + Send + Sync> = match srflx_config
                        .new_candidate_server_reflexive()
                    {
                        Ok(candidate) => Arc::new(candidate),
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!(
                                    "failed to create server reflexive candidate: {network} {ip} {port}: {err}"
                                ),
                            )
                            .await;
                            return;
                        }
                    };

                    if let Err(err) = ai.add_candidate(&candidate, &cancel).await {
                        if let Err(close_err) = candidate.close().await {
                            log::warn!("failed to close candidate: {close_err}");
                        }
                        log::warn!(
                            "failed to append to local candidates and run on_candidate: {err}"
                        );
                    }
                });
            }
        }

        wg.wait().await;
    }

    pub(crate) async fn gather_candidates_srflx(self: &Arc<Self>, cancel: &CancellationToken) {
        let wg = WaitGroup::new();

        for network_type in &self.network_types {
            if network_type.is_tcp() {
                continue;
            }

            for url in &self.urls {
                let w = wg.worker();
                let ai = Arc::clone(self);
                let cancel = cancel.clone();
                let url = url.clone();
                let network_type = *network_type;
                tokio::spawn(async move {
                    let _d = w;
                    let network = network_type.to_string();

                    let host_port = format!("{}:{}", url.host, url.port);
                    let server_addr =
                        match ai.net.resolve_addr(network_type.is_ipv4(), &host_port).await {
                            Ok(addr) => addr,
                            Err(err) => {
                                log::warn!("failed to resolve stun host: {host_port}: {err}");
                                return;
                            }
                        };

                    let any_ip: IpAddr = if network_type.is_ipv6() {
                        Ipv6Addr::UNSPECIFIED.into()
                    } else {
                        Ipv4Addr::UNSPECIFIED.into()
                    };
                    let conn = match listen_udp_in_port_range(
                        &ai.net,
                        ai.port_max,
                        ai.port_min,
                        SocketAddr::new(any_ip, 0),
                    )
                    .await
                    {
                        Ok(conn) => conn,
                        Err(err) => {
                            log::warn!("failed to listen for {server_addr}: {err}");
                            return;
                        }
                    };

                    // If the session is cancelled or the agent closes midway
                    // through the transaction, close the socket so the STUN
                    // request below unblocks without waiting out its timeout.
                    let (watchdog_tx, mut watchdog_rx) = mpsc::channel::<()>(1);
                    {
                        let conn = Arc::clone(&conn);
                        let cancel = cancel.clone();
                        let done_rx = ai.done_rx().await;
                        tokio::spawn(async move {
                            match done_rx {
                                Some(mut done_rx) => {
                                    tokio::select! {
                                        _ = watchdog_rx.recv() => {}
                                        _ = cancel.cancelled() => {
                                            let _ = conn.close().await;
                                        }
                                        _ = done_rx.recv() => {
                                            let _ = conn.close().await;
                                        }
                                    }
                                }
                                None => {
                                    let _ = conn.close().await;
                                }
                            }
                        });
                    }

                    let xor_addr =
                        match get_xormapped_addr(&conn, server_addr, STUN_GATHER_TIMEOUT).await {
                            Ok(addr) => addr,
                            Err(err) => {
                                close_conn_and_log(
                                    &conn,
                                    &format!(
                                        "could not get server reflexive address {network} {url}: {err}"
                                    ),
                                )
                                .await;
                                return;
                            }
                        };

                    let (ip, port) = (xor_addr.ip, xor_addr.port);

                    let laddr = match conn.local_addr() {
                        Ok(laddr) => laddr,
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!(
                                    "failed to create server reflexive candidate: {network} {ip} {port}: {err}"
                                ),
                            )
                            .await;
                            return;
                        }
                    };

                    let srflx_config = CandidateServerReflexiveConfig {
                        base_config: CandidateBaseConfig {
                            network: network.clone(),
                            address: ip.to_string(),
                            port,
                            component: COMPONENT_RTP,
                            conn: Some(Arc::clone(&conn)),
                            ..CandidateBaseConfig::default()
                        },
                        rel_addr: laddr.ip().to_string(),
                        rel_port: laddr.port(),
                    };

                    let candidate: Arc<dyn Candidate + Send + Sync> = match srflx_config
                        .new_candidate_server_reflexive()
                    {
                        Ok(candidate) => Arc::new(candidate),
                        Err(err) => {
                            close_conn_and_log(
                                &conn,
                                &format!(
                                    "failed to create server reflexive candidate: {network} {ip} {port}: {err}"
                                ),
                            )
                            .await;
                            return;
                        }
                    };

                    if let Err(err) = ai.add_candidate(&candidate, &cancel).await {
                        if let Err(close_err) = candidate.close().await {
                            log::warn!("failed to close candidate: {close_err}");
                        }
                        log::warn!(
                            "failed to append to local candidates and run on_candidate: {err}"
                        );
                    }

                    // Lets the watchdog exit once the transaction is over.
                    drop(watchdog_tx);
                });
            }
        }

        wg.wait().await;
    }

    pub(crate) async fn gather_candidates_relay(self: &Arc<Self>, cancel: &CancellationToken) {
        let wg = WaitGroup::new();

        // Relay candidates are gathered over IPv4.
        let network = NetworkType::Udp4.to_string();

        for url in &self.urls {
            if url.scheme != SchemeType::Turn && url.scheme != SchemeType::Turns {
                continue;
            }
            if url.username.is_empty() {
                log::error!(
                    "failed to gather relay candidates: {}",
                    Error::ErrUsernameEmpty
                );
                break;
            }
            if url.password.is_empty() {
                log::error!(
                    "failed to gather relay candidates: {}",
                    Error::ErrPasswordEmpty
                );
                break;
            }

            let w = wg.worker();
            let ai = Arc::clone(self);
            let cancel = cancel.clone();
            let url = url.clone();
            let network = network.clone();
            tokio::spawn(async move {
                let _d = w;
                ai.gather_candidates_relay_for_url(&cancel, url, network)
                    .await;
            });
        }

        wg.wait().await;
    }

    async fn gather_candidates_relay_for_url(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        url: Url,
        network: String,
    ) {
        let turn_server_addr = format!("{}:{}", url.host, url.port);

        let (loc_conn, rel_addr, rel_port, relay_protocol): (
            Arc<dyn Conn + Send + Sync>,
            String,
            u16,
            String,
        ) = if url.proto == ProtoType::Udp && url.scheme == SchemeType::Turn {
            let loc_conn = match self
                .net
                .bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))
                .await
            {
                Ok(conn) => conn,
                Err(err) => {
                    log::warn!("failed to listen {network}: {err}");
                    return;
                }
            };

            let laddr = match loc_conn.local_addr() {
                Ok(laddr) => laddr,
                Err(err) => {
                    close_conn_and_log(
                        &loc_conn,
                        &format!("failed to get local address of UDP conn: {err}"),
                    )
                    .await;
                    return;
                }
            };

            (loc_conn, laddr.ip().to_string(), laddr.port(), UDP.to_owned())
        } else if url.proto == ProtoType::Tcp
            && (url.scheme == SchemeType::Turn || url.scheme == SchemeType::Turns)
            && self.proxy_dialer.is_some()
        {
            let proxy_dialer = match &self.proxy_dialer {
                Some(proxy_dialer) => proxy_dialer,
                None => return,
            };

            let stream = match proxy_dialer
                .dial(&NetworkType::Tcp4.to_string(), &turn_server_addr)
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!(
                        "failed to dial TCP address {turn_server_addr} via proxy dialer: {err}"
                    );
                    return;
                }
            };

            let (laddr, raddr) = match (stream.local_addr(), stream.peer_addr()) {
                (Ok(laddr), Ok(raddr)) => (laddr, raddr),
                _ => {
                    log::warn!("failed to get addresses of proxied stream to {turn_server_addr}");
                    return;
                }
            };

            let relay_protocol = if url.scheme == SchemeType::Turn {
                TCP.to_owned()
            } else {
                "tls".to_owned()
            };

            (
                Arc::new(StunConn::new(stream, laddr, raddr)) as Arc<dyn Conn + Send + Sync>,
                laddr.ip().to_string(),
                laddr.port(),
                relay_protocol,
            )
        } else if url.proto == ProtoType::Tcp && url.scheme == SchemeType::Turn {
            let server_addr = match self.net.resolve_addr(true, &turn_server_addr).await {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("failed to resolve TCP address {turn_server_addr}: {err}");
                    return;
                }
            };

            let stream = match TcpStream::connect(server_addr).await {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("failed to dial TCP address {turn_server_addr}: {err}");
                    return;
                }
            };

            let (laddr, raddr) = match (stream.local_addr(), stream.peer_addr()) {
                (Ok(laddr), Ok(raddr)) => (laddr, raddr),
                _ => {
                    log::warn!("failed to get addresses of stream to {turn_server_addr}");
                    return;
                }
            };

            (
                Arc::new(StunConn::new(stream, laddr, raddr)) as Arc<dyn Conn + Send + Sync>,
                laddr.ip().to_string(),
                laddr.port(),
                TCP.to_owned(),
            )
        } else if url.proto == ProtoType::Udp && url.scheme == SchemeType::Turns {
            let server_addr = match self.net.resolve_addr(true, &turn_server_addr).await {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("failed to resolve UDP address {turn_server_addr}: {err}");
                    return;
                }
            };

            let udp_socket = match UdpSocket::bind("0.0.0.0:0").await {
                Ok(socket) => socket,
                Err(err) => {
                    log::warn!("failed to listen {network}: {err}");
                    return;
                }
            };
            if let Err(err) = udp_socket.connect(server_addr).await {
                log::warn!("failed to connect UDP socket to {turn_server_addr}: {err}");
                return;
            }
            let udp_conn: Arc<dyn Conn + Send + Sync> = Arc::new(udp_socket);

            let laddr = match udp_conn.local_addr() {
                Ok(laddr) => laddr,
                Err(err) => {
                    close_conn_and_log(
                        &udp_conn,
                        &format!("failed to get local address of UDP conn: {err}"),
                    )
                    .await;
                    return;
                }
            };

            let dtls_config = dtls::config::Config {
                server_name: url.host.clone(),
                insecure_skip_verify: self.insecure_skip_verify,
                ..Default::default()
            };
            let dtls_conn = match dtls::conn::DTLSConn::new(
                Arc::clone(&udp_conn),
                dtls_config,
                true,
                None,
            )
            .await
            {
                Ok(dtls_conn) => dtls_conn,
                Err(err) => {
                    close_conn_and_log(
                        &udp_conn,
                        &format!("failed to dial DTLS address {turn_server_addr}: {err}"),
                    )
                    .await;
                    return;
                }
            };

            (
                Arc::new(PacketConnWrapper {
                    next_conn: Arc::new(dtls_conn),
                    remote_addr: server_addr,
                }) as Arc<dyn Conn + Send + Sync>,
                laddr.ip().to_string(),
                laddr.port(),
                "dtls".to_owned(),
            )
        } else if url.proto == ProtoType::Tcp && url.scheme == SchemeType::Turns {
            let server_addr = match self.net.resolve_addr(true, &turn_server_addr).await {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("failed to resolve TCP address {turn_server_addr}: {err}");
                    return;
                }
            };

            let stream = match TcpStream::connect(server_addr).await {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("failed to dial TLS address {turn_server_addr}: {err}");
                    return;
                }
            };

            let (laddr, raddr) = match (stream.local_addr(), stream.peer_addr()) {
                (Ok(laddr), Ok(raddr)) => (laddr, raddr),
                _ => {
                    log::warn!("failed to get addresses of stream to {turn_server_addr}");
                    return;
                }
            };

            let mut root_store = rustls::RootCertStore::empty();
            root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
            let mut tls_config = rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            if self.insecure_skip_verify {
                tls_config
                    .dangerous()
                    .set_certificate_verifier(Arc::new(NoCertVerifier));
            }

            let server_name = match rustls::ServerName::try_from(url.host.as_str()) {
                Ok(server_name) => server_name,
                Err(err) => {
                    log::warn!("invalid TLS server name {}: {err}", url.host);
                    return;
                }
            };
            let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
            let tls_stream = match connector.connect(server_name, stream).await {
                Ok(tls_stream) => tls_stream,
                Err(err) => {
                    log::warn!("failed to dial TLS address {turn_server_addr}: {err}");
                    return;
                }
            };

            (
                Arc::new(StunConn::new(tls_stream, laddr, raddr)) as Arc<dyn Conn + Send + Sync>,
                laddr.ip().to_string(),
                laddr.port(),
                "tls".to_owned(),
            )
        } else {
            log::warn!("unable to handle URL in relay gathering: {url}");
            return;
        };

        let client_config = turn::client::ClientConfig {
            stun_serv_addr: String::new(),
            turn_serv_addr: turn_server_addr.clone(),
            username: url.username.clone(),
            password: url.password.clone(),
            realm: String::new(),
            software: String::new(),
            rto_in_ms: 0,
            conn: Arc::clone(&loc_conn),
            vnet: Some(Arc::clone(&self.net)),
        };

        let client = match turn::client::Client::new(client_config).await {
            Ok(client) => Arc::new(client),
            Err(err) => {
                close_conn_and_log(
                    &loc_conn,
                    &format!("failed to build TURN client {turn_server_addr}: {err}"),
                )
                .await;
                return;
            }
        };

        if let Err(err) = client.listen().await {
            let _ = client.close().await;
            close_conn_and_log(
                &loc_conn,
                &format!("failed to listen on TURN client {turn_server_addr}: {err}"),
            )
            .await;
            return;
        }

        let relay_conn = match client.allocate().await {
            Ok(relay_conn) => relay_conn,
            Err(err) => {
                let _ = client.close().await;
                close_conn_and_log(
                    &loc_conn,
                    &format!("failed to allocate on TURN client {turn_server_addr}: {err}"),
                )
                .await;
                return;
            }
        };
        let relay_conn: Arc<dyn Conn + Send + Sync> = Arc::new(relay_conn);

        let raddr = match relay_conn.local_addr() {
            Ok(raddr) => raddr,
            Err(err) => {
                let _ = relay_conn.close().await;
                let _ = client.close().await;
                close_conn_and_log(
                    &loc_conn,
                    &format!("failed to get relayed address {turn_server_addr}: {err}"),
                )
                .await;
                return;
            }
        };

        let client2 = Arc::clone(&client);
        let loc_conn2 = Arc::clone(&loc_conn);
        let relay_config = CandidateRelayConfig {
            base_config: CandidateBaseConfig {
                network: network.clone(),
                address: raddr.ip().to_string(),
                port: raddr.port(),
                component: COMPONENT_RTP,
                conn: Some(Arc::clone(&relay_conn)),
                ..CandidateBaseConfig::default()
            },
            rel_addr,
            rel_port,
            relay_protocol,
            on_close: Some(Box::new(move || {
                let client = Arc::clone(&client2);
                let loc_conn = Arc::clone(&loc_conn2);
                Box::pin(async move {
                    let _ = client.close().await;
                    let _ = loc_conn.close().await;
                    Ok(())
                })
            })),
        };

        let candidate: Arc<dyn Candidate + Send + Sync> = match relay_config.new_candidate_relay()
        {
            Ok(candidate) => Arc::new(candidate),
            Err(err) => {
                if let Err(close_err) = relay_conn.close().await {
                    log::warn!("failed to close relay conn: {close_err}");
                }
                let _ = client.close().await;
                close_conn_and_log(
                    &loc_conn,
                    &format!("failed to create relay candidate: {network} {raddr}: {err}"),
                )
                .await;
                return;
            }
        };

        if let Err(err) = self.add_candidate(&candidate, cancel).await {
            if let Err(close_err) = relay_conn.close().await {
                log::warn!("failed to close relay conn: {close_err}");
            }
            if let Err(close_err) = candidate.close().await {
                log::warn!("failed to close candidate: {close_err}");
            }
            log::warn!("failed to append to local candidates and run on_candidate: {err}");
        }
    }
}
