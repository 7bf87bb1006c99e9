use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stun::message::{Message, BINDING_SUCCESS};
use stun::xoraddr::XorMappedAddress;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use turn::auth::{generate_auth_key, AuthHandler};
use turn::relay::relay_static::RelayAddressGeneratorStatic;
use turn::server::config::{ConnConfig, ServerConfig};
use turn::server::Server;
use util::vnet::net::{Net, NetConfig};
use util::vnet::router::{Nic, Router, RouterConfig};

use super::agent_config::AgentConfig;
use super::Agent;
use crate::candidate::*;
use crate::error::*;
use crate::mdns::MulticastDnsMode;
use crate::network_type::NetworkType;
use crate::state::GatheringState;
use crate::url::Url;

type CandidateRx = mpsc::UnboundedReceiver<Option<Arc<dyn Candidate + Send + Sync>>>;

fn install_candidate_collector(agent: &Agent) -> CandidateRx {
    let (tx, rx) = mpsc::unbounded_channel();
    agent.on_candidate(Box::new(move |candidate: Option<Arc<dyn Candidate + Send + Sync>>| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(candidate);
        })
    }));
    rx
}

/// Drains the collector until the end-of-gathering `None` arrives.
async fn collect_candidates(rx: &mut CandidateRx) -> Vec<Arc<dyn Candidate + Send + Sync>> {
    let mut candidates = vec![];
    while let Some(candidate) = rx.recv().await {
        match candidate {
            Some(candidate) => candidates.push(candidate),
            None => break,
        }
    }
    candidates
}

async fn connect_net_to_router(net: &Arc<Net>, router: &Arc<Mutex<Router>>) -> Result<()> {
    let nic = net.get_nic()?;
    {
        let mut r = router.lock().await;
        r.add_net(Arc::clone(&nic)).await?;
    }
    {
        let n = nic.lock().await;
        n.set_router(Arc::clone(router)).await?;
    }
    Ok(())
}

async fn build_vnet(static_ip: &str) -> Result<Arc<Net>> {
    let wan = Arc::new(Mutex::new(Router::new(RouterConfig {
        cidr: "0.0.0.0/0".to_owned(),
        ..Default::default()
    })?));

    let net = Arc::new(Net::new(Some(NetConfig {
        static_ips: vec![static_ip.to_owned()],
        ..Default::default()
    })));

    connect_net_to_router(&net, &wan).await?;
    {
        let mut r = wan.lock().await;
        r.start().await?;
    }

    Ok(net)
}

/// Answers every STUN binding request with a fixed XOR-mapped address.
async fn spawn_mock_stun_server(mapped_ip: &str, mapped_port: u16) -> Result<SocketAddr> {
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let server_addr = server.local_addr()?;
    let mapped_ip: IpAddr = mapped_ip.parse()?;

    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while let Ok((n, src)) = server.recv_from(&mut buf).await {
            let mut req = Message::new();
            req.raw = buf[..n].to_vec();
            if req.decode().is_err() {
                continue;
            }

            let mut res = Message::new();
            if res
                .build(&[
                    Box::new(req.transaction_id),
                    Box::new(BINDING_SUCCESS),
                    Box::new(XorMappedAddress {
                        ip: mapped_ip,
                        port: mapped_port,
                    }),
                ])
                .is_err()
            {
                continue;
            }
            let _ = server.send_to(&res.raw, src).await;
        }
    });

    Ok(server_addr)
}

#[tokio::test]
async fn test_gather_without_on_candidate_handler() -> Result<()> {
    let agent = Agent::new(AgentConfig::default())?;

    let result = agent.gather_candidates().await;
    assert_eq!(result.err(), Some(Error::ErrNoOnCandidateHandler));
    assert_eq!(agent.gathering_state(), GatheringState::New);

    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_multiple_gather_attempts_rejected() -> Result<()> {
    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::PeerReflexive],
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let result = agent.gather_candidates().await;
    assert_eq!(result.err(), Some(Error::ErrMultipleGatherAttempted));

    let candidates = collect_candidates(&mut rx).await;
    assert!(candidates.is_empty());

    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_skipped_candidate_types_still_complete() -> Result<()> {
    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::PeerReflexive, CandidateType::Unspecified],
        network_types: vec![NetworkType::Udp4],
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    assert_eq!(agent.gathering_state(), GatheringState::New);
    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(5), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");
    assert!(candidates.is_empty());
    assert_eq!(agent.gathering_state(), GatheringState::Complete);

    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_host_udp_candidate() -> Result<()> {
    let net = build_vnet("1.2.3.4").await?;

    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::Host],
        network_types: vec![NetworkType::Udp4],
        port_min: 5000,
        port_max: 5000,
        net: Some(net),
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(10), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.candidate_type(), CandidateType::Host);
    assert_eq!(candidate.network_type(), NetworkType::Udp4);
    assert_eq!(candidate.address(), "1.2.3.4");
    assert_eq!(candidate.port(), 5000);
    assert_eq!(candidate.component(), 1);
    assert_eq!(candidate.tcp_type(), crate::tcp_type::TcpType::Unspecified);

    assert_eq!(agent.gathering_state(), GatheringState::Complete);

    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_mdns_host_candidate() -> Result<()> {
    let net = build_vnet("1.2.3.4").await?;

    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::Host],
        network_types: vec![NetworkType::Udp4],
        multicast_dns_mode: MulticastDnsMode::QueryAndGather,
        multicast_dns_host_name: "gather-test.local".to_owned(),
        net: Some(net),
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(10), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    // The advertised address is the mDNS name; the candidate still
    // resolves to the real interface IP.
    assert_eq!(candidate.address(), "gather-test.local");
    assert_eq!(candidate.addr().ip().to_string(), "1.2.3.4");
    assert_ne!(candidate.addr().port(), 0);

    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_srflx_candidate() -> Result<()> {
    let server_addr = spawn_mock_stun_server("198.51.100.7", 40000).await?;

    let url = Url::parse_url(&format!("stun:127.0.0.1:{}", server_addr.port()))?;
    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::ServerReflexive],
        network_types: vec![NetworkType::Udp4],
        urls: vec![url],
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(10), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.candidate_type(), CandidateType::ServerReflexive);
    assert_eq!(candidate.address(), "198.51.100.7");
    assert_eq!(candidate.port(), 40000);

    let related = candidate.related_address().expect("missing related address");
    assert_ne!(related.port, 0);

    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_srflx_partial_failure() -> Result<()> {
    // One URL answers, the other is a socket that swallows every request.
    let live_addr = spawn_mock_stun_server("198.51.100.7", 40000).await?;
    let dead_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let dead_addr = dead_socket.local_addr()?;

    let live_url = Url::parse_url(&format!("stun:127.0.0.1:{}", live_addr.port()))?;
    let dead_url = Url::parse_url(&format!("stun:127.0.0.1:{}", dead_addr.port()))?;

    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::ServerReflexive],
        network_types: vec![NetworkType::Udp4],
        urls: vec![dead_url, live_url],
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    let start = Instant::now();
    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(10), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    // The dead URL times out after the 5 second STUN deadline; the live
    // one still produces its candidate.
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].address(), "198.51.100.7");
    assert!(start.elapsed() < Duration::from_secs(8));
    assert_eq!(agent.gathering_state(), GatheringState::Complete);

    drop(dead_socket);
    agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_srflx_cancellation_unblocks_transaction() -> Result<()> {
    // A STUN server that never answers; only cancellation can unblock the
    // transaction before its 5 second deadline.
    let dead_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let dead_addr = dead_socket.local_addr()?;

    let url = Url::parse_url(&format!("stun:127.0.0.1:{}", dead_addr.port()))?;
    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::ServerReflexive],
        network_types: vec![NetworkType::Udp4],
        urls: vec![url],
        ..Default::default()
    })?;
    let _rx = install_candidate_collector(&agent);

    let start = Instant::now();
    agent.gather_candidates().await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    agent.close().await?;

    while agent.gathering_state() != GatheringState::Complete {
        assert!(
            start.elapsed() < Duration::from_secs(3),
            "cancellation did not unblock the srflx task"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(agent.get_local_candidates().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_gather_srflx_mapped_candidate() -> Result<()> {
    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::ServerReflexive],
        network_types: vec![NetworkType::Udp4],
        nat_1to1_ips: vec!["198.51.100.20".to_owned()],
        nat_1to1_ip_candidate_type: CandidateType::ServerReflexive,
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(10), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.candidate_type(), CandidateType::ServerReflexive);
    assert_eq!(candidate.address(), "198.51.100.20");
    let related = candidate.related_address().expect("missing related address");
    assert_eq!(related.port, candidate.port());

    agent.close().await?;
    Ok(())
}

struct TestAuthHandler {
    cred_map: HashMap<String, Vec<u8>>,
}

impl TestAuthHandler {
    fn new(realm: &str) -> Self {
        let mut cred_map = HashMap::new();
        cred_map.insert(
            "foo".to_owned(),
            generate_auth_key("foo", realm, "bar"),
        );
        Self { cred_map }
    }
}

impl AuthHandler for TestAuthHandler {
    fn auth_handle(
        &self,
        username: &str,
        _realm: &str,
        _src_addr: SocketAddr,
    ) -> std::result::Result<Vec<u8>, turn::Error> {
        self.cred_map
            .get(username)
            .cloned()
            .ok_or_else(|| turn::Error::Other("unknown user".to_owned()))
    }
}

async fn spawn_turn_server(realm: &str) -> Result<(Server, SocketAddr)> {
    let listener = UdpSocket::bind("127.0.0.1:0").await?;
    let server_addr = listener.local_addr()?;

    let server = Server::new(ServerConfig {
        conn_configs: vec![ConnConfig {
            conn: Arc::new(listener),
            relay_addr_generator: Box::new(RelayAddressGeneratorStatic {
                relay_address: IpAddr::from_str("127.0.0.1")?,
                address: "0.0.0.0".to_owned(),
                net: Arc::new(Net::new(None)),
            }),
        }],
        realm: realm.to_owned(),
        auth_handler: Arc::new(TestAuthHandler::new(realm)),
        channel_bind_timeout: Duration::from_secs(0),
        alloc_close_notify: None,
    })
    .await?;

    Ok((server, server_addr))
}

#[tokio::test]
async fn test_gather_turn_relay_candidate() -> Result<()> {
    let realm = "ice-gather.test";
    let (server, server_addr) = spawn_turn_server(realm).await?;

    let mut url = Url::parse_url(&format!(
        "turn:127.0.0.1:{}?transport=udp",
        server_addr.port()
    ))?;
    url.username = "foo".to_owned();
    url.password = "bar".to_owned();

    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::Relay],
        network_types: vec![NetworkType::Udp4],
        urls: vec![url],
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(10), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.candidate_type(), CandidateType::Relay);
    assert_eq!(candidate.address(), "127.0.0.1");
    assert_ne!(candidate.port(), 0);
    assert_eq!(candidate.relay_protocol(), "udp");
    assert!(candidate.related_address().is_some());

    // Closing the candidate runs the close hook, releasing the TURN
    // client and the host-side socket.
    candidate.close().await?;

    agent.close().await?;
    server.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_gather_turn_missing_credentials() -> Result<()> {
    let mut url = Url::parse_url("turn:127.0.0.1:3478?transport=udp")?;
    url.username = "foo".to_owned();
    // Password intentionally left empty.

    let agent = Agent::new(AgentConfig {
        candidate_types: vec![CandidateType::Relay],
        network_types: vec![NetworkType::Udp4],
        urls: vec![url],
        ..Default::default()
    })?;
    let mut rx = install_candidate_collector(&agent);

    agent.gather_candidates().await?;

    let candidates = tokio::time::timeout(Duration::from_secs(5), collect_candidates(&mut rx))
        .await
        .expect("gathering did not complete");

    assert!(candidates.is_empty());
    assert_eq!(agent.gathering_state(), GatheringState::Complete);

    agent.close().await?;
    Ok(())
}
