use stun::message::BINDING_SUCCESS;
use tokio::net::UdpSocket;

use super::*;
use crate::agent::agent_config::InterfaceFilterFn;

#[tokio::test]
async fn test_listen_udp_in_port_range() -> Result<()> {
    let net = Arc::new(Net::new(None));
    let local_ip: IpAddr = "127.0.0.1".parse()?;

    // A pinned one-port range must yield exactly that port.
    let conn = listen_udp_in_port_range(&net, 50321, 50321, SocketAddr::new(local_ip, 0)).await?;
    assert_eq!(conn.local_addr()?.port(), 50321);
    conn.close().await?;

    // An inverted range is rejected.
    let result = listen_udp_in_port_range(&net, 4999, 5000, SocketAddr::new(local_ip, 0)).await;
    assert_eq!(result.err(), Some(Error::ErrPort));

    // A zero range binds an ephemeral port.
    let conn = listen_udp_in_port_range(&net, 0, 0, SocketAddr::new(local_ip, 0)).await?;
    assert_ne!(conn.local_addr()?.port(), 0);
    conn.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_local_interfaces_interface_filter() {
    let net = Arc::new(Net::new(None));

    let reject_all: Option<InterfaceFilterFn> = Some(Box::new(|_: &str| false));
    let ips = local_interfaces(
        &net,
        &reject_all,
        &None,
        &[NetworkType::Udp4, NetworkType::Udp6],
        true,
    )
    .await;
    assert!(ips.is_empty());
}

#[tokio::test]
async fn test_get_xormapped_addr() -> Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let server_addr = server.local_addr()?;

    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        if let Ok((n, src)) = server.recv_from(&mut buf).await {
            let mut req = Message::new();
            req.raw = buf[..n].to_vec();
            if req.decode().is_err() {
                return;
            }

            let mut res = Message::new();
            let _ = res.build(&[
                Box::new(req.transaction_id),
                Box::new(BINDING_SUCCESS),
                Box::new(XorMappedAddress {
                    ip: "198.51.100.7".parse().unwrap(),
                    port: 40000,
                }),
            ]);
            let _ = server.send_to(&res.raw, src).await;
        }
    });

    let net = Arc::new(Net::new(None));
    let conn = net
        .bind(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 0))
        .await?;

    let xor_addr = get_xormapped_addr(&conn, server_addr, Duration::from_secs(5)).await?;
    assert_eq!(xor_addr.ip.to_string(), "198.51.100.7");
    assert_eq!(xor_addr.port, 40000);

    conn.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_get_xormapped_addr_timeout() -> Result<()> {
    // A socket that never answers.
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let server_addr = server.local_addr()?;

    let net = Arc::new(Net::new(None));
    let conn = net
        .bind(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 0))
        .await?;

    let result = get_xormapped_addr(&conn, server_addr, Duration::from_millis(300)).await;
    assert_eq!(result.err(), Some(Error::ErrTimeout));

    conn.close().await?;

    Ok(())
}
