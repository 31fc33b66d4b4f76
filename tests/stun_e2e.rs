//! End-to-end STUN tests over a real loopback socket.

use lodestar_integration_tests::{eventually, start_stun};
use lodestar_stun::{
    Ipv6XorMode, MAGIC_COOKIE, MessageType, ResponderConfig, StunClient, StunMessage,
};
use lodestar_transport::MuxConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

const TXID: [u8; 12] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
];

fn raw_binding_request(txid: [u8; 12]) -> Vec<u8> {
    let mut bytes = vec![0x00, 0x01, 0x00, 0x00];
    bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    bytes.extend_from_slice(&txid);
    bytes
}

async fn recv(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
    let mut buf = [0u8; 1500];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

async fn client_socket(server: SocketAddr) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(server).await.unwrap();
    socket
}

#[tokio::test]
async fn test_binding_request_answered_with_reflexive_address() {
    let (mux, responder) = start_stun(MuxConfig::default(), ResponderConfig::default()).await;
    let client = client_socket(mux.local_addr()).await;

    client.send(&raw_binding_request(TXID)).await.unwrap();
    let reply = recv(&client, Duration::from_secs(2))
        .await
        .expect("binding response");

    assert_eq!(&reply[0..2], &[0x01, 0x01]);
    assert_eq!(&reply[4..8], &MAGIC_COOKIE.to_be_bytes());
    assert_eq!(&reply[8..20], &TXID);

    let response = StunMessage::decode(&reply).unwrap();
    assert_eq!(response.message_type, MessageType::BindingResponse);
    assert_eq!(
        response.xor_mapped_address(Ipv6XorMode::CookieOnly).unwrap(),
        client.local_addr().unwrap()
    );
    assert_eq!(responder.stats().requests_answered, 1);

    mux.shutdown().await;
}

#[tokio::test]
async fn test_stun_client_discovers_mapped_address() {
    let (mux, _responder) = start_stun(MuxConfig::default(), ResponderConfig::default()).await;

    let client = StunClient::bind("127.0.0.1:0").await.unwrap();
    let mapped = client.get_mapped_address(mux.local_addr()).await.unwrap();
    assert_eq!(mapped, client.local_addr().unwrap());

    mux.shutdown().await;
}

#[tokio::test]
async fn test_malformed_and_unsupported_are_ignored() {
    let (mux, responder) = start_stun(MuxConfig::default(), ResponderConfig::default()).await;
    let client = client_socket(mux.local_addr()).await;

    // Wrong cookie
    let mut bad = raw_binding_request(TXID);
    bad[4] ^= 0xFF;
    client.send(&bad).await.unwrap();

    // Too short for a header
    client.send(&[0x00, 0x01, 0x00]).await.unwrap();

    // Binding indication
    let mut indication = raw_binding_request(TXID);
    indication[1] = 0x11;
    client.send(&indication).await.unwrap();

    assert!(recv(&client, Duration::from_millis(300)).await.is_none());

    // The same client is still served afterwards
    client.send(&raw_binding_request(TXID)).await.unwrap();
    assert!(recv(&client, Duration::from_secs(2)).await.is_some());

    let stats = responder.stats();
    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.unsupported, 1);
    assert_eq!(stats.requests_answered, 1);

    mux.shutdown().await;
}

#[tokio::test]
async fn test_each_source_gets_its_own_connection() {
    let (mux, _responder) = start_stun(MuxConfig::default(), ResponderConfig::default()).await;

    let a = client_socket(mux.local_addr()).await;
    let b = client_socket(mux.local_addr()).await;

    for socket in [&a, &b] {
        socket.send(&raw_binding_request(TXID)).await.unwrap();
        let reply = recv(socket, Duration::from_secs(2)).await.unwrap();
        let mapped = StunMessage::decode(&reply)
            .unwrap()
            .xor_mapped_address(Ipv6XorMode::CookieOnly)
            .unwrap();
        assert_eq!(mapped, socket.local_addr().unwrap());
    }

    assert_eq!(mux.connection_count(), 2);
    assert!(mux.has_connection(&a.local_addr().unwrap()));
    assert!(mux.has_connection(&b.local_addr().unwrap()));

    mux.shutdown().await;
}

#[tokio::test]
async fn test_idle_client_is_evicted_and_recreated() {
    let config = MuxConfig {
        idle_timeout: Duration::from_millis(150),
        ..MuxConfig::default()
    };
    let (mux, _responder) = start_stun(config, ResponderConfig::default()).await;
    let client = client_socket(mux.local_addr()).await;
    let client_addr = client.local_addr().unwrap();

    client.send(&raw_binding_request(TXID)).await.unwrap();
    assert!(recv(&client, Duration::from_secs(2)).await.is_some());
    assert!(mux.has_connection(&client_addr));

    assert!(eventually(|| !mux.has_connection(&client_addr)).await);
    assert!(mux.stats().connections_evicted >= 1);

    // A later datagram from the same address is served by a fresh connection
    client.send(&raw_binding_request(TXID)).await.unwrap();
    let reply = recv(&client, Duration::from_secs(2))
        .await
        .expect("response after eviction");
    assert_eq!(&reply[8..20], &TXID);
    assert_eq!(mux.stats().connections_created, 2);

    mux.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_per_source_ip() {
    let responder_config = ResponderConfig {
        rate_limit: Some(2),
        ..ResponderConfig::default()
    };
    let (mux, responder) = start_stun(MuxConfig::default(), responder_config).await;
    let client = client_socket(mux.local_addr()).await;

    for _ in 0..4 {
        client.send(&raw_binding_request(TXID)).await.unwrap();
    }

    let mut replies = 0;
    while recv(&client, Duration::from_millis(300)).await.is_some() {
        replies += 1;
    }

    assert_eq!(replies, 2);
    let stats = responder.stats();
    assert_eq!(stats.requests_answered, 2);
    assert_eq!(stats.rate_limited, 2);

    mux.shutdown().await;
}

#[tokio::test]
async fn test_ipv6_loopback_reflexive_address() {
    let bind: SocketAddr = "[::1]:0".parse().unwrap();
    let Ok(probe) = std::net::UdpSocket::bind(bind) else {
        // No IPv6 on this host
        return;
    };
    drop(probe);

    for mode in [Ipv6XorMode::CookieOnly, Ipv6XorMode::Rfc5389] {
        let responder = std::sync::Arc::new(lodestar_stun::StunResponder::new(ResponderConfig {
            ipv6_xor_mode: mode,
            rate_limit: None,
        }));
        let mux = lodestar_transport::UdpMultiplexer::bind(bind, MuxConfig::default(), responder)
            .await
            .unwrap();
        mux.start().unwrap();

        let mut client = StunClient::bind("[::1]:0").await.unwrap();
        client.set_ipv6_xor_mode(mode);
        let mapped = client.get_mapped_address(mux.local_addr()).await.unwrap();
        assert_eq!(mapped, client.local_addr().unwrap());

        mux.shutdown().await;
    }
}

#[tokio::test]
async fn test_shutdown_stops_answering() {
    let (mux, _responder) = start_stun(MuxConfig::default(), ResponderConfig::default()).await;
    let client = client_socket(mux.local_addr()).await;

    client.send(&raw_binding_request(TXID)).await.unwrap();
    assert!(recv(&client, Duration::from_secs(2)).await.is_some());

    mux.shutdown().await;
    assert_eq!(mux.connection_count(), 0);

    let _ = client.send(&raw_binding_request(TXID)).await;
    assert!(recv(&client, Duration::from_millis(300)).await.is_none());
}
