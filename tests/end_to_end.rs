//! Server and client exercised together over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use halfclose_echo::client::{self, ClientStats};
use halfclose_echo::config::{ClientArgs, Config, Dispatch};
use halfclose_echo::connection::Connection;
use halfclose_echo::error::{SessionError, Violation};
use halfclose_echo::protocols::echo::{
    EchoSession, EchoState, Initiator, InitiatorState, DEFAULT_BUFFER_SIZE, DEFAULT_PAYLOAD_SIZE,
};
use halfclose_echo::server::Acceptor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server(dispatch: Dispatch) -> SocketAddr {
    let config = Config {
        listen: "127.0.0.1:0".to_string(),
        dispatch,
        ..Config::default()
    };
    let acceptor = Acceptor::bind(&config).unwrap();
    let addr = acceptor.local_addr().unwrap();
    tokio::spawn(acceptor.serve());
    addr
}

#[tokio::test]
async fn test_zero_payload_exchange() {
    let addr = start_server(Dispatch::Sequential).await;

    let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
    let mut conn = initiator.connect(addr, None).await.unwrap();
    let summary = initiator.exchange(&mut conn).await.unwrap();

    assert_eq!(summary.sent, 100);
    assert_eq!(summary.received, 100);
    assert_eq!(initiator.state(), InitiatorState::Closed);
    assert!(initiator.peer_half_closed());
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_both_sides_end_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut session = EchoSession::new(Connection::new(stream), DEFAULT_BUFFER_SIZE);
        let result = session.run().await;
        (result, session)
    });

    let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
    let mut conn = initiator.connect(addr, None).await.unwrap();
    initiator.exchange(&mut conn).await.unwrap();

    let (result, session) = server.await.unwrap();
    let summary = result.unwrap();
    assert_eq!(summary.echoed, 100);
    assert_eq!(summary.discarded, 0);
    assert_eq!(session.state(), EchoState::Closed);
    assert!(session.peer_half_closed());
    assert!(session.connection().is_closed());

    assert_eq!(initiator.state(), InitiatorState::Closed);
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_arbitrary_payload_echoed_exactly() {
    let addr = start_server(Dispatch::Concurrent).await;

    let payload: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(37)).collect();
    let mut initiator = Initiator::with_payload(payload.into());
    let summary = initiator.run(addr, None).await.unwrap();
    assert_eq!(summary.received, 100);
}

#[tokio::test]
async fn test_data_after_server_half_close_not_echoed() {
    let addr = start_server(Dispatch::Sequential).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(&[0u8; 100]).await.unwrap();
    let mut echo = [0xffu8; 100];
    stream.read_exact(&mut echo).await.unwrap();
    assert_eq!(echo, [0u8; 100]);

    // Server has shut down writing; a second payload goes nowhere.
    stream.write_all(&[5u8; 100]).await.unwrap();
    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(n, 0);

    stream.shutdown().await.unwrap();

    // The sequential server is free again only once that session closed.
    let mut next = Initiator::new(DEFAULT_PAYLOAD_SIZE);
    next.run(addr, None).await.unwrap();
}

#[tokio::test]
async fn test_malformed_peer_is_protocol_violation() {
    // A peer that echoes, then sends a byte instead of closing.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 100];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(&buf).await.unwrap();
        // Wait for the client's shutdown-WR.
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        stream.write_all(b"!").await.unwrap();
        stream
    });

    let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
    let mut conn = initiator.connect(addr, None).await.unwrap();
    let err = initiator.exchange(&mut conn).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::ProtocolViolation(Violation::TrailingData(1))
    ));
    assert_eq!(initiator.state(), InitiatorState::Closed);
    assert!(conn.is_closed());
    drop(peer.await.unwrap());
}

#[tokio::test]
async fn test_bounded_client_loop() {
    let addr = start_server(Dispatch::Sequential).await;

    let args = ClientArgs::try_parse_from([
        "halfclose-client",
        "127.0.0.1",
        &addr.port().to_string(),
        "--iterations",
        "5",
    ])
    .unwrap();

    let stats = client::run(&args).await.unwrap();
    assert_eq!(
        stats,
        ClientStats {
            completed: 5,
            failed: 0
        }
    );
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let addr = start_server(Dispatch::Concurrent).await;

    // An idle connection holds one session open.
    let idle = TcpStream::connect(addr).await.unwrap();

    let exchange = async {
        let mut initiator = Initiator::new(DEFAULT_PAYLOAD_SIZE);
        initiator.run(addr, None).await
    };
    let summary = tokio::time::timeout(Duration::from_secs(5), exchange)
        .await
        .expect("exchange blocked behind idle connection")
        .unwrap();
    assert_eq!(summary.received, 100);

    drop(idle);
}

#[tokio::test]
async fn test_server_closes_after_client_close_without_payload() {
    let addr = start_server(Dispatch::Sequential).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Connection::new(stream);
    conn.shutdown_write().await.unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
    conn.close();
    conn.close();
    assert!(conn.is_closed());
}
