//! Server lifecycle tests.

use super::ProxyServer;
use crate::config::Config;
use crate::error::ServerError;
use crate::matcher::Matcher;
use crate::response::respond_with;
use crate::stub::StubRegistry;
use hyper::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_test::traced_test;

fn test_config() -> Config {
    let mut config = Config::default();
    config.listen.port = 0;
    config.tls.intercept = false;
    config.shutdown_grace_ms = 200;
    config
}

fn server_with(registry: Arc<StubRegistry>) -> ProxyServer {
    ProxyServer::new(test_config(), registry).unwrap()
}

/// Send one raw HTTP/1.1 request and read the response until close.
async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_start_binds_ephemeral_port() {
    let server = server_with(Arc::new(StubRegistry::new()));
    assert!(server.local_addr().is_none());

    let addr = server.start().unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), Some(addr));

    server.stop().await.unwrap();
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn test_double_start_rejected() {
    let server = server_with(Arc::new(StubRegistry::new()));
    let addr = server.start().unwrap();
    assert!(matches!(server.start(), Err(ServerError::AlreadyRunning(a)) if a == addr));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_frees_port() {
    let server = server_with(Arc::new(StubRegistry::new()));
    let addr = server.start().unwrap();
    server.stop().await.unwrap();
    server.stop().await.unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
    // The same port can be bound again right away
    let listener = super::network::create_listener(addr).unwrap();
    drop(listener);
}

#[tokio::test]
async fn test_restart_keeps_stubs() {
    let registry = Arc::new(StubRegistry::new());
    registry.register(
        Matcher::url("/ping"),
        respond_with::raw(StatusCode::OK, HeaderMap::new(), "pong"),
    );
    let server = server_with(Arc::clone(&registry));

    server.start().unwrap();
    server.stop().await.unwrap();
    let addr = server.start().unwrap();

    let response = raw_request(
        addr,
        "GET http://stubbed.test/ping HTTP/1.1\r\nHost: stubbed.test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("pong"), "{response}");
    server.stop().await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_stub_header_on_mocked_response() {
    let registry = Arc::new(StubRegistry::new());
    let id = registry.register(
        Matcher::url("/ping"),
        respond_with::raw(StatusCode::OK, HeaderMap::new(), "pong"),
    );
    let server = server_with(registry);
    let addr = server.start().unwrap();

    let response = raw_request(
        addr,
        "GET http://stubbed.test/ping HTTP/1.1\r\nHost: stubbed.test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(
        response.contains(&format!("x-mockasap-stub: {id}")),
        "{response}"
    );
    server.stop().await.unwrap();

    assert!(logs_contain("Listening on http://"));
    assert!(logs_contain(&format!("matched stub {id} (raw)")));
    assert!(logs_contain("stopped"));
}

#[tokio::test]
async fn test_request_to_proxy_itself_is_refused() {
    let server = server_with(Arc::new(StubRegistry::new()));
    let addr = server.start().unwrap();

    let response = raw_request(
        addr,
        &format!("GET / HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.contains("x-mockasap-error: bad-request"), "{response}");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_idle_keepalive_connections() {
    let server = server_with(Arc::new(StubRegistry::new()));
    let addr = server.start().unwrap();

    // An idle keep-alive connection must not hold up shutdown
    let mut idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), server.stop())
        .await
        .expect("stop did not finish")
        .unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), idle.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}
