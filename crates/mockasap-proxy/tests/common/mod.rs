//! Shared helpers: local upstream servers and proxied clients.

#![allow(dead_code)]

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use mockasap_proxy::{Config, MockProxy};
use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const SECRET_JSON: &str = r#"{"val":"abc","items":[{"name":"a"},{"name":"b"}]}"#;

/// Config for tests: ephemeral port, short grace period.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.listen.port = 0;
    config.shutdown_grace_ms = 200;
    config
}

/// A started proxy and a client routed through it.
pub async fn start_proxy(config: Config) -> (MockProxy, reqwest::Client) {
    let proxy = MockProxy::new(config).unwrap();
    proxy.start().unwrap();
    let client = proxied_client(&proxy);
    (proxy, client)
}

/// A client that sends everything, HTTPS included, through `proxy` and
/// trusts its interception CA.
pub fn proxied_client(proxy: &MockProxy) -> reqwest::Client {
    let proxy_url = proxy.proxy_url().unwrap();
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .proxy(reqwest::Proxy::all(&proxy_url).unwrap())
        .timeout(TEST_TIMEOUT);
    if let Some(pem) = proxy.ca_certificate_pem() {
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem.as_bytes()).unwrap());
    }
    builder.build().unwrap()
}

/// A client that talks to upstreams directly.
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap()
}

/// Serve `handler` with hyper on an ephemeral port.
pub async fn spawn_upstream<F>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Response<Full<Bytes>> + Send + Sync + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let response = handler(req);
                    async move { Ok::<_, Infallible>(response) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

/// One step of a scripted raw response.
#[derive(Clone)]
pub enum Wire {
    Send(Vec<u8>),
    Pause(Duration),
}

/// Answer every connection by reading the request head and replaying
/// `script` byte for byte, then closing.
pub async fn spawn_raw_upstream(script: Vec<Wire>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let script = script.clone();
            tokio::spawn(async move {
                if read_request_head(&mut stream).await.is_none() {
                    return;
                }
                for step in script {
                    match step {
                        Wire::Send(bytes) => {
                            if stream.write_all(&bytes).await.is_err() {
                                return;
                            }
                            let _ = stream.flush().await;
                        }
                        Wire::Pause(duration) => tokio::time::sleep(duration).await,
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Accept connections and never answer them.
pub async fn spawn_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn read_request_head(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Some(head)
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A complete `Content-Length` response with a gzip-encoded JSON body.
pub fn gzip_json_response(json: &str) -> Vec<Wire> {
    let body = gzip(json.as_bytes());
    let mut bytes = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    bytes.extend_from_slice(&body);
    vec![Wire::Send(bytes)]
}

/// A chunked JSON response split in two chunks sent `gap` apart.
pub fn chunked_json_response(json: &str, gap: Duration) -> Vec<Wire> {
    let (first, second) = json.split_at(json.len() / 2);
    vec![
        Wire::Send(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:x}\r\n{}\r\n",
                first.len(),
                first
            )
            .into_bytes(),
        ),
        Wire::Pause(gap),
        Wire::Send(format!("{:x}\r\n{}\r\n0\r\n\r\n", second.len(), second).into_bytes()),
    ]
}

/// Serve `handler` over TLS with a certificate for `localhost` issued by
/// `authority`.
pub async fn spawn_tls_upstream<F>(
    authority: &mockasap_proxy::proxy::CertificateAuthority,
    handler: F,
) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Response<Full<Bytes>> + Send + Sync + Clone + 'static,
{
    let acceptor = tokio_rustls::TlsAcceptor::from(authority.server_config_for("localhost").unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let service = service_fn(move |req| {
                    let response = handler(req);
                    async move { Ok::<_, Infallible>(response) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .await;
            });
        }
    });
    addr
}

/// Send one absolute-form GET through the proxy on a raw socket and return the
/// response head and the body bytes exactly as they came off the wire.
pub async fn raw_proxy_get(proxy: SocketAddr, url: &str) -> (String, Vec<u8>) {
    let host = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default();
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("GET {url} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let head = String::from_utf8_lossy(&response[..split]).to_ascii_lowercase();
    (head, response[split + 4..].to_vec())
}

/// An upstream that reads one request and then holds the connection open
/// without answering. The first receiver fires once the request head has
/// arrived, the second once the peer has closed the connection.
pub async fn spawn_holding_upstream() -> (
    SocketAddr,
    tokio::sync::oneshot::Receiver<()>,
    tokio::sync::oneshot::Receiver<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (arrived_tx, arrived_rx) = tokio::sync::oneshot::channel();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        if read_request_head(&mut stream).await.is_none() {
            return;
        }
        let _ = arrived_tx.send(());
        let mut buf = [0u8; 256];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = closed_tx.send(());
    });
    (addr, arrived_rx, closed_rx)
}
