//! CONNECT handling: HTTPS interception or an opaque tunnel.

use super::context::Scheme;
use super::forwarding::error_response;
use super::handler::Dispatcher;
use super::response_ext::ProxyBody;
use super::server::{serve_http1, wait_until, Lifecycle};
use crate::error::ProxyError;
use crate::response::ResponseBuilder;
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

/// Destination named by a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let authority = uri.authority()?;
        let host = authority.host();
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: authority.port_u16().unwrap_or(Scheme::Https.default_port()),
        })
    }

    /// `https://host[:port]`, leaving out the default port.
    pub fn origin(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == Scheme::Https.default_port() {
            format!("https://{host}")
        } else {
            format!("https://{host}:{}", self.port)
        }
    }

    /// Rewrite an origin-form request target read inside the tunnel.
    pub fn absolute_uri(&self, uri: &Uri) -> Result<Uri, ProxyError> {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let absolute = format!("{}{}", self.origin(), path);
        absolute
            .parse()
            .map_err(|e| ProxyError::BadRequest(format!("invalid tunnelled target {absolute}: {e}")))
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Accept the CONNECT and take over the upgraded stream in a tracked task.
pub fn handle_connect(dispatcher: Arc<Dispatcher>, req: Request<Incoming>) -> Response<ProxyBody> {
    let Some(target) = TunnelTarget::from_uri(req.uri()) else {
        return error_response(&ProxyError::BadRequest(format!(
            "CONNECT target {} has no host",
            req.uri()
        )));
    };
    debug!("CONNECT {}", target);

    let tasks = dispatcher.tasks().clone();
    tasks.spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => run_tunnel(dispatcher, upgraded, target).await,
            Err(e) => warn!("CONNECT upgrade for {} failed: {}", target, e),
        }
    });

    ResponseBuilder::new(StatusCode::OK).build_boxed()
}

async fn run_tunnel(dispatcher: Arc<Dispatcher>, upgraded: Upgraded, target: TunnelTarget) {
    let io = TokioIo::new(upgraded);
    match dispatcher.authority().cloned() {
        Some(authority) => {
            let server_config = match authority.server_config_for(&target.host) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to issue certificate for {}: {}", target.host, e);
                    return;
                }
            };
            let tls = match TlsAcceptor::from(server_config).accept(io).await {
                Ok(tls) => tls,
                Err(e) => {
                    warn!("TLS handshake for {} failed: {}", target, e);
                    return;
                }
            };
            debug!("Intercepting HTTPS traffic for {}", target);
            serve_http1(tls, dispatcher, Some(Arc::new(target))).await;
        }
        None => relay(io, &target, dispatcher.lifecycle()).await,
    }
}

/// Copy bytes both ways without looking at them. Stubs never apply here.
async fn relay(
    mut client: TokioIo<Upgraded>,
    target: &TunnelTarget,
    mut lifecycle: watch::Receiver<Lifecycle>,
) {
    let mut upstream = match TcpStream::connect((target.host.as_str(), target.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Tunnel to {} failed: {}", target, e);
            return;
        }
    };

    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match result {
            Ok((sent, received)) => {
                debug!("Tunnel to {} closed ({} bytes up, {} bytes down)", target, sent, received)
            }
            Err(e) => debug!("Tunnel to {} ended: {}", target, e),
        },
        () = wait_until(&mut lifecycle, |state| *state == Lifecycle::Closed) => {
            debug!("Closing tunnel to {} on shutdown", target);
        }
    }
}

/// Answer a request read from an intercepted tunnel.
pub(crate) async fn handle_tunnelled(
    dispatcher: Arc<Dispatcher>,
    target: &TunnelTarget,
    mut req: Request<Incoming>,
) -> Result<Response<ProxyBody>, std::convert::Infallible> {
    match target.absolute_uri(req.uri()) {
        Ok(uri) => {
            *req.uri_mut() = uri;
            dispatcher.handle(req, Scheme::Https).await
        }
        Err(err) => Ok(error_response(&err)),
    }
}
