//! Per-request dispatch.
//!
//! Every intercepted request goes through the same steps:
//! 1. build a [`RequestInfo`] snapshot
//! 2. look up the newest matching stub
//! 3. matched: fetch upstream first if the provider needs it, then produce the
//!    mock response
//! 4. unmatched: stream the exchange through untouched
//!
//! Failures become error responses for that exchange only.

use super::client::HttpClient;
use super::connect;
use super::context::{RequestInfo, Scheme};
use super::forwarding::{error_response, fetch_upstream, forward};
use super::headers::{MockHeadersExt, X_MOCKASAP_STUB};
use super::response_ext::{ProxyBody, ResponseExt};
use super::server::Lifecycle;
use super::tls::CertificateAuthority;
use crate::error::ProxyError;
use crate::response::MockResponse;
use crate::stub::{StubMatch, StubRegistry};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Shared state for every connection of one running proxy.
pub struct Dispatcher {
    registry: Arc<StubRegistry>,
    client: HttpClient,
    request_timeout: Duration,
    local_addr: SocketAddr,
    authority: Option<Arc<CertificateAuthority>>,
    lifecycle: watch::Receiver<Lifecycle>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<StubRegistry>,
        client: HttpClient,
        request_timeout: Duration,
        local_addr: SocketAddr,
        authority: Option<Arc<CertificateAuthority>>,
        lifecycle: watch::Receiver<Lifecycle>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            registry,
            client,
            request_timeout,
            local_addr,
            authority,
            lifecycle,
            tasks,
        }
    }

    pub(crate) fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.clone()
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// CA used for interception, `None` when tunnels are relayed opaquely.
    pub(crate) fn authority(&self) -> Option<&Arc<CertificateAuthority>> {
        self.authority.as_ref()
    }

    /// Entry point for every request read off a client connection.
    pub async fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
        scheme: Scheme,
    ) -> Result<Response<ProxyBody>, Infallible> {
        if req.method() == Method::CONNECT && scheme == Scheme::Http {
            return Ok(connect::handle_connect(self, req));
        }

        let start = Instant::now();
        let response = match self.dispatch(req, scheme).await {
            Ok(response) => response,
            Err(err) => {
                warn!("Request failed ({}): {}", err.kind(), err);
                error_response(&err)
            }
        };
        debug!(
            "Responded {} in {:.1}ms",
            response.status(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(response)
    }

    async fn dispatch(
        &self,
        req: Request<Incoming>,
        scheme: Scheme,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let info = RequestInfo::from_request(&req, scheme)?;
        debug!("Received request: {} {}", info.method, info.url);

        match self.registry.lookup(&info) {
            Some(found) => {
                info!(
                    "{} {} matched stub {} ({})",
                    info.method,
                    info.url,
                    found.id,
                    found.provider.kind()
                );
                let mock = self.respond_with_stub(&found, req, &info).await?;
                let mut response = mock.into_boxed();
                response.set_header_value(&X_MOCKASAP_STUB, &found.id.to_string());
                Ok(response)
            }
            None if self.targets_proxy(&info) => Err(ProxyError::BadRequest(format!(
                "{} is addressed to the proxy itself and no stub matched",
                info.url
            ))),
            None => forward(&self.client, req, &info, self.request_timeout).await,
        }
    }

    async fn respond_with_stub(
        &self,
        found: &StubMatch,
        req: Request<Incoming>,
        info: &RequestInfo,
    ) -> Result<MockResponse, ProxyError> {
        let upstream = if found.provider.requires_upstream() {
            let (parts, body) = req.into_parts();
            let fetched =
                fetch_upstream(&self.client, parts, body, info, self.request_timeout).await?;
            debug!(
                "Fetched upstream {} ({} frames) for stub {}",
                fetched.status,
                fetched.chunks.len(),
                found.id
            );
            Some(fetched)
        } else {
            None
        };
        found.provider.produce(info, upstream).await
    }

    /// Whether a plain HTTP request names the proxy's own listener, which
    /// would loop if forwarded.
    fn targets_proxy(&self, info: &RequestInfo) -> bool {
        if info.scheme != Scheme::Http {
            return false;
        }
        let Ok(uri) = info.uri() else {
            return false;
        };
        if uri.port_u16().unwrap_or(Scheme::Http.default_port()) != self.local_addr.port() {
            return false;
        }
        let Some(host) = uri.host() else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        host.parse::<IpAddr>()
            .map(|ip| ip.is_loopback() || ip.is_unspecified() || ip == self.local_addr.ip())
            .unwrap_or(false)
    }
}
