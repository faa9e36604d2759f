//! `MockProxy`: the handle tests hold.

use crate::config::Config;
use crate::error::ServerError;
use crate::proxy::ProxyServer;
use crate::stub::StubRegistry;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// An intercepting proxy with a stub registry.
///
/// ```no_run
/// use mockasap_proxy::{respond_with, Config, Matcher, MockProxy};
///
/// # async fn run() -> anyhow::Result<()> {
/// let proxy = MockProxy::new(Config::default())?;
/// proxy
///     .stub()
///     .http()
///     .with_args(Matcher::url("secret.json"))
///     .returns(respond_with::file("fixtures/secret.json"));
/// let addr = proxy.start()?;
/// // point a client at http://{addr} as its HTTP(S) proxy
/// proxy.stop().await?;
/// # let _ = addr;
/// # Ok(())
/// # }
/// ```
pub struct MockProxy {
    server: ProxyServer,
    registry: Arc<StubRegistry>,
}

impl MockProxy {
    /// Create a proxy. Stubs declared in `config.stubs` are registered in
    /// order before this returns.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let registry = Arc::new(StubRegistry::new());
        for (index, stub) in config.stubs.iter().enumerate() {
            let (scope, matcher, provider) = stub
                .compile()
                .with_context(|| format!("stubs[{index}] is invalid"))?;
            registry.register_scoped(scope, matcher, provider);
        }
        if !config.stubs.is_empty() {
            info!("Registered {} stubs from configuration", config.stubs.len());
        }

        let server = ProxyServer::new(config, Arc::clone(&registry))?;
        Ok(Self { server, registry })
    }

    /// Bind and start serving. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        self.server.start()
    }

    /// Drain and stop. Stubs stay registered, so the proxy can be restarted.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.server.stop().await
    }

    /// The stub registry. Changes apply to the next request.
    pub fn stub(&self) -> &StubRegistry {
        &self.registry
    }

    /// Listener address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// `http://host:port` of the running proxy, for client proxy settings.
    pub fn proxy_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{addr}"))
    }

    /// PEM of the CA that signs intercepted HTTPS connections. `None` when
    /// interception is disabled.
    pub fn ca_certificate_pem(&self) -> Option<String> {
        self.server
            .authority()
            .map(|authority| authority.certificate_pem().to_string())
    }
}
