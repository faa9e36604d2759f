//! Upstream HTTP client creation and configuration.

use super::response_ext::ProxyBody;
use super::tls::NoVerifier;
use crate::config::UpstreamConfig;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, ProxyBody>;

/// Create the shared upstream client with connection pooling.
pub fn create_http_client(config: &UpstreamConfig) -> HttpClient {
    // More than one rustls provider may be compiled in; pin ring. Fails only
    // if a provider is already installed, which is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false);

    let builder = hyper_rustls::HttpsConnectorBuilder::new();
    let https_connector = if config.tls_skip_verify {
        warn!("Upstream TLS certificate verification DISABLED (development/testing only)");
        builder
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth(),
            )
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        match builder.with_native_roots() {
            Ok(builder) => builder.https_or_http().enable_http1().wrap_connector(http_connector),
            Err(e) => {
                warn!("Failed to load native root certificates, HTTPS upstreams will fail verification: {}", e);
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_tls_config(
                        rustls::ClientConfig::builder()
                            .with_root_certificates(rustls::RootCertStore::empty())
                            .with_no_client_auth(),
                    )
                    .https_or_http()
                    .enable_http1()
                    .wrap_connector(http_connector)
            }
        }
    };

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .build(https_connector);

    info!(
        "Upstream pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
        config.max_idle_per_host, config.idle_timeout_secs, config.keepalive_timeout_secs
    );

    http_client
}
