//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct, accept loop and shutdown
//! - `handler` - per-request dispatch: stub lookup, mock or passthrough
//! - `connect` - CONNECT interception and opaque tunnels
//! - `forwarding` - passthrough and buffered upstream fetches, error responses
//! - `context` - the request snapshot matchers see
//! - `client` - upstream HTTP client creation and configuration
//! - `tls` - interception CA and leaf certificates
//! - `network` - listener setup
//! - `headers` - diagnostic header names

mod client;
mod connect;
mod context;
mod forwarding;
mod handler;
mod headers;
mod network;
mod response_ext;
mod server;
mod tls;

#[cfg(test)]
mod tests;

pub use context::{RequestInfo, Scheme};
pub use forwarding::error_response;
pub use headers::{X_MOCKASAP_ERROR, X_MOCKASAP_STUB};
pub use response_ext::ProxyBody;
pub use server::ProxyServer;
pub use tls::{CertificateAuthority, TlsError};
