//! Listener and HTTPS interception configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// 0 picks an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8889
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// HTTPS interception settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Decrypt CONNECT tunnels with a locally issued certificate.
    /// When false, tunnels are relayed untouched.
    #[serde(default = "default_intercept")]
    pub intercept: bool,
    /// CA certificate (PEM). An ephemeral CA is generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<PathBuf>,
    /// CA private key (PEM), required with `ca_cert_path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_key_path: Option<PathBuf>,
}

fn default_intercept() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            intercept: default_intercept(),
            ca_cert_path: None,
            ca_key_path: None,
        }
    }
}
