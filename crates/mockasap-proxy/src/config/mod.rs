//! Configuration types for the mock proxy.
//!
//! Every field has a default, so `Config::default()` is a working setup and a
//! config file only needs the parts it changes.

mod listen;
mod stubs;
mod upstream;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use listen::{ListenConfig, TlsConfig};
pub use stubs::{MatchConfig, RawConfig, RespondConfig, StubConfig};
pub use upstream::UpstreamConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    /// How long `stop()` waits for in-flight exchanges before closing them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Stubs registered when the proxy is created, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stubs: Vec<StubConfig>,
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            upstream: UpstreamConfig::default(),
            tls: TlsConfig::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stubs: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    ///
    /// Relative `respond.file` paths are resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        if let Some(base) = path.parent() {
            for stub in &mut config.stubs {
                stub.resolve_paths(base);
            }
        }
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, anyhow::Error> {
        // An empty document means "all defaults"
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.host.trim().is_empty() {
            anyhow::bail!("listen.host must not be empty");
        }

        if self.upstream.request_timeout_secs == 0 {
            anyhow::bail!("upstream.request_timeout_secs must be greater than 0");
        }

        match (&self.tls.ca_cert_path, &self.tls.ca_key_path) {
            (Some(_), None) | (None, Some(_)) => anyhow::bail!(
                "tls.ca_cert_path and tls.ca_key_path must be provided together"
            ),
            _ => {}
        }

        for (index, stub) in self.stubs.iter().enumerate() {
            stub.compile().with_context(|| format!("stubs[{index}] is invalid"))?;
        }

        Ok(())
    }

    /// `host:port` the listener binds to.
    pub fn listen_addr(&self) -> String {
        if self.listen.host.contains(':') && !self.listen.host.starts_with('[') {
            format!("[{}]:{}", self.listen.host, self.listen.port)
        } else {
            format!("{}:{}", self.listen.host, self.listen.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
