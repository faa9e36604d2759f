//! Declarative stubs loaded from the config file.
//!
//! ```yaml
//! stubs:
//!   - protocol: http
//!     match:
//!       url: secret.json
//!       method: GET
//!     respond:
//!       file: fixtures/secret.json
//!   - match:
//!       any:
//!         - url: /health
//!         - headers: { x-canary: ~ }
//!     respond:
//!       raw:
//!         status: 204
//! ```

use crate::matcher::Matcher;
use crate::response::{respond_with, ResponseProvider};
use crate::stub::StubScope;
use anyhow::Context;
use base64::Engine;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StubConfig {
    #[serde(default)]
    pub protocol: StubScope,
    #[serde(default, rename = "match")]
    pub match_config: MatchConfig,
    pub respond: RespondConfig,
}

/// Every field that is set must hold; an empty block matches all requests.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    /// URL substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// URL regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Header name to exact value; `~` only requires presence
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<MatchConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<MatchConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<MatchConfig>>,
}

/// Exactly one of `file` or `raw`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RespondConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Binary body, standard base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl StubConfig {
    /// Build the runtime matcher and provider.
    pub fn compile(&self) -> anyhow::Result<(StubScope, Matcher, ResponseProvider)> {
        let matcher = self.match_config.compile().context("invalid `match`")?;
        let provider = self.respond.compile().context("invalid `respond`")?;
        Ok((self.protocol, matcher, provider))
    }

    /// Make a relative `respond.file` path relative to `base` instead of the
    /// working directory.
    pub(crate) fn resolve_paths(&mut self, base: &Path) {
        if let Some(file) = self.respond.file.as_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }
}

impl MatchConfig {
    pub fn compile(&self) -> anyhow::Result<Matcher> {
        let mut matchers = Vec::new();

        if let Some(url) = &self.url {
            matchers.push(Matcher::url(url.clone()));
        }
        if let Some(pattern) = &self.url_pattern {
            let matcher = Matcher::url_pattern(pattern)
                .with_context(|| format!("invalid url_pattern '{pattern}'"))?;
            matchers.push(matcher);
        }
        if let Some(method) = &self.method {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method '{method}'"))?;
            matchers.push(Matcher::method(method));
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            matchers.push(match value {
                Some(value) => Matcher::header_value(name.clone(), value.clone()),
                None => Matcher::header(name.clone()),
            });
        }
        if !self.all.is_empty() {
            let all = self
                .all
                .iter()
                .map(MatchConfig::compile)
                .collect::<anyhow::Result<Vec<_>>>()?;
            matchers.push(Matcher::all(all));
        }
        if !self.any.is_empty() {
            let any = self
                .any
                .iter()
                .map(MatchConfig::compile)
                .collect::<anyhow::Result<Vec<_>>>()?;
            matchers.push(Matcher::any(any));
        }
        if let Some(not) = &self.not {
            matchers.push(Matcher::not(not.compile()?));
        }

        Ok(if matchers.len() == 1 {
            matchers.remove(0)
        } else {
            Matcher::all(matchers)
        })
    }
}

impl RespondConfig {
    pub fn compile(&self) -> anyhow::Result<ResponseProvider> {
        match (&self.file, &self.raw) {
            (Some(path), None) => Ok(respond_with::file(path.clone())),
            (None, Some(raw)) => raw.compile(),
            (Some(_), Some(_)) => anyhow::bail!("set only one of 'file' or 'raw'"),
            (None, None) => anyhow::bail!("one of 'file' or 'raw' is required"),
        }
    }
}

impl RawConfig {
    pub fn compile(&self) -> anyhow::Result<ResponseProvider> {
        let status = StatusCode::from_u16(self.status)
            .with_context(|| format!("invalid status {}", self.status))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{name}'"))?;
            headers.append(name, value);
        }

        let body = match (&self.body, &self.body_base64) {
            (Some(_), Some(_)) => anyhow::bail!("set only one of 'body' or 'body_base64'"),
            (Some(text), None) => text.clone().into_bytes(),
            (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("body_base64 is not valid base64")?,
            (None, None) => Vec::new(),
        };

        Ok(respond_with::raw(status, headers, body))
    }
}
