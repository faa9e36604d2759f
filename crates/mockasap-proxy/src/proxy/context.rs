use crate::error::ProxyError;
use hyper::header::HOST;
use hyper::{HeaderMap, Method, Request, Uri};
use std::fmt;

/// Scheme the client used to reach the proxy for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP proxy request (absolute-form target)
    Http,
    /// Request decrypted from an intercepted `CONNECT` tunnel
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request attributes stubs are matched against.
///
/// The body is not part of it: it stays on the hyper request so it can be
/// streamed to the real destination untouched.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    /// Absolute target URL, e.g. `http://127.0.0.1:8080/secret.json`
    pub url: String,
    pub headers: HeaderMap,
    pub scheme: Scheme,
}

impl RequestInfo {
    /// Build request info from an absolute URL. The scheme is taken from the URL.
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap) -> Self {
        let url = url.into();
        let scheme = if url.starts_with("https://") {
            Scheme::Https
        } else {
            Scheme::Http
        };
        Self {
            method,
            url,
            headers,
            scheme,
        }
    }

    /// Extract request info from an inbound request.
    ///
    /// Proxy requests carry an absolute-form target. Origin-form targets are
    /// resolved against the `Host` header.
    pub fn from_request<B>(req: &Request<B>, scheme: Scheme) -> Result<Self, ProxyError> {
        let uri = req.uri();
        let url = if uri.scheme().is_some() && uri.authority().is_some() {
            uri.to_string()
        } else {
            let host = req
                .headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ProxyError::BadRequest(format!("no absolute target or Host header for {uri}"))
                })?;
            let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            format!("{scheme}://{host}{path}")
        };

        Ok(Self {
            method: req.method().clone(),
            url,
            headers: req.headers().clone(),
            scheme,
        })
    }

    /// Parse the target URL.
    pub fn uri(&self) -> Result<Uri, ProxyError> {
        self.url
            .parse::<Uri>()
            .map_err(|e| ProxyError::BadRequest(format!("invalid target {}: {e}", self.url)))
    }
}
