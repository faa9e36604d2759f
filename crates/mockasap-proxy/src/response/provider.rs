//! Response providers: what a matched stub answers with.

use super::mime::content_type_for;
use crate::codec;
use crate::error::ProxyError;
use crate::proxy::RequestInfo;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use hyper::{HeaderMap, StatusCode};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Error type user transforms may return.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

static CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

type TransformFn = dyn Fn(Value) -> Result<Value, TransformError> + Send + Sync;

/// How a matched request is answered.
#[derive(Clone)]
pub enum ResponseProvider {
    /// Serve a file from disk with an inferred content type
    File(PathBuf),
    /// Fetch the real response and rewrite its JSON body
    JsonTransform(JsonTransformer),
    /// Canned status, headers and body
    Raw(RawResponse),
}

/// A user-supplied JSON rewrite.
#[derive(Clone)]
pub struct JsonTransformer {
    transform: Arc<TransformFn>,
}

/// A literal response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The real destination's answer, fully read.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub chunks: Vec<Bytes>,
}

/// What the proxy sends back for a matched request.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseProvider {
    /// Whether the real destination must be fetched before `produce` runs.
    pub fn requires_upstream(&self) -> bool {
        matches!(self, ResponseProvider::JsonTransform(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResponseProvider::File(_) => "file",
            ResponseProvider::JsonTransform(_) => "json-transform",
            ResponseProvider::Raw(_) => "raw",
        }
    }

    /// Produce the response for `request`.
    ///
    /// `upstream` must be present when [`requires_upstream`](Self::requires_upstream)
    /// is true and is ignored otherwise.
    pub async fn produce(
        &self,
        request: &RequestInfo,
        upstream: Option<UpstreamResponse>,
    ) -> Result<MockResponse, ProxyError> {
        match self {
            ResponseProvider::File(path) => {
                let body = tokio::fs::read(path)
                    .await
                    .map_err(|e| ProxyError::ResourceNotFound {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                debug!(
                    "Serving {} ({} bytes) for {}",
                    path.display(),
                    body.len(),
                    request.url
                );

                let mut headers = HeaderMap::new();
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(content_type_for(path)),
                );
                headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                Ok(MockResponse {
                    status: StatusCode::OK,
                    headers,
                    body: Bytes::from(body),
                })
            }
            ResponseProvider::JsonTransform(transformer) => {
                let upstream = upstream.ok_or_else(|| {
                    ProxyError::TransformFailure(format!(
                        "no upstream response fetched for {}",
                        request.url
                    ))
                })?;
                transformer.respond(upstream)
            }
            ResponseProvider::Raw(raw) => Ok(MockResponse {
                status: raw.status,
                headers: raw.headers.clone(),
                body: raw.body.clone(),
            }),
        }
    }
}

impl fmt::Debug for ResponseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseProvider::File(path) => f.debug_tuple("File").field(path).finish(),
            ResponseProvider::JsonTransform(_) => f.write_str("JsonTransform(..)"),
            ResponseProvider::Raw(raw) => f.debug_tuple("Raw").field(raw).finish(),
        }
    }
}

impl JsonTransformer {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self {
            transform: Arc::new(transform),
        }
    }

    /// Run the transform. Errors and panics both become `TransformFailure`.
    pub fn apply(&self, value: Value) -> Result<Value, ProxyError> {
        match catch_unwind(AssertUnwindSafe(|| (self.transform)(value))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ProxyError::TransformFailure(e.to_string())),
            Err(panic) => Err(ProxyError::TransformFailure(format!(
                "transform panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Decode the upstream body, rewrite it and re-encode it as plain JSON.
    ///
    /// The upstream status is kept; only the body and its framing change.
    pub fn respond(&self, upstream: UpstreamResponse) -> Result<MockResponse, ProxyError> {
        let decoded = codec::decode(upstream.chunks, &upstream.headers)?;
        let value: Value = serde_json::from_slice(&decoded.bytes).map_err(|e| {
            ProxyError::TransformFailure(format!("upstream body is not valid JSON: {e}"))
        })?;

        let transformed = self.apply(value)?;
        let body = serde_json::to_vec(&transformed).map_err(|e| {
            ProxyError::TransformFailure(format!("transform output is not serializable: {e}"))
        })?;

        // Validators describe the upstream bytes, not the rewritten body
        let mut headers = upstream.headers;
        headers.remove(ETAG);
        headers.remove(&CONTENT_MD5);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let (body, headers) = codec::encode(body, &headers);

        Ok(MockResponse {
            status: upstream.status,
            headers,
            body,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
