//! Talking to the real destination.
//!
//! Passthrough streams both bodies untouched. Transform stubs need the whole
//! upstream body, so [`fetch_upstream`] buffers it as a list of frames.

use super::client::HttpClient;
use super::context::RequestInfo;
use super::headers::{strip_hop_by_hop, strip_proxy_headers, MockHeadersExt, X_MOCKASAP_ERROR};
use super::response_ext::ProxyBody;
use crate::codec::CodecError;
use crate::error::ProxyError;
use crate::response::{ResponseBuilder, UpstreamResponse};
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, error};

/// Build the request sent upstream: absolute target, same method, headers
/// minus the proxy-directed ones, body forwarded as-is.
fn upstream_request<B>(
    mut parts: Parts,
    body: B,
    info: &RequestInfo,
) -> Result<Request<ProxyBody>, ProxyError>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    parts.uri = info.uri()?;
    strip_proxy_headers(&mut parts.headers);
    if !parts.headers.contains_key(HOST) {
        if let Some(authority) = parts.uri.authority() {
            if let Ok(value) = authority.as_str().parse() {
                parts.headers.insert(HOST, value);
            }
        }
    }
    Ok(Request::from_parts(parts, body.boxed()))
}

/// Forward unmodified and stream the response back.
///
/// The timeout bounds the wait for response headers; the streamed body is not
/// limited.
pub async fn forward(
    client: &HttpClient,
    req: Request<Incoming>,
    info: &RequestInfo,
    timeout: Duration,
) -> Result<Response<ProxyBody>, ProxyError> {
    let (parts, body) = req.into_parts();
    let upstream_req = upstream_request(parts, body, info)?;
    debug!("Passing through {} {}", info.method, info.url);

    let response = send(client, upstream_req, info, timeout).await?;
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, body.boxed()))
}

/// Forward and read the complete response.
///
/// The timeout covers headers and body together.
pub async fn fetch_upstream<B>(
    client: &HttpClient,
    parts: Parts,
    body: B,
    info: &RequestInfo,
    timeout: Duration,
) -> Result<UpstreamResponse, ProxyError>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    let upstream_req = upstream_request(parts, body, info)?;
    debug!("Fetching {} {} for transform", info.method, info.url);

    let fetch = async {
        let response = send(client, upstream_req, info, timeout).await?;
        let (parts, mut body) = response.into_parts();

        let mut chunks = Vec::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| {
                ProxyError::MalformedBody(CodecError::Incomplete(error_chain(&e)))
            })?;
            // Trailers are dropped
            if let Ok(data) = frame.into_data() {
                if !data.is_empty() {
                    chunks.push(data);
                }
            }
        }

        // The client already removed the wire framing
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        Ok::<_, ProxyError>(UpstreamResponse {
            status: parts.status,
            headers,
            chunks,
        })
    };

    tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| timeout_error(info, timeout))?
}

async fn send(
    client: &HttpClient,
    req: Request<ProxyBody>,
    info: &RequestInfo,
    timeout: Duration,
) -> Result<Response<Incoming>, ProxyError> {
    match tokio::time::timeout(timeout, client.request(req)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            let reason = error_chain(&e);
            error!("Failed to reach upstream {}: {}", info.url, reason);
            Err(ProxyError::UpstreamUnreachable {
                uri: info.url.clone(),
                reason,
            })
        }
        Err(_) => Err(timeout_error(info, timeout)),
    }
}

fn timeout_error(info: &RequestInfo, timeout: Duration) -> ProxyError {
    error!("Upstream {} timed out after {:?}", info.url, timeout);
    ProxyError::UpstreamTimeout {
        uri: info.url.clone(),
        timeout_secs: timeout.as_secs(),
    }
}

/// Flatten an error and its sources into one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Response sent to the client for a failed exchange.
///
/// A missing file answers with an empty 404; every other failure carries a
/// small JSON description.
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let mut response = match err {
        ProxyError::ResourceNotFound { .. } => ResponseBuilder::new(StatusCode::NOT_FOUND),
        _ => {
            let body = serde_json::json!({
                "error": err.to_string(),
                "kind": err.kind(),
            });
            ResponseBuilder::new(err.status_code())
                .header(CONTENT_TYPE.as_str(), "application/json")
                .body(body.to_string())
        }
    }
    .build_boxed();
    response.set_header_value(&X_MOCKASAP_ERROR, err.kind());
    response
}
