//! Diagnostic header names and the hop-by-hop set.
//!
//! The names are built at compile time, so inserting them never needs a
//! runtime `.parse()`.

use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use hyper::Response;

/// Id of the stub that produced a mocked response.
pub static X_MOCKASAP_STUB: HeaderName = HeaderName::from_static("x-mockasap-stub");
/// Error kind of a proxy-generated failure response.
pub static X_MOCKASAP_ERROR: HeaderName = HeaderName::from_static("x-mockasap-error");

static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
static PROXY_AUTHORIZATION: HeaderName = HeaderName::from_static("proxy-authorization");
static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Extension trait for stamping mockasap headers on responses.
pub trait MockHeadersExt {
    /// Insert a header with a dynamic string value.
    /// Returns false if the value is not a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> MockHeadersExt for Response<B> {
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}

/// Remove the headers addressed to the proxy itself before forwarding a request.
pub fn strip_proxy_headers(headers: &mut HeaderMap) {
    headers.remove(&PROXY_CONNECTION);
    headers.remove(&PROXY_AUTHORIZATION);
}

/// Remove connection-level headers from a buffered upstream response.
///
/// The body has already been de-framed when this runs, so `transfer-encoding`
/// no longer describes it.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(hyper::header::TRANSFER_ENCODING);
    headers.remove(hyper::header::CONNECTION);
    headers.remove(&KEEP_ALIVE);
    headers.remove(hyper::header::TRAILER);
    headers.remove(hyper::header::UPGRADE);
    headers.remove(&PROXY_CONNECTION);
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{CONTENT_ENCODING, TRANSFER_ENCODING};

    #[test]
    fn test_static_header_names() {
        assert_eq!(X_MOCKASAP_STUB.as_str(), "x-mockasap-stub");
        assert_eq!(X_MOCKASAP_ERROR.as_str(), "x-mockasap-error");
    }

    #[test]
    fn test_set_header_value_valid() {
        let mut response = Response::new(Full::new(Bytes::new()));
        assert!(response.set_header_value(&X_MOCKASAP_STUB, "42"));
        assert_eq!(response.headers().get(&X_MOCKASAP_STUB).unwrap(), "42");
    }

    #[test]
    fn test_set_header_value_invalid() {
        let mut response = Response::new(Full::new(Bytes::new()));
        assert!(!response.set_header_value(&X_MOCKASAP_ERROR, "invalid\nvalue"));
        assert!(response.headers().is_empty());
    }

    #[test]
    fn test_strip_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic eA=="));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        strip_proxy_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn test_strip_hop_by_hop_keeps_content_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert("connection", HeaderValue::from_static("close"));
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key(TRANSFER_ENCODING));
        assert!(!headers.contains_key("connection"));
        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "gzip");
    }
}
