use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use std::convert::Infallible;
use std::str::FromStr;

/// Builds buffered responses sent by the proxy itself (mocks and errors).
pub struct ResponseBuilder {
    status: StatusCode,
    body: Option<Bytes>,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(status_code: StatusCode) -> Self {
        ResponseBuilder {
            status: status_code,
            body: None,
            headers: Default::default(),
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Insert a header; invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn merge_headers<H, K, V>(mut self, headers: H) -> Self
    where
        H: IntoIterator<Item = (K, V)>,
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        for (key, value) in headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value))
            {
                self.headers.append(name, value);
            }
        }
        self
    }

    pub fn build_full(self) -> Response<Full<Bytes>> {
        let payload = self.body.unwrap_or_default();
        let mut response = Response::new(Full::new(payload));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    pub fn build_boxed(self) -> Response<BoxBody<Bytes, hyper::Error>> {
        self.build_full()
            .map(|body| body.map_err(|never: Infallible| match never {}).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, CONTENT_TYPE};

    #[test]
    fn test_builder_with_status() {
        let response = ResponseBuilder::new(StatusCode::OK).build_boxed();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_builder_with_headers() {
        let response = ResponseBuilder::new(StatusCode::BAD_GATEWAY)
            .header("X-Custom-Header", "test-value")
            .header("Content-Type", "application/json")
            .header("bad header", "ignored")
            .build_boxed();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get("X-Custom-Header"),
            Some(&HeaderValue::from_static("test-value"))
        );
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn test_merge_headers_keeps_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let response = ResponseBuilder::new(StatusCode::OK)
            .header("key_B", "value_B")
            .merge_headers(&headers)
            .build_full();

        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
        assert_eq!(
            response.headers().get("key_B"),
            Some(&HeaderValue::from_static("value_B"))
        );
    }

    #[tokio::test]
    async fn test_build_full_body() {
        let response = ResponseBuilder::new(StatusCode::CREATED)
            .body("payload")
            .build_full();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"payload"));
    }
}
