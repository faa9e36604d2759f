//! Conversions from proxy-side response types into the body type hyper serves.

use crate::response::{MockResponse, ResponseBuilder};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use std::convert::Infallible;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Extension trait for responses the proxy builds itself.
pub trait ResponseExt {
    /// Convert into a `Response` with a boxed body.
    fn into_boxed(self) -> Response<ProxyBody>;
}

impl ResponseExt for Response<Full<Bytes>> {
    fn into_boxed(self) -> Response<ProxyBody> {
        self.map(|b| BoxBody::new(b.map_err(|never: Infallible| match never {})))
    }
}

impl ResponseExt for MockResponse {
    fn into_boxed(self) -> Response<ProxyBody> {
        ResponseBuilder::new(self.status)
            .merge_headers(&self.headers)
            .body(self.body)
            .build_boxed()
    }
}
