//! Constructors for [`ResponseProvider`]s.
//!
//! ```
//! use mockasap_proxy::respond_with;
//!
//! let page = respond_with::file("fixtures/inline.html");
//! let trimmed = respond_with::json_transformer(|mut value| {
//!     if let Some(items) = value["items"].as_array_mut() {
//!         items.truncate(1);
//!     }
//!     value
//! });
//! # let _ = (page, trimmed);
//! ```

use super::provider::{JsonTransformer, RawResponse, ResponseProvider, TransformError};
use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};
use serde_json::Value;
use std::path::PathBuf;

/// Serve a file. Content type is inferred from the extension.
pub fn file(path: impl Into<PathBuf>) -> ResponseProvider {
    ResponseProvider::File(path.into())
}

/// Fetch the real response and rewrite its JSON body.
pub fn json_transformer<F>(transform: F) -> ResponseProvider
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    ResponseProvider::JsonTransform(JsonTransformer::new(move |value| Ok(transform(value))))
}

/// Like [`json_transformer`], for transforms that can refuse their input.
pub fn try_json_transformer<F, E>(transform: F) -> ResponseProvider
where
    F: Fn(Value) -> Result<Value, E> + Send + Sync + 'static,
    E: Into<TransformError>,
{
    ResponseProvider::JsonTransform(JsonTransformer::new(move |value| {
        transform(value).map_err(Into::into)
    }))
}

/// Answer with a literal status, headers and body.
pub fn raw(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> ResponseProvider {
    ResponseProvider::Raw(RawResponse {
        status,
        headers,
        body: body.into(),
    })
}
