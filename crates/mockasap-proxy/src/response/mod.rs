//! Response generation for matched stubs.
//!
//! - `provider` - `ResponseProvider` variants and their `produce` logic
//! - `respond_with` - constructors used when registering stubs
//! - `mime` - extension → content type table for file responses
//! - `builder` - buffered response builder shared by mocks and error replies

mod builder;
mod mime;
mod provider;
pub mod respond_with;

pub use builder::ResponseBuilder;
pub use mime::{content_type_for, DEFAULT_CONTENT_TYPE};
pub use provider::{
    JsonTransformer, MockResponse, RawResponse, ResponseProvider, TransformError,
    UpstreamResponse,
};
