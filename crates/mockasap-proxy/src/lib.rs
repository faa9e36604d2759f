//! mockasap: an HTTP(S)-intercepting proxy for tests.
//!
//! Point a client at the proxy, register stubs, and matching requests are
//! answered with a file, a canned response, or the real response with its JSON
//! body rewritten. Everything else passes through untouched.

pub mod codec;
pub mod config;
pub mod error;
pub mod matcher;
pub mod mock_proxy;
pub mod proxy;
pub mod response;
pub mod stub;

pub use config::Config;
pub use error::{ProxyError, ServerError};
pub use matcher::Matcher;
pub use mock_proxy::MockProxy;
pub use response::{respond_with, ResponseProvider};
pub use stub::{StubId, StubRegistry, StubScope};
