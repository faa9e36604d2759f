//! Stub registration and lookup.
//!
//! ```
//! use mockasap_proxy::{respond_with, Matcher, StubRegistry};
//!
//! let stubs = StubRegistry::new();
//! stubs
//!     .http()
//!     .with_args(Matcher::url("secret.json"))
//!     .returns(respond_with::file("fixtures/secret.json"));
//! assert_eq!(stubs.len(), 1);
//! ```

mod builder;
mod registry;

pub use builder::{MatchedStub, StubBuilder};
pub use registry::{StubEntry, StubId, StubMatch, StubRegistry, StubScope};
