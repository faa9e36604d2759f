//! Request matchers for stub selection.
//!
//! A [`Matcher`] is a closed set of predicates over [`RequestInfo`] with a single
//! evaluation function. Matchers are immutable values: cheap to clone, safe to
//! evaluate from any number of request tasks at once.
//!
//! ```
//! use hyper::Method;
//! use mockasap_proxy::Matcher;
//!
//! let matcher = Matcher::url("secret.json").and(Matcher::method(Method::GET));
//! # let _ = matcher;
//! ```

use crate::proxy::RequestInfo;
use hyper::Method;
use regex::Regex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Target URL contains the substring (case-sensitive)
    Url(String),
    /// Target URL matches the regular expression
    UrlPattern(UrlPattern),
    /// Request method equals
    Method(Method),
    /// Header is present and, when `value` is set, one of its values equals it
    Header { name: String, value: Option<String> },
    /// All inner matchers match (empty set matches everything)
    All(Vec<Matcher>),
    /// At least one inner matcher matches (empty set matches nothing)
    Any(Vec<Matcher>),
    /// Inner matcher does not match
    Not(Box<Matcher>),
}

/// Compiled URL regex. Two patterns are equal when their sources are.
#[derive(Debug, Clone)]
pub struct UrlPattern(Arc<Regex>);

impl UrlPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(Arc::new(Regex::new(pattern)?)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Matcher {
    pub fn url(substring: impl Into<String>) -> Self {
        Matcher::Url(substring.into())
    }

    pub fn url_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::UrlPattern(UrlPattern::new(pattern)?))
    }

    pub fn method(method: Method) -> Self {
        Matcher::Method(method)
    }

    /// Header presence. Names are case-insensitive.
    pub fn header(name: impl Into<String>) -> Self {
        Matcher::Header {
            name: name.into().to_ascii_lowercase(),
            value: None,
        }
    }

    /// Header with an exact value.
    pub fn header_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Matcher::Header {
            name: name.into().to_ascii_lowercase(),
            value: Some(value.into()),
        }
    }

    pub fn all(matchers: impl IntoIterator<Item = Matcher>) -> Self {
        Matcher::All(matchers.into_iter().collect())
    }

    pub fn any(matchers: impl IntoIterator<Item = Matcher>) -> Self {
        Matcher::Any(matchers.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(matcher: Matcher) -> Self {
        Matcher::Not(Box::new(matcher))
    }

    /// Narrow this matcher: both must match.
    pub fn and(self, other: Matcher) -> Self {
        match self {
            Matcher::All(mut matchers) => {
                matchers.push(other);
                Matcher::All(matchers)
            }
            this => Matcher::All(vec![this, other]),
        }
    }

    /// Evaluate against a request. Never fails; bad input simply does not match.
    pub fn matches(&self, request: &RequestInfo) -> bool {
        match self {
            Matcher::Url(substring) => request.url.contains(substring.as_str()),
            Matcher::UrlPattern(pattern) => pattern.is_match(&request.url),
            Matcher::Method(method) => request
                .method
                .as_str()
                .eq_ignore_ascii_case(method.as_str()),
            Matcher::Header { name, value } => {
                let mut values = request.headers.get_all(name.as_str()).iter().peekable();
                match value {
                    None => values.peek().is_some(),
                    Some(expected) => values.any(|v| v.as_bytes() == expected.as_bytes()),
                }
            }
            Matcher::All(matchers) => matchers.iter().all(|m| m.matches(request)),
            Matcher::Any(matchers) => matchers.iter().any(|m| m.matches(request)),
            Matcher::Not(inner) => !inner.matches(request),
        }
    }
}
