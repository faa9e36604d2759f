use super::registry::{StubId, StubRegistry, StubScope};
use crate::matcher::Matcher;
use crate::response::ResponseProvider;

/// First step of `registry.http().with_args(..).returns(..)`.
#[must_use = "a stub is only registered once `returns` is called"]
pub struct StubBuilder<'a> {
    registry: &'a StubRegistry,
    scope: StubScope,
}

/// A stub with its matcher chosen, waiting for a response provider.
#[must_use = "a stub is only registered once `returns` is called"]
pub struct MatchedStub<'a> {
    registry: &'a StubRegistry,
    scope: StubScope,
    matcher: Matcher,
}

impl<'a> StubBuilder<'a> {
    pub(crate) fn new(registry: &'a StubRegistry, scope: StubScope) -> Self {
        Self { registry, scope }
    }

    pub fn with_args(self, matcher: Matcher) -> MatchedStub<'a> {
        MatchedStub {
            registry: self.registry,
            scope: self.scope,
            matcher,
        }
    }
}

impl MatchedStub<'_> {
    /// Register the stub. It takes effect for the next lookup.
    pub fn returns(self, provider: ResponseProvider) -> StubId {
        self.registry.register_scoped(self.scope, self.matcher, provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RequestInfo;
    use crate::response::respond_with;
    use hyper::{HeaderMap, Method};

    #[test]
    fn test_fluent_registration() {
        let registry = StubRegistry::new();
        let id = registry
            .http()
            .with_args(Matcher::url("secret.json"))
            .returns(respond_with::file("fixtures/secret.json"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].scope, StubScope::Http);

        let request = RequestInfo::new(
            Method::GET,
            "http://api.example.com/secret.json",
            HeaderMap::new(),
        );
        assert_eq!(registry.lookup(&request).map(|m| m.id), Some(id));
    }

    #[test]
    fn test_https_builder_ignores_plain_http() {
        let registry = StubRegistry::new();
        registry
            .https()
            .with_args(Matcher::url("/login"))
            .returns(respond_with::file("login.html"));

        let plain = RequestInfo::new(Method::GET, "http://site/login", HeaderMap::new());
        let secure = RequestInfo::new(Method::GET, "https://site/login", HeaderMap::new());
        assert!(registry.lookup(&plain).is_none());
        assert!(registry.lookup(&secure).is_some());
    }
}
