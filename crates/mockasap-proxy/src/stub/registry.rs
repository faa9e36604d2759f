//! Ordered stub table with last-registration-wins lookup.

use super::builder::StubBuilder;
use crate::matcher::Matcher;
use crate::proxy::{RequestInfo, Scheme};
use crate::response::ResponseProvider;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Registration sequence number. Later registrations have larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StubId(u64);

impl StubId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which intercepted traffic a stub applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StubScope {
    /// Plain HTTP proxy requests only
    Http,
    /// Requests decrypted from intercepted HTTPS tunnels only
    Https,
    /// Both
    #[default]
    Any,
}

impl StubScope {
    pub fn admits(self, scheme: Scheme) -> bool {
        match self {
            StubScope::Any => true,
            StubScope::Http => scheme == Scheme::Http,
            StubScope::Https => scheme == Scheme::Https,
        }
    }
}

/// One registered stub.
#[derive(Debug, Clone)]
pub struct StubEntry {
    pub id: StubId,
    pub scope: StubScope,
    pub matcher: Matcher,
    pub provider: Arc<ResponseProvider>,
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct StubMatch {
    pub id: StubId,
    pub provider: Arc<ResponseProvider>,
}

/// Shared stub table.
///
/// Entries live in an immutable snapshot that is swapped on every change, so
/// a lookup sees either the whole table before a `register`/`reset` or the
/// whole table after it, never a mix.
pub struct StubRegistry {
    entries: RwLock<Arc<Vec<StubEntry>>>,
    next_id: AtomicU64,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fluent registration for plain HTTP traffic.
    pub fn http(&self) -> StubBuilder<'_> {
        StubBuilder::new(self, StubScope::Http)
    }

    /// Fluent registration for intercepted HTTPS traffic.
    pub fn https(&self) -> StubBuilder<'_> {
        StubBuilder::new(self, StubScope::Https)
    }

    /// Fluent registration for both schemes.
    pub fn any(&self) -> StubBuilder<'_> {
        StubBuilder::new(self, StubScope::Any)
    }

    /// Register a stub for both schemes.
    pub fn register(&self, matcher: Matcher, provider: ResponseProvider) -> StubId {
        self.register_scoped(StubScope::Any, matcher, provider)
    }

    /// Append a stub. Duplicates are allowed; the newest matching one wins.
    pub fn register_scoped(
        &self,
        scope: StubScope,
        matcher: Matcher,
        provider: ResponseProvider,
    ) -> StubId {
        let mut entries = self.entries.write();
        // Allocated under the write lock so ids follow table order
        let id = StubId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut updated = Vec::with_capacity(entries.len() + 1);
        updated.extend(entries.iter().cloned());
        updated.push(StubEntry {
            id,
            scope,
            matcher,
            provider: Arc::new(provider),
        });
        *entries = Arc::new(updated);

        debug!("Registered stub {} ({:?})", id, scope);
        id
    }

    /// Find the most recently registered stub that accepts `request`.
    pub fn lookup(&self, request: &RequestInfo) -> Option<StubMatch> {
        let snapshot = self.snapshot();
        snapshot
            .iter()
            .rev()
            .find(|entry| entry.scope.admits(request.scheme) && entry.matcher.matches(request))
            .map(|entry| StubMatch {
                id: entry.id,
                provider: Arc::clone(&entry.provider),
            })
    }

    /// Remove every stub.
    pub fn reset(&self) {
        let removed = {
            let mut entries = self.entries.write();
            std::mem::replace(&mut *entries, Arc::new(Vec::new()))
        };
        debug!("Stub registry reset ({} stubs removed)", removed.len());
    }

    /// Remove one stub. Returns false if it was not registered.
    pub fn remove(&self, id: StubId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|entry| entry.id == id) {
            return false;
        }
        let remaining: Vec<StubEntry> = entries
            .iter()
            .filter(|entry| entry.id != id)
            .cloned()
            .collect();
        *entries = Arc::new(remaining);
        true
    }

    /// Current entries in registration order.
    pub fn snapshot(&self) -> Arc<Vec<StubEntry>> {
        Arc::clone(&self.entries.read())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self::new()
    }
}
