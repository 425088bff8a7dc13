//! Storage keys, storage policy and key matchers.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use url::{Origin, Url};

/// Identifies the partition of storage a piece of data belongs to.
///
/// A key with an opaque origin is the "empty" key: it scopes nothing and is
/// used by requests that are not tied to one origin.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    origin: Origin,
}

impl StorageKey {
    pub fn new(origin: Origin) -> Self {
        Self { origin }
    }

    pub fn opaque() -> Self {
        Self {
            origin: Origin::new_opaque(),
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self { origin: url.origin() }
    }

    /// Parse `input` as a URL and key it by its origin.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(|url| Self::from_url(&url))
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_opaque(&self) -> bool {
        !self.origin.is_tuple()
    }

    /// Host of the origin, `None` for opaque keys.
    pub fn host(&self) -> Option<String> {
        match &self.origin {
            Origin::Tuple(_, host, _) => Some(host.to_string()),
            Origin::Opaque(_) => None,
        }
    }
}

impl Default for StorageKey {
    fn default() -> Self {
        Self::opaque()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin.ascii_serialization())
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.origin.ascii_serialization())
    }
}

/// Profile policy about which origins are special.
pub trait SpecialStoragePolicy: Send + Sync {
    /// Protected origins (e.g. installed apps) survive ordinary clearing.
    fn is_storage_protected(&self, origin: &Origin) -> bool;

    fn is_storage_unlimited(&self, origin: &Origin) -> bool;

    fn is_storage_session_only(&self, origin: &Origin) -> bool;
}

/// Policy backed by in-memory origin sets.
#[derive(Default)]
pub struct InMemoryStoragePolicy {
    protected: RwLock<HashSet<Origin>>,
    unlimited: RwLock<HashSet<Origin>>,
    session_only: RwLock<HashSet<Origin>>,
}

impl InMemoryStoragePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_protected(&self, origin: Origin) {
        if let Ok(mut set) = self.protected.write() {
            set.insert(origin);
        }
    }

    pub fn add_unlimited(&self, origin: Origin) {
        if let Ok(mut set) = self.unlimited.write() {
            set.insert(origin);
        }
    }

    pub fn add_session_only(&self, origin: Origin) {
        if let Ok(mut set) = self.session_only.write() {
            set.insert(origin);
        }
    }
}

impl SpecialStoragePolicy for InMemoryStoragePolicy {
    fn is_storage_protected(&self, origin: &Origin) -> bool {
        self.protected
            .read()
            .map(|set| set.contains(origin))
            .unwrap_or(false)
    }

    fn is_storage_unlimited(&self, origin: &Origin) -> bool {
        self.unlimited
            .read()
            .map(|set| set.contains(origin))
            .unwrap_or(false)
    }

    fn is_storage_session_only(&self, origin: &Origin) -> bool {
        self.session_only
            .read()
            .map(|set| set.contains(origin))
            .unwrap_or(false)
    }
}

/// Caller supplied predicate deciding which keys a request deletes.
pub type StorageKeyPolicyMatcher =
    Arc<dyn Fn(&StorageKey, &dyn SpecialStoragePolicy) -> bool + Send + Sync>;

/// Plain key filter handed to subsystems that know nothing about policy.
pub type StorageKeyMatcher = Arc<dyn Fn(&StorageKey) -> bool + Send + Sync>;

/// Reduce the two ways of scoping a request to one plain filter.
///
/// `None` means every key matches, which lets backends take a fast path.
/// Callers must not pass both a non-opaque `key` and a `matcher`.
pub fn generic_storage_key_matcher(
    key: &StorageKey,
    matcher: Option<&StorageKeyPolicyMatcher>,
    policy: &Arc<dyn SpecialStoragePolicy>,
) -> Option<StorageKeyMatcher> {
    match matcher {
        Some(matcher) => {
            let matcher = matcher.clone();
            let policy = policy.clone();
            Some(Arc::new(move |candidate: &StorageKey| {
                matcher(candidate, policy.as_ref())
            }))
        }
        None if key.is_opaque() => None,
        None => {
            let key = key.clone();
            Some(Arc::new(move |candidate: &StorageKey| *candidate == key))
        }
    }
}

/// Matcher that keeps protected origins and deletes everything else.
pub fn unprotected_origins_matcher() -> StorageKeyPolicyMatcher {
    Arc::new(|key: &StorageKey, policy: &dyn SpecialStoragePolicy| {
        !policy.is_storage_protected(key.origin())
    })
}
