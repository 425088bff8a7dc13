//! Cookie deletion filter.

use chrono::{DateTime, Utc};

/// Which cookies to keep based on their persistence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionControl {
    #[default]
    IgnoreControl,
    SessionCookies,
    PersistentCookies,
}

/// Minimal view of a stored cookie used for filter evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalCookie {
    pub name: String,
    /// Cookie domain, without a leading dot.
    pub domain: String,
    pub creation: DateTime<Utc>,
    pub is_persistent: bool,
}

/// Structured description of the cookies a clear request deletes.
///
/// Every set field narrows the match; an empty filter matches all cookies.
/// The time bounds form the half-open interval `[created_after, created_before)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieDeletionFilter {
    pub created_after_time: Option<DateTime<Utc>>,
    pub created_before_time: Option<DateTime<Utc>>,
    pub host_name: Option<String>,
    pub cookie_name: Option<String>,
    pub including_domains: Option<Vec<String>>,
    pub excluding_domains: Option<Vec<String>>,
    pub session_control: SessionControl,
}

impl CookieDeletionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter scoped to cookies set for exactly `host`.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host_name: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn has_time_bounds(&self) -> bool {
        self.created_after_time.is_some() || self.created_before_time.is_some()
    }

    pub fn matches(&self, cookie: &CanonicalCookie) -> bool {
        if let Some(after) = self.created_after_time
            && cookie.creation < after
        {
            return false;
        }
        if let Some(before) = self.created_before_time
            && cookie.creation >= before
        {
            return false;
        }
        if let Some(host) = &self.host_name
            && !cookie.domain.eq_ignore_ascii_case(host)
        {
            return false;
        }
        if let Some(name) = &self.cookie_name
            && cookie.name != *name
        {
            return false;
        }
        if let Some(domains) = &self.including_domains
            && !domains.iter().any(|d| domain_matches(&cookie.domain, d))
        {
            return false;
        }
        if let Some(domains) = &self.excluding_domains
            && domains.iter().any(|d| domain_matches(&cookie.domain, d))
        {
            return false;
        }
        match self.session_control {
            SessionControl::IgnoreControl => true,
            SessionControl::SessionCookies => !cookie.is_persistent,
            SessionControl::PersistentCookies => cookie.is_persistent,
        }
    }
}

/// `domain` equals `registrable` or is one of its subdomains.
fn domain_matches(domain: &str, registrable: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    domain.eq_ignore_ascii_case(registrable)
        || domain
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", registrable.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cookie(domain: &str, age_hours: i64, persistent: bool) -> CanonicalCookie {
        CanonicalCookie {
            name: "sid".to_string(),
            domain: domain.to_string(),
            creation: Utc::now() - Duration::hours(age_hours),
            is_persistent: persistent,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = CookieDeletionFilter::new();
        assert!(filter.matches(&cookie("a.test", 1, true)));
        assert!(filter.matches(&cookie("b.test", 100, false)));
    }

    #[test]
    fn test_time_bounds_are_half_open() {
        let now = Utc::now();
        let mut c = cookie("a.test", 0, true);
        c.creation = now;

        let filter = CookieDeletionFilter {
            created_after_time: Some(now),
            created_before_time: Some(now + Duration::seconds(1)),
            ..CookieDeletionFilter::default()
        };
        assert!(filter.matches(&c));

        let filter = CookieDeletionFilter {
            created_before_time: Some(now),
            ..CookieDeletionFilter::default()
        };
        assert!(!filter.matches(&c));
    }

    #[test]
    fn test_host_and_domain_lists() {
        let filter = CookieDeletionFilter::for_host("a.test");
        assert!(filter.matches(&cookie("a.test", 1, true)));
        assert!(!filter.matches(&cookie("sub.a.test", 1, true)));

        let filter = CookieDeletionFilter {
            including_domains: Some(vec!["a.test".to_string()]),
            ..CookieDeletionFilter::default()
        };
        assert!(filter.matches(&cookie("sub.a.test", 1, true)));
        assert!(!filter.matches(&cookie("b.test", 1, true)));

        let filter = CookieDeletionFilter {
            excluding_domains: Some(vec!["a.test".to_string()]),
            ..CookieDeletionFilter::default()
        };
        assert!(!filter.matches(&cookie(".a.test", 1, true)));
        assert!(filter.matches(&cookie("b.test", 1, true)));
    }

    #[test]
    fn test_session_control() {
        let filter = CookieDeletionFilter {
            session_control: SessionControl::SessionCookies,
            ..CookieDeletionFilter::default()
        };
        assert!(filter.matches(&cookie("a.test", 1, false)));
        assert!(!filter.matches(&cookie("a.test", 1, true)));
    }
}
