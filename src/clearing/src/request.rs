//! Canonical clear request.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::cookie::CookieDeletionFilter;
use crate::error::RequestError;
use crate::key::{StorageKey, StorageKeyPolicyMatcher};
use crate::mask::{QuotaStorageMask, RemoveDataMask};

/// Half-open deletion interval `[begin, end)`.
///
/// A missing `begin` means "since forever", a missing `end` means "until
/// now and beyond". The constructors fold the sentinel bounds (a begin at or
/// before the Unix epoch, an end at `DateTime::<Utc>::MAX_UTC`) into `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub const fn all_time() -> Self {
        Self {
            begin: None,
            end: None,
        }
    }

    pub fn new(begin: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            begin: begin.filter(|begin| *begin > DateTime::UNIX_EPOCH),
            end: end.filter(|end| *end < DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn since(begin: DateTime<Utc>) -> Self {
        Self::new(Some(begin), None)
    }

    pub fn between(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(Some(begin), Some(end))
    }

    /// True if the range covers every timestamp, sentinel bounds included.
    pub fn is_all_time(&self) -> bool {
        let normalised = Self::new(self.begin, self.end);
        normalised.begin.is_none() && normalised.end.is_none()
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.begin.is_none_or(|begin| time >= begin) && self.end.is_none_or(|end| time < end)
    }

    fn validate(&self) -> Result<(), RequestError> {
        if let (Some(begin), Some(end)) = (self.begin, self.end)
            && begin > end
        {
            return Err(RequestError::InvertedTimeRange {
                begin: begin.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.begin {
            Some(begin) => write!(f, "[{}, ", begin.to_rfc3339())?,
            None => write!(f, "[-inf, ")?,
        }
        match self.end {
            Some(end) => write!(f, "{})", end.to_rfc3339()),
            None => write!(f, "+inf)"),
        }
    }
}

/// Everything one clear operation needs, normalised by the router.
#[derive(Clone)]
pub struct DeletionRequest {
    pub remove_mask: RemoveDataMask,
    pub quota_storage_mask: QuotaStorageMask,
    /// Explicit key scope. Opaque when the request is not scoped to one key.
    pub storage_key: StorageKey,
    pub key_matcher: Option<StorageKeyPolicyMatcher>,
    pub cookie_filter: CookieDeletionFilter,
    pub range: TimeRange,
    pub perform_storage_cleanup: bool,
}

impl DeletionRequest {
    pub fn new(remove_mask: RemoveDataMask, quota_storage_mask: QuotaStorageMask) -> Self {
        Self {
            remove_mask,
            quota_storage_mask,
            storage_key: StorageKey::opaque(),
            key_matcher: None,
            cookie_filter: CookieDeletionFilter::default(),
            range: TimeRange::all_time(),
            perform_storage_cleanup: false,
        }
    }

    pub fn with_storage_key(mut self, storage_key: StorageKey) -> Self {
        self.storage_key = storage_key;
        self
    }

    pub fn with_key_matcher(mut self, matcher: StorageKeyPolicyMatcher) -> Self {
        self.key_matcher = Some(matcher);
        self
    }

    pub fn with_cookie_filter(mut self, filter: CookieDeletionFilter) -> Self {
        self.cookie_filter = filter;
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_storage_cleanup(mut self, perform_storage_cleanup: bool) -> Self {
        self.perform_storage_cleanup = perform_storage_cleanup;
        self
    }

    /// The explicit key, if the request is scoped to one.
    pub fn explicit_key(&self) -> Option<&StorageKey> {
        (!self.storage_key.is_opaque()).then_some(&self.storage_key)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.remove_mask.is_empty() {
            return Err(RequestError::EmptyRemoveMask);
        }
        if !self.storage_key.is_opaque() && self.key_matcher.is_some() {
            return Err(RequestError::KeyAndMatcher);
        }
        self.range.validate()?;

        if self.remove_mask.contains(RemoveDataMask::COOKIES) {
            if self.range.begin.is_some() && self.cookie_filter.created_after_time.is_some() {
                return Err(RequestError::CookieFilterTimeBound {
                    bound: "created-after",
                });
            }
            if self.range.end.is_some() && self.cookie_filter.created_before_time.is_some() {
                return Err(RequestError::CookieFilterTimeBound {
                    bound: "created-before",
                });
            }
        }

        if self
            .remove_mask
            .contains(RemoveDataMask::ATTRIBUTION_REPORTING_INTERNAL)
            && !self
                .remove_mask
                .contains(RemoveDataMask::ATTRIBUTION_REPORTING)
        {
            return Err(RequestError::AttributionInternalOnly);
        }
        Ok(())
    }

    /// Cookie filter with the request's time range merged in exactly once.
    pub fn merged_cookie_filter(&self) -> CookieDeletionFilter {
        let mut filter = self.cookie_filter.clone();
        if let Some(begin) = self.range.begin {
            filter.created_after_time = Some(begin);
        }
        if let Some(end) = self.range.end {
            filter.created_before_time = Some(end);
        }
        filter
    }
}

impl fmt::Debug for DeletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionRequest")
            .field("remove_mask", &self.remove_mask.to_string())
            .field("quota_storage_mask", &self.quota_storage_mask)
            .field("storage_key", &self.storage_key)
            .field("key_matcher", &self.key_matcher.is_some())
            .field("cookie_filter", &self.cookie_filter)
            .field("range", &self.range)
            .field("perform_storage_cleanup", &self.perform_storage_cleanup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::unprotected_origins_matcher;
    use chrono::Duration;

    fn origin_key() -> StorageKey {
        StorageKey::parse("https://example.test").unwrap()
    }

    #[test]
    fn test_key_and_matcher_are_exclusive() {
        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::ALL)
            .with_storage_key(origin_key())
            .with_key_matcher(unprotected_origins_matcher());
        assert_eq!(request.validate(), Err(RequestError::KeyAndMatcher));

        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::ALL)
            .with_key_matcher(unprotected_origins_matcher());
        assert!(request.validate().is_ok());

        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::ALL)
            .with_storage_key(origin_key());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_every_mask_rejects_key_with_matcher() {
        for bit in 0..17 {
            let mask =
                RemoveDataMask::from_bits_truncate(1 << bit) | RemoveDataMask::ATTRIBUTION_REPORTING;
            let request = DeletionRequest::new(mask, QuotaStorageMask::ALL)
                .with_storage_key(origin_key())
                .with_key_matcher(unprotected_origins_matcher());
            assert_eq!(request.validate(), Err(RequestError::KeyAndMatcher));
        }
    }

    #[test]
    fn test_empty_mask_rejected() {
        let request = DeletionRequest::new(RemoveDataMask::empty(), QuotaStorageMask::ALL);
        assert_eq!(request.validate(), Err(RequestError::EmptyRemoveMask));
    }

    #[test]
    fn test_cookie_filter_bound_conflict() {
        let now = Utc::now();
        let filter = CookieDeletionFilter {
            created_after_time: Some(now),
            ..CookieDeletionFilter::default()
        };
        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::empty())
            .with_cookie_filter(filter.clone())
            .with_range(TimeRange::since(now - Duration::hours(1)));
        assert_eq!(
            request.validate(),
            Err(RequestError::CookieFilterTimeBound {
                bound: "created-after"
            })
        );

        // Bounds carried only by the filter are fine.
        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::empty())
            .with_cookie_filter(filter);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_attribution_internal_requires_site_created() {
        let request = DeletionRequest::new(
            RemoveDataMask::ATTRIBUTION_REPORTING_INTERNAL,
            QuotaStorageMask::empty(),
        );
        assert_eq!(
            request.validate(),
            Err(RequestError::AttributionInternalOnly)
        );
    }

    #[test]
    fn test_inverted_range_rejected() {
        let now = Utc::now();
        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::empty())
            .with_range(TimeRange::between(now, now - Duration::seconds(1)));
        assert!(matches!(
            request.validate(),
            Err(RequestError::InvertedTimeRange { .. })
        ));
    }

    #[test]
    fn test_merged_cookie_filter() {
        let begin = Utc::now() - Duration::hours(1);
        let request = DeletionRequest::new(RemoveDataMask::COOKIES, QuotaStorageMask::empty())
            .with_cookie_filter(CookieDeletionFilter::for_host("example.test"))
            .with_range(TimeRange::since(begin));
        let merged = request.merged_cookie_filter();
        assert_eq!(merged.created_after_time, Some(begin));
        assert_eq!(merged.created_before_time, None);
        assert_eq!(merged.host_name.as_deref(), Some("example.test"));
    }

    #[test]
    fn test_time_range_contains() {
        let now = Utc::now();
        let range = TimeRange::between(now - Duration::hours(1), now);
        assert!(range.contains(now - Duration::minutes(30)));
        assert!(range.contains(now - Duration::hours(1)));
        assert!(!range.contains(now));
        assert!(TimeRange::all_time().contains(now));
    }

    #[test]
    fn test_sentinel_bounds_mean_all_time() {
        let range = TimeRange::new(Some(DateTime::UNIX_EPOCH), Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(range, TimeRange::all_time());
        assert!(range.is_all_time());

        let before_epoch = DateTime::UNIX_EPOCH - Duration::days(1);
        assert_eq!(TimeRange::since(before_epoch), TimeRange::all_time());

        let now = Utc::now();
        let range = TimeRange::between(DateTime::UNIX_EPOCH, now);
        assert_eq!(range.begin, None);
        assert_eq!(range.end, Some(now));
        assert!(!range.is_all_time());

        let literal = TimeRange {
            begin: Some(DateTime::UNIX_EPOCH),
            end: Some(DateTime::<Utc>::MAX_UTC),
        };
        assert!(literal.is_all_time());
    }
}
