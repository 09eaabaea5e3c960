//! Read-time freshness policy.
//!
//! Stale entries are never deleted; they are only skipped.

use std::time::{Duration, SystemTime};

const SECONDS_PER_HOUR: u64 = 3600;

/// Decides whether a stored entry may be served without re-querying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreshnessPolicy {
    ttl: Option<Duration>,
}

impl FreshnessPolicy {
    /// Entries never go stale.
    pub const fn unbounded() -> Self {
        Self { ttl: None }
    }

    /// `None` means entries never go stale.
    pub fn from_ttl_hours(ttl_hours: Option<u64>) -> Self {
        Self {
            ttl: ttl_hours.map(|h| Duration::from_secs(h.saturating_mul(SECONDS_PER_HOUR))),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Fresh iff there is no TTL or `now - modified <= ttl`.
    ///
    /// A modification time after `now` counts as age zero.
    pub fn is_fresh(&self, modified: SystemTime, now: SystemTime) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => age(modified, now) <= ttl,
        }
    }
}

/// Age of an entry at `now`, clamped at zero.
pub fn age(modified: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_YEARS: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

    fn written_at() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_one_hour_boundary() {
        let policy = FreshnessPolicy::from_ttl_hours(Some(1));
        let t = written_at();

        assert!(policy.is_fresh(t, t + Duration::from_secs(3599)));
        assert!(policy.is_fresh(t, t + Duration::from_secs(3600)));
        assert!(!policy.is_fresh(t, t + Duration::from_secs(3601)));
    }

    #[test]
    fn test_no_ttl_is_permanent() {
        let policy = FreshnessPolicy::from_ttl_hours(None);
        let t = written_at();

        assert!(policy.is_fresh(t, t + TEN_YEARS));
        assert_eq!(policy, FreshnessPolicy::unbounded());
    }

    #[test]
    fn test_zero_ttl() {
        let policy = FreshnessPolicy::from_ttl_hours(Some(0));
        let t = written_at();

        assert!(policy.is_fresh(t, t));
        assert!(!policy.is_fresh(t, t + Duration::from_secs(1)));
    }

    #[test]
    fn test_future_mtime_is_fresh() {
        let policy = FreshnessPolicy::from_ttl_hours(Some(1));
        let t = written_at();

        assert!(policy.is_fresh(t + Duration::from_secs(60), t));
        assert_eq!(age(t + Duration::from_secs(60), t), Duration::ZERO);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let policy = FreshnessPolicy::from_ttl_hours(Some(u64::MAX));
        assert_eq!(policy.ttl(), Some(Duration::from_secs(u64::MAX)));
    }
}
