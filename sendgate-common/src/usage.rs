//! Usage buckets and the send log
//!
//! Usage is bucketed per (identity, local date, local hour). A bucket is only
//! ever mutated through [`UsageRecord::apply`], which storage backends call
//! while holding whatever lock or transaction makes the upsert atomic.

use ahash::AHashMap;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Domain, IdentityId};

/// Local calendar date and hour-of-day a usage bucket covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub date: NaiveDate,
    pub hour: u32,
}

impl BucketKey {
    /// The bucket `instant` falls into, in the timezone given by `offset`
    #[must_use]
    pub fn at(instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = instant.with_timezone(&offset);
        Self {
            date: local.date_naive(),
            hour: local.hour(),
        }
    }
}

/// One recorded send, as handed to the store's atomic upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageIncrement {
    pub key: BucketKey,
    pub domain: Domain,
    pub at: DateTime<Utc>,
    /// Length of the burst window the increment is counted against
    pub burst_window: TimeDelta,
}

/// Send counters for one identity within one local hour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub identity: IdentityId,
    pub key: BucketKey,
    pub emails_sent: u64,
    pub domains_targeted: AHashMap<Domain, u64>,
    pub last_send_at: Option<DateTime<Utc>>,
    pub burst_count: u32,
    pub burst_window_start: Option<DateTime<Utc>>,
}

impl UsageRecord {
    #[must_use]
    pub fn new(identity: IdentityId, key: BucketKey) -> Self {
        Self {
            identity,
            key,
            emails_sent: 0,
            domains_targeted: AHashMap::new(),
            last_send_at: None,
            burst_count: 0,
            burst_window_start: None,
        }
    }

    /// Carry the burst state of the previous bucket into a fresh one, so a
    /// burst that straddles the top of the hour is still counted as one
    pub fn inherit_burst(&mut self, previous: &Self) {
        self.burst_count = previous.burst_count;
        self.burst_window_start = previous.burst_window_start;
        self.last_send_at = previous.last_send_at;
    }

    /// Whether the burst window has fully elapsed at `now`
    #[must_use]
    pub fn burst_window_elapsed(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        self.burst_window_start
            .is_none_or(|start| now - start >= window)
    }

    /// Count one send against this bucket
    pub fn apply(&mut self, increment: &UsageIncrement) {
        self.emails_sent = self.emails_sent.saturating_add(1);
        *self
            .domains_targeted
            .entry(increment.domain.clone())
            .or_default() += 1;

        if self.burst_window_elapsed(increment.at, increment.burst_window) {
            self.burst_count = 1;
            self.burst_window_start = Some(increment.at);
        } else {
            self.burst_count = self.burst_count.saturating_add(1);
        }

        self.last_send_at = Some(
            self.last_send_at
                .map_or(increment.at, |last| last.max(increment.at)),
        );
    }

    /// Sends to `domain` counted in this bucket
    #[must_use]
    pub fn sent_to(&self, domain: &Domain) -> u64 {
        self.domains_targeted.get(domain).copied().unwrap_or(0)
    }
}

/// Immutable audit entry for one send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogEntry {
    pub id: Ulid,
    pub identity: IdentityId,
    pub domain: Domain,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SendLogEntry {
    #[must_use]
    pub fn new(
        identity: IdentityId,
        domain: Domain,
        success: bool,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            identity,
            domain,
            success,
            error,
            timestamp,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    fn increment(domain: &str, instant: DateTime<Utc>) -> UsageIncrement {
        UsageIncrement {
            key: BucketKey::at(instant, FixedOffset::east_opt(0).unwrap()),
            domain: Domain::new(domain),
            at: instant,
            burst_window: TimeDelta::minutes(10),
        }
    }

    #[test]
    fn test_bucket_key_uses_local_offset() {
        let instant = at(23, 30);
        let utc = BucketKey::at(instant, FixedOffset::east_opt(0).unwrap());
        assert_eq!(utc.hour, 23);

        let plus_two = BucketKey::at(instant, FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(plus_two.hour, 1);
        assert_eq!(plus_two.date, utc.date.succ_opt().unwrap());
    }

    #[test]
    fn test_apply_counts_sends_and_domains() {
        let inc = increment("gmail.com", at(10, 0));
        let mut record = UsageRecord::new(IdentityId::from("a"), inc.key);

        record.apply(&inc);
        record.apply(&increment("gmail.com", at(10, 1)));
        record.apply(&increment("outlook.com", at(10, 2)));

        assert_eq!(record.emails_sent, 3);
        assert_eq!(record.sent_to(&Domain::new("gmail.com")), 2);
        assert_eq!(record.sent_to(&Domain::new("outlook.com")), 1);
        assert_eq!(record.sent_to(&Domain::new("yahoo.com")), 0);
        assert_eq!(record.last_send_at, Some(at(10, 2)));
    }

    #[test]
    fn test_burst_resets_after_window() {
        let inc = increment("gmail.com", at(10, 0));
        let mut record = UsageRecord::new(IdentityId::from("a"), inc.key);

        record.apply(&inc);
        record.apply(&increment("gmail.com", at(10, 5)));
        assert_eq!(record.burst_count, 2);
        assert_eq!(record.burst_window_start, Some(at(10, 0)));

        record.apply(&increment("gmail.com", at(10, 10)));
        assert_eq!(record.burst_count, 1);
        assert_eq!(record.burst_window_start, Some(at(10, 10)));
    }

    #[test]
    fn test_inherit_burst_spans_hour_boundary() {
        let first = increment("gmail.com", at(10, 58));
        let mut previous = UsageRecord::new(IdentityId::from("a"), first.key);
        previous.apply(&first);

        let next = increment("gmail.com", at(11, 1));
        let mut record = UsageRecord::new(IdentityId::from("a"), next.key);
        record.inherit_burst(&previous);
        record.apply(&next);

        assert_eq!(record.emails_sent, 1);
        assert_eq!(record.burst_count, 2);
        assert_eq!(record.burst_window_start, Some(at(10, 58)));
    }
}
