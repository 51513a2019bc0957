//! Due-time arithmetic for automatic updates.
//!
//! All functions are pure; the scheduler supplies the clock.

use chrono::{DateTime, Duration, Utc};

use crate::storage::{Feed, UpdatePolicy};

/// Interval after which a feed is due again, or `None` if it is never
/// updated automatically.
///
/// A custom interval always wins. Feeds following the global policy are
/// never due when the global interval is 0.
pub fn effective_interval(policy: UpdatePolicy, global_minutes: u32) -> Option<Duration> {
    match policy {
        UpdatePolicy::Disabled => None,
        UpdatePolicy::Custom(minutes) if minutes > 0 => Some(Duration::minutes(i64::from(minutes))),
        UpdatePolicy::Custom(_) => None,
        UpdatePolicy::Global if global_minutes > 0 => {
            Some(Duration::minutes(i64::from(global_minutes)))
        }
        UpdatePolicy::Global => None,
    }
}

/// When a feed next becomes due.
///
/// - `None`: never (automatic updates disabled)
/// - `Some(t)` with `t <= now`: due now; a never-fetched feed is due at the
///   Unix epoch
pub fn next_due(feed: &Feed, global_minutes: u32) -> Option<DateTime<Utc>> {
    let interval = effective_interval(feed.update_policy, global_minutes)?;
    let Some(last) = feed.last_fetched else {
        return Some(DateTime::<Utc>::UNIX_EPOCH);
    };
    let last = DateTime::<Utc>::from_timestamp(last, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Some(last + interval)
}

/// Whether a scheduled tick at `now` should update the feed.
pub fn is_due(feed: &Feed, global_minutes: u32, now: DateTime<Utc>) -> bool {
    next_due(feed, global_minutes).is_some_and(|due| now >= due)
}

/// Whole minutes until the feed is due, rounded up. `Some(0)` when it is
/// already due, `None` when it is never updated automatically.
pub fn minutes_until_due(feed: &Feed, global_minutes: u32, now: DateTime<Utc>) -> Option<i64> {
    let due = next_due(feed, global_minutes)?;
    let seconds = (due - now).num_seconds();
    if seconds <= 0 {
        Some(0)
    } else {
        Some((seconds + 59) / 60)
    }
}
