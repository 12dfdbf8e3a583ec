//! Nanosecond clock helpers for expiry deadlines.
//!
//! Deadlines are absolute nanoseconds since the Unix epoch so that
//! snapshots written by one process remain meaningful to the next.
//! 0 is the sentinel for "never expires".

use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel deadline meaning "no expiry".
pub const NO_EXPIRY: i64 = 0;

/// Current wall-clock time in nanoseconds since the Unix epoch.
#[inline]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Returns `true` if the given deadline has passed.
#[inline]
pub fn is_expired(expires_at: i64) -> bool {
    expires_at != NO_EXPIRY && now_nanos() > expires_at
}

/// Converts a relative TTL to an absolute deadline. A zero or negative
/// TTL means no expiry.
#[inline]
pub fn expires_at_from_ttl(ttl_nanos: i64) -> i64 {
    if ttl_nanos > 0 {
        now_nanos().saturating_add(ttl_nanos)
    } else {
        NO_EXPIRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_expiry_never_expires() {
        assert!(!is_expired(NO_EXPIRY));
    }

    #[test]
    fn past_deadline_is_expired() {
        assert!(is_expired(1));
    }

    #[test]
    fn future_deadline_is_live() {
        assert!(!is_expired(now_nanos() + 1_000_000_000));
    }

    #[test]
    fn zero_and_negative_ttl_mean_no_expiry() {
        assert_eq!(expires_at_from_ttl(0), NO_EXPIRY);
        assert_eq!(expires_at_from_ttl(-5), NO_EXPIRY);
    }

    #[test]
    fn positive_ttl_lands_in_the_future() {
        let deadline = expires_at_from_ttl(60_000_000_000);
        assert!(deadline > now_nanos());
    }
}
