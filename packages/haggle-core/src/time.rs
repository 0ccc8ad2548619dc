//! Wall-clock helpers for store-assigned timestamps.
//!
//! Timestamps are Unix milliseconds. Within one conversation they strictly
//! increase, so stores assign them through [`monotonic_millis`] instead of
//! reading the clock directly.

/// Returns the current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns a timestamp strictly greater than `last`, reading the clock once.
///
/// When the clock has not advanced past the previous append — two messages
/// in the same millisecond, or a backwards step (NTP adjustment, VM
/// resume) — the result is `last + 1`, so a conversation's timestamps never
/// tie and never run backwards, and its display order carries append order.
pub fn monotonic_millis(last: Option<i64>) -> i64 {
    let now = now_millis();
    match last {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_reasonable() {
        let ts = now_millis();
        // Should be after 2024-01-01 in millis
        assert!(ts > 1_704_067_200_000, "Timestamp {} is too old", ts);
    }

    #[test]
    fn test_monotonic_without_floor() {
        let ts = monotonic_millis(None);
        assert!(ts > 1_704_067_200_000);
    }

    #[test]
    fn test_monotonic_steps_past_clock_regression() {
        let future = now_millis() + 60_000;
        assert_eq!(monotonic_millis(Some(future)), future + 1);
    }

    #[test]
    fn test_monotonic_breaks_same_millisecond_ties() {
        let floor = now_millis();
        assert!(monotonic_millis(Some(floor)) > floor);
    }

    #[test]
    fn test_monotonic_advances_past_old_floor() {
        let past = now_millis() - 60_000;
        assert!(monotonic_millis(Some(past)) > past);
    }
}
