//! Scan cadence: aligned scan boundaries, the daily summary gate, and the
//! first-run query policy.

use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Longest single sleep of the service loop between clock checks.
pub const MAX_SLEEP: StdDuration = StdDuration::from_secs(300);

/// Which objects a provider should report for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectQuery {
    /// Only objects whose name starts with this prefix (empty matches all).
    pub name_prefix: String,
    /// Modification window used when `full_scan` is false.
    pub lookback_days: u32,
    /// Ignore modification times and report every object.
    pub full_scan: bool,
}

impl ObjectQuery {
    /// Oldest modification time included, or `None` for a full scan.
    pub fn modified_since(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.full_scan {
            None
        } else {
            Some(now - Duration::days(i64::from(self.lookback_days)))
        }
    }

    /// Whether an object name passes the prefix filter.
    pub fn matches_name(&self, name: &str) -> bool {
        name.starts_with(&self.name_prefix)
    }
}

/// Query for the next scan.
///
/// A first run (empty export directory) captures every object; later runs
/// only look at recently modified ones.
pub fn scan_policy(export_dir_is_empty: bool, name_prefix: &str, lookback_days: u32) -> ObjectQuery {
    ObjectQuery {
        name_prefix: name_prefix.to_string(),
        lookback_days,
        full_scan: export_dir_is_empty,
    }
}

/// Start of the next `interval_hours` block after `now`, blocks being
/// aligned to midnight. Rolls over to the next midnight when the block
/// would start at hour 24 or later.
///
/// `interval_hours` must be in `1..=24`; config validation guarantees it.
pub fn next_run(interval_hours: u32, now: NaiveDateTime) -> NaiveDateTime {
    let interval = interval_hours.clamp(1, 24);
    let next_hour = (now.hour() / interval + 1) * interval;

    if next_hour >= 24 {
        (now.date() + Duration::days(1)).and_time(NaiveTime::MIN)
    } else {
        now.date().and_time(NaiveTime::MIN) + Duration::hours(i64::from(next_hour))
    }
}

/// How long to sleep before re-checking the clock, or `None` once `next`
/// has been reached.
pub fn sleep_slice(next: NaiveDateTime, now: NaiveDateTime, max: StdDuration) -> Option<StdDuration> {
    let remaining = (next - now).to_std().ok()?;
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(max))
}

/// Fires the daily summary once, the first time a cycle runs during the
/// configured hour.
#[derive(Debug, Clone)]
pub struct SummaryGate {
    notification_hour: u32,
    last_fired: Option<NaiveDate>,
}

impl SummaryGate {
    pub fn new(notification_hour: u32) -> Self {
        Self {
            notification_hour,
            last_fired: None,
        }
    }

    pub fn last_fired(&self) -> Option<NaiveDate> {
        self.last_fired
    }

    /// Whether the summary is due at `now`. Does not record anything.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now.hour() == self.notification_hour && self.last_fired != Some(now.date())
    }

    /// Returns true and records today's date when the summary is due.
    pub fn should_fire(&mut self, now: NaiveDateTime) -> bool {
        if self.is_due(now) {
            self.last_fired = Some(now.date());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    #[test]
    fn test_next_run_aligns_to_block() {
        assert_eq!(next_run(3, at(10, 2, 10)), at(10, 3, 0));
        assert_eq!(next_run(3, at(10, 4, 59)), at(10, 6, 0));
        assert_eq!(next_run(1, at(10, 13, 30)), at(10, 14, 0));
    }

    #[test]
    fn test_next_run_is_strictly_after_boundary() {
        assert_eq!(next_run(3, at(10, 3, 0)), at(10, 6, 0));
    }

    #[test]
    fn test_next_run_rolls_over_midnight() {
        assert_eq!(next_run(3, at(10, 23, 30)), at(11, 0, 0));
        assert_eq!(next_run(5, at(10, 21, 0)), at(11, 0, 0));
        assert_eq!(next_run(24, at(10, 0, 0)), at(11, 0, 0));
    }

    #[test]
    fn test_next_run_month_end() {
        let now = NaiveDate::from_ymd_opt(2024, 6, 30)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(next_run(2, now), expected);
    }

    #[test]
    fn test_sleep_slice_caps_and_stops() {
        let next = at(10, 3, 0);
        assert_eq!(sleep_slice(next, at(10, 2, 0), MAX_SLEEP), Some(MAX_SLEEP));
        assert_eq!(
            sleep_slice(next, at(10, 2, 58), MAX_SLEEP),
            Some(StdDuration::from_secs(120))
        );
        assert_eq!(sleep_slice(next, next, MAX_SLEEP), None);
        assert_eq!(sleep_slice(next, at(10, 4, 0), MAX_SLEEP), None);
    }

    #[test]
    fn test_summary_gate_fires_once_per_day() {
        let mut gate = SummaryGate::new(10);
        assert!(!gate.should_fire(at(10, 9, 0)));
        assert!(gate.should_fire(at(10, 10, 0)));
        assert!(!gate.should_fire(at(10, 10, 40)));
        assert_eq!(gate.last_fired(), Some(at(10, 0, 0).date()));
        assert!(!gate.should_fire(at(10, 11, 0)));
        assert!(gate.should_fire(at(11, 10, 5)));
    }

    #[test]
    fn test_scan_policy_first_run_is_full() {
        let first = scan_policy(true, "XX", 3);
        assert!(first.full_scan);
        assert_eq!(first.modified_since(at(10, 12, 0)), None);

        let later = scan_policy(false, "XX", 3);
        assert!(!later.full_scan);
        assert_eq!(later.modified_since(at(10, 12, 0)), Some(at(7, 12, 0)));
        assert!(later.matches_name("XX_ORDERS"));
        assert!(!later.matches_name("YY_ORDERS"));
        assert!(scan_policy(false, "", 3).matches_name("ANYTHING"));
    }
}
