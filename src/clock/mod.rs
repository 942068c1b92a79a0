//! Log-time clock for expiry checks and historical replay ticking.
//!
//! Live runs flush on a wall-clock interval owned by the parser task; this
//! clock only tracks "log time" — the most recent timestamp observed in the
//! input — so expiry comparisons and historical snapshots are deterministic
//! regardless of how fast the log is replayed.

use chrono::NaiveDateTime;

/// Minimum strictly-increasing advance on a start header before a
/// time-advance is published to dependents. Internal threshold; never
/// exposed through any output.
const NOTIFY_THRESHOLD_SECS: i64 = 3;

/// Tracks log time from line timestamps.
#[derive(Debug, Default)]
pub struct LogClock {
    latest: Option<NaiveDateTime>,
    last_published: Option<NaiveDateTime>,
}

impl LogClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent log time observed, if any.
    pub fn now(&self) -> Option<NaiveDateTime> {
        self.latest
    }

    /// Record a timestamp from any timestamped line. Time never goes
    /// backwards; stale timestamps are ignored.
    pub fn observe(&mut self, ts: NaiveDateTime) {
        if self.latest.is_none_or(|cur| ts > cur) {
            self.latest = Some(ts);
        }
    }

    /// Record a start-header timestamp and report whether dependents should
    /// be notified of a time advance (historical replay ticking).
    ///
    /// Returns true when the strictly-increasing log time has moved at least
    /// the notify threshold past the last published time.
    pub fn observe_start(&mut self, ts: NaiveDateTime) -> bool {
        let advanced = self.latest.is_none_or(|cur| ts > cur);
        self.observe(ts);

        if !advanced {
            return false;
        }

        match self.last_published {
            None => {
                self.last_published = Some(ts);
                true
            }
            Some(prev) => {
                if (ts - prev).num_seconds() >= NOTIFY_THRESHOLD_SECS {
                    self.last_published = Some(ts);
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::record::parse_log_time;

    fn ts(s: &str) -> NaiveDateTime {
        parse_log_time(s).unwrap()
    }

    #[test]
    fn test_observe_tracks_latest() {
        let mut clock = LogClock::new();
        assert!(clock.now().is_none());

        clock.observe(ts("2015/09/02 15:23:09"));
        assert_eq!(clock.now(), Some(ts("2015/09/02 15:23:09")));

        clock.observe(ts("2015/09/02 15:23:12"));
        assert_eq!(clock.now(), Some(ts("2015/09/02 15:23:12")));
    }

    #[test]
    fn test_observe_never_goes_backwards() {
        let mut clock = LogClock::new();
        clock.observe(ts("2015/09/02 15:23:12"));
        clock.observe(ts("2015/09/02 15:23:09"));
        assert_eq!(clock.now(), Some(ts("2015/09/02 15:23:12")));
    }

    #[test]
    fn test_first_start_publishes() {
        let mut clock = LogClock::new();
        assert!(clock.observe_start(ts("2015/09/02 15:23:09")));
    }

    #[test]
    fn test_publish_requires_threshold_advance() {
        let mut clock = LogClock::new();
        assert!(clock.observe_start(ts("2015/09/02 15:23:09")));
        // +1s and +2s: below the threshold.
        assert!(!clock.observe_start(ts("2015/09/02 15:23:10")));
        assert!(!clock.observe_start(ts("2015/09/02 15:23:11")));
        // +3s from last publish: notify.
        assert!(clock.observe_start(ts("2015/09/02 15:23:12")));
        // Threshold measured from the last published time.
        assert!(!clock.observe_start(ts("2015/09/02 15:23:14")));
        assert!(clock.observe_start(ts("2015/09/02 15:23:15")));
    }

    #[test]
    fn test_stale_start_never_publishes() {
        let mut clock = LogClock::new();
        assert!(clock.observe_start(ts("2015/09/02 15:23:09")));
        clock.observe(ts("2015/09/02 15:30:00"));
        // Start header behind current log time: no publish.
        assert!(!clock.observe_start(ts("2015/09/02 15:25:00")));
        assert_eq!(clock.now(), Some(ts("2015/09/02 15:30:00")));
    }
}
