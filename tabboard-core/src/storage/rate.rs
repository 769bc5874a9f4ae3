//! Sliding-window write counter for the remote store's rate ceilings.
//!
//! The remote store throttles writes per minute and per hour. The adapter
//! does not block on these ceilings; it records every write here and logs
//! when a window is over its limit.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateStatus {
    Within,
    MinuteCeilingExceeded { count: usize, max: usize },
    HourCeilingExceeded { count: usize, max: usize },
}

pub struct WriteRateTracker {
    timestamps: Mutex<VecDeque<Instant>>,
    max_per_minute: usize,
    max_per_hour: usize,
}

impl WriteRateTracker {
    pub fn new(max_per_minute: usize, max_per_hour: usize) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            max_per_minute,
            max_per_hour,
        }
    }

    /// Record a write happening now.
    pub fn record(&self) -> RateStatus {
        self.record_at(Instant::now())
    }

    /// Record a write at `now` and report whether a ceiling is exceeded.
    /// The hour ceiling is reported in preference to the minute ceiling.
    pub fn record_at(&self, now: Instant) -> RateStatus {
        let mut timestamps = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        while timestamps
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= HOUR)
        {
            timestamps.pop_front();
        }
        timestamps.push_back(now);

        let hour_count = timestamps.len();
        if hour_count > self.max_per_hour {
            return RateStatus::HourCeilingExceeded {
                count: hour_count,
                max: self.max_per_hour,
            };
        }

        let minute_count = timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < MINUTE)
            .count();
        if minute_count > self.max_per_minute {
            return RateStatus::MinuteCeilingExceeded {
                count: minute_count,
                max: self.max_per_minute,
            };
        }
        RateStatus::Within
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_limits() {
        let tracker = WriteRateTracker::new(3, 10);
        let start = Instant::now();
        for i in 0..3 {
            assert_eq!(
                tracker.record_at(start + Duration::from_secs(i)),
                RateStatus::Within
            );
        }
    }

    #[test]
    fn test_minute_ceiling() {
        let tracker = WriteRateTracker::new(2, 100);
        let start = Instant::now();
        tracker.record_at(start);
        tracker.record_at(start + Duration::from_secs(1));
        assert_eq!(
            tracker.record_at(start + Duration::from_secs(2)),
            RateStatus::MinuteCeilingExceeded { count: 3, max: 2 }
        );
        // A minute later the window has slid past the first writes.
        assert_eq!(
            tracker.record_at(start + Duration::from_secs(62)),
            RateStatus::Within
        );
    }

    #[test]
    fn test_hour_ceiling() {
        let tracker = WriteRateTracker::new(100, 3);
        let start = Instant::now();
        for i in 0..3 {
            tracker.record_at(start + Duration::from_secs(i * 120));
        }
        assert_eq!(
            tracker.record_at(start + Duration::from_secs(600)),
            RateStatus::HourCeilingExceeded { count: 4, max: 3 }
        );
        assert_eq!(
            tracker.record_at(start + Duration::from_secs(3_900)),
            RateStatus::Within
        );
    }
}
