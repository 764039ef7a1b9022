//! Progress, speed, and ETA accounting for streaming transfers
//!
//! Emission is rate-limited so per-chunk bookkeeping never floods the
//! consumer; the terminal update is always delivered.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Minimum interval between progress emissions
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(150);

/// A point-in-time progress snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Completion in whole percent, 0..=100
    pub percent: u8,
    /// Bytes finished so far
    pub bytes_done: u64,
    /// Total bytes expected
    pub bytes_total: u64,
    /// Instantaneous speed, bytes per second
    pub bytes_per_second: u64,
    /// Estimated remaining time in milliseconds; 0 when the speed is unknown
    pub eta_millis: u64,
}

impl Progress {
    /// Compute a snapshot from raw counters and elapsed wall-clock time
    ///
    /// Speed is `bytes_done * 1000 / elapsed_millis`, guarded to 0 when no
    /// time has elapsed; the ETA is guarded to 0 when the speed is 0.
    #[must_use]
    pub fn compute(bytes_done: u64, bytes_total: u64, elapsed: Duration) -> Self {
        let percent = if bytes_total == 0 {
            100
        } else {
            ((u128::from(bytes_done) * 100) / u128::from(bytes_total)) as u8
        };

        let elapsed_millis = elapsed.as_millis() as u64;
        let bytes_per_second = if elapsed_millis == 0 {
            0
        } else {
            bytes_done.saturating_mul(1000) / elapsed_millis
        };

        let eta_millis = if bytes_per_second == 0 {
            0
        } else {
            bytes_total.saturating_sub(bytes_done).saturating_mul(1000) / bytes_per_second
        };

        Self {
            percent,
            bytes_done,
            bytes_total,
            bytes_per_second,
            eta_millis,
        }
    }
}

/// Tracks one file's streaming progress and rate-limits emissions
pub struct ProgressMeter {
    total: u64,
    done: u64,
    started: Instant,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressMeter {
    /// Create a meter for a payload of `total` bytes with the default
    /// emission interval
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self::with_interval(total, DEFAULT_PROGRESS_INTERVAL)
    }

    /// Create a meter with an explicit emission interval
    #[must_use]
    pub fn with_interval(total: u64, interval: Duration) -> Self {
        Self {
            total,
            done: 0,
            started: Instant::now(),
            last_emit: None,
            interval,
        }
    }

    /// Account for `delta` more bytes
    ///
    /// Returns a snapshot when enough wall-clock time has passed since the
    /// previous emission, `None` while the rate limit suppresses it.
    pub fn record(&mut self, delta: u64) -> Option<Progress> {
        self.done = self.done.saturating_add(delta);
        let due = self
            .last_emit
            .is_none_or(|last| last.elapsed() >= self.interval);
        if due {
            self.last_emit = Some(Instant::now());
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// The terminal update, emitted exactly once at completion regardless of
    /// the rate limit; always reports 100 percent
    pub fn finish(&mut self) -> Progress {
        self.last_emit = Some(Instant::now());
        let mut progress = self.snapshot();
        progress.percent = 100;
        progress
    }

    /// Bytes accounted so far
    #[must_use]
    pub fn bytes_done(&self) -> u64 {
        self.done
    }

    fn snapshot(&self) -> Progress {
        Progress::compute(self.done, self.total, self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_midway() {
        let p = Progress::compute(500, 1000, Duration::from_secs(1));
        assert_eq!(p.percent, 50);
        assert_eq!(p.bytes_done, 500);
        assert_eq!(p.bytes_total, 1000);
        assert_eq!(p.bytes_per_second, 500);
        assert_eq!(p.eta_millis, 1000);
    }

    #[test]
    fn test_compute_zero_elapsed_guards_speed() {
        let p = Progress::compute(500, 1000, Duration::ZERO);
        assert_eq!(p.bytes_per_second, 0);
        assert_eq!(p.eta_millis, 0);
    }

    #[test]
    fn test_compute_zero_total_is_complete() {
        let p = Progress::compute(0, 0, Duration::from_millis(10));
        assert_eq!(p.percent, 100);
        assert_eq!(p.eta_millis, 0);
    }

    #[test]
    fn test_compute_complete() {
        let p = Progress::compute(1000, 1000, Duration::from_secs(2));
        assert_eq!(p.percent, 100);
        assert_eq!(p.bytes_per_second, 500);
        assert_eq!(p.eta_millis, 0);
    }

    #[test]
    fn test_compute_large_values_do_not_overflow() {
        let p = Progress::compute(u64::MAX / 2, u64::MAX, Duration::from_secs(10));
        assert_eq!(p.percent, 49);
    }

    #[test]
    fn test_meter_first_record_emits() {
        let mut meter = ProgressMeter::new(100);
        let p = meter.record(10).expect("first record emits");
        assert_eq!(p.bytes_done, 10);
        assert_eq!(p.percent, 10);
    }

    #[test]
    fn test_meter_rate_limits_between_emissions() {
        let mut meter = ProgressMeter::with_interval(100, Duration::from_secs(3600));
        assert!(meter.record(10).is_some());
        // Inside the interval window every further record is suppressed
        assert!(meter.record(10).is_none());
        assert!(meter.record(10).is_none());
        assert_eq!(meter.bytes_done(), 30);
    }

    #[test]
    fn test_meter_zero_interval_emits_every_record() {
        let mut meter = ProgressMeter::with_interval(100, Duration::ZERO);
        for _ in 0..5 {
            assert!(meter.record(10).is_some());
        }
    }

    #[test]
    fn test_meter_finish_overrides_rate_limit() {
        let mut meter = ProgressMeter::with_interval(100, Duration::from_secs(3600));
        assert!(meter.record(50).is_some());
        assert!(meter.record(50).is_none());

        let terminal = meter.finish();
        assert_eq!(terminal.percent, 100);
        assert_eq!(terminal.bytes_done, 100);
        assert_eq!(terminal.bytes_total, 100);
    }

    #[test]
    fn test_meter_finish_zero_byte_payload() {
        let mut meter = ProgressMeter::new(0);
        let terminal = meter.finish();
        assert_eq!(terminal.percent, 100);
        assert_eq!(terminal.bytes_done, 0);
    }

    #[test]
    fn test_meter_bytes_done_monotonic() {
        let mut meter = ProgressMeter::with_interval(1000, Duration::ZERO);
        let mut last = 0;
        for delta in [100, 250, 50, 600] {
            let p = meter.record(delta).expect("emits");
            assert!(p.bytes_done >= last);
            last = p.bytes_done;
        }
        assert_eq!(last, 1000);
    }
}
