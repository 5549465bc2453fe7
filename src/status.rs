//! Rate-limited progress reporting.
//!
//! Long loops ask [`StatusLogger::due`] before logging; a higher level waits
//! exponentially longer between reports, so inner loops stay quiet while
//! outer loops still report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Milliseconds between level-0 reports.
pub const DEFAULT_PERIOD_MS: u64 = 3000;

/// Shared progress clock. Safe to consult from many workers.
#[derive(Debug)]
pub struct StatusLogger {
    period_ms: u64,
    start: Instant,
    /// Milliseconds after `start` of the last due report.
    last: AtomicU64,
}

impl StatusLogger {
    pub fn new() -> Self {
        Self::with_period(DEFAULT_PERIOD_MS)
    }

    pub fn with_period(period_ms: u64) -> Self {
        Self {
            period_ms,
            start: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Whether more than `e^level * period` ms passed since the last due
    /// report. Claims the report when it is.
    pub fn due(&self, level: u32) -> bool {
        let now = self.now_ms();
        let last = self.last.load(Ordering::Relaxed);
        let wait = (level as f64).exp() * self.period_ms as f64;
        now.saturating_sub(last) as f64 > wait
            && self
                .last
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    /// Reset the report clock; returns ms since start.
    pub fn tick(&self) -> u64 {
        let now = self.now_ms();
        self.last.store(now, Ordering::Relaxed);
        now
    }

    pub fn since_last(&self) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(self.last.load(Ordering::Relaxed)))
    }

    pub fn since_start(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for StatusLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_always_due() {
        let status = StatusLogger::with_period(0);
        std::thread::sleep(Duration::from_millis(2));
        assert!(status.due(0));
    }

    #[test]
    fn long_period_is_not_due() {
        let status = StatusLogger::new();
        assert!(!status.due(0));
        assert!(!status.due(3));
        status.tick();
        assert!(status.since_last() < Duration::from_secs(1));
    }
}
