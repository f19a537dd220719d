//! Adaptive scan cadence
//!
//! The worker's timer ticks at the minimum interval; this schedule decides
//! which ticks actually scan. A full page means the log is backlogged and
//! the interval halves; a partial or empty page means the log is caught up
//! and the interval doubles. The interval always stays within
//! `[min_interval, max_interval]`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PollSchedule {
    min_interval: Duration,
    max_interval: Duration,
    interval: Duration,
    next_allowed_run: Option<Instant>,
}

impl PollSchedule {
    /// Start at `min_interval` with the first run allowed immediately
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            min_interval,
            max_interval,
            interval: min_interval,
            next_allowed_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn next_allowed_run(&self) -> Option<Instant> {
        self.next_allowed_run
    }

    /// Whether a scan may start at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        match self.next_allowed_run {
            Some(next) => now >= next,
            None => true,
        }
    }

    /// Adjust after a successful scan of `entries` out of `page_size`
    ///
    /// Returns the new interval.
    pub fn record_page(&mut self, entries: usize, page_size: usize, now: Instant) -> Duration {
        if page_size > 0 && entries >= page_size {
            self.interval = (self.interval / 2).max(self.min_interval);
        } else {
            self.back_off();
        }
        self.next_allowed_run = Some(now + self.interval);
        self.interval
    }

    /// Adjust after a failed cycle: back off as if caught up
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.back_off();
        self.next_allowed_run = Some(now + self.interval);
        self.interval
    }

    fn back_off(&mut self) {
        self.interval = self
            .interval
            .checked_mul(2)
            .unwrap_or(self.max_interval)
            .min(self.max_interval);
    }
}
