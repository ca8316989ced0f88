//! Thread-safe progress logging at fixed record intervals.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts items and logs each time the count crosses a multiple of the interval.
///
/// Safe to share between threads.
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Create a tracker logging every 100,000 items.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            interval: 100_000,
            message: message.into(),
            count: AtomicU64::new(0),
        }
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Add to the count, logging once per interval boundary crossed.
    pub fn add(&self, additional: u64) {
        if additional == 0 {
            return;
        }
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let now = prev + additional;
        for i in (prev / self.interval + 1)..=(now / self.interval) {
            info!("{} {}", self.message, i * self.interval);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Log the final count unless it was just logged as a boundary.
    pub fn finish(&self) {
        let count = self.count();
        if count == 0 || count % self.interval != 0 {
            info!("{} {} (complete)", self.message, count);
        }
    }
}
