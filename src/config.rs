//! Run configuration for the grouping pipeline.

use crate::error::{GnodeError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of classifier workers.
pub const DEFAULT_THREADS: usize = 4;

/// Default number of merged records per checkpoint.
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 5_000_000;

/// Default number of accumulation shards.
/// Many more shards than workers keeps lock collisions rare.
pub const DEFAULT_SHARDS: usize = 64;

/// Raw records handed to a worker per queue message.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Queue capacity in batches, per worker.
/// Total in flight = workers * 4 * batch size records.
pub const QUEUE_BATCHES_PER_WORKER: usize = 4;

/// Attempts for each checkpoint or output write (first try included).
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Base delay between write attempts; attempt `n` waits `n` times this.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Records read between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

/// Configuration for one grouping run.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub threads: usize,
    pub flush_threshold: u64,
    pub shards: usize,
    pub batch_size: usize,
    pub queue_batches_per_worker: usize,
    pub write_attempts: u32,
    pub retry_backoff: Duration,
    pub progress_interval: u64,
    /// Where checkpoints go; defaults to the output file's directory.
    pub checkpoint_dir: Option<PathBuf>,
    /// Leave checkpoints on disk after a successful merge.
    pub keep_checkpoints: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            shards: DEFAULT_SHARDS,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_batches_per_worker: QUEUE_BATCHES_PER_WORKER,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            checkpoint_dir: None,
            keep_checkpoints: false,
        }
    }
}

impl GroupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of classifier workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the number of merged records per checkpoint.
    pub fn with_flush_threshold(mut self, records: u64) -> Self {
        self.flush_threshold = records;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_progress_interval(mut self, records: u64) -> Self {
        self.progress_interval = records;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_keep_checkpoints(mut self, keep: bool) -> Self {
        self.keep_checkpoints = keep;
        self
    }

    /// Capacity of the reader → worker queue, in batches.
    pub fn queue_capacity(&self) -> usize {
        self.threads.max(1) * self.queue_batches_per_worker.max(1)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str); 6] = [
            (self.threads == 0, "thread count must be at least 1"),
            (self.flush_threshold == 0, "flush threshold must be at least 1"),
            (self.shards == 0, "shard count must be at least 1"),
            (self.batch_size == 0, "batch size must be at least 1"),
            (self.write_attempts == 0, "write attempts must be at least 1"),
            (self.progress_interval == 0, "progress interval must be at least 1"),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, message)) => Err(GnodeError::Config(message.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GroupConfig::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.flush_threshold, 5_000_000);
        assert_eq!(config.queue_capacity(), 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = GroupConfig::new()
            .with_threads(8)
            .with_flush_threshold(3)
            .with_checkpoint_dir("/tmp/ckpt")
            .with_keep_checkpoints(true);
        assert_eq!(config.threads, 8);
        assert_eq!(config.flush_threshold, 3);
        assert_eq!(config.checkpoint_dir, Some(PathBuf::from("/tmp/ckpt")));
        assert!(config.keep_checkpoints);
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(GroupConfig::new().with_threads(0).validate().is_err());
        assert!(GroupConfig::new().with_flush_threshold(0).validate().is_err());
        assert!(GroupConfig::new().with_write_attempts(0).validate().is_err());
    }
}
