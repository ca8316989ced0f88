//! Concurrent grouping of alignment records by node.
//!
//! One run reads the alignment stream on the calling thread, classifies and
//! accumulates on a pool of workers, and hands every full generation of
//! accumulated reads to a dedicated checkpoint writer:
//!
//! ```text
//! reader ──batches──▶ workers ──merge──▶ generation (N sharded maps)
//!                                            │ full after B records
//!                                            ▼
//!                                     checkpoint writer ──▶ batch_000000.json …
//! ```
//!
//! A worker reserves a slot in the current generation before inserting, so
//! every checkpoint except the last holds exactly `flush_threshold` records.
//! The generation is swapped out under a write lock, which waits for every
//! in-progress insert; workers keep filling the fresh generation while the
//! writer persists the old one.
//!
//! Lifecycle:
//!
//! ```text
//! Running ⇄ Flushing
//!    │
//!    ▼
//! Draining ──▶ Done
//!    │
//!    └───────▶ Failed (stream or write failure, from any state)
//! ```

use crate::checkpoint::{
    remove_checkpoints, write_checkpoint, AtomicWriter, CheckpointInfo, CheckpointNamer, Shard,
};
use crate::classify::{classify, Classification};
use crate::config::GroupConfig;
use crate::error::{GnodeError, Result};
use crate::index::NodeIndex;
use crate::merger::{MergeStats, Merger};
use crate::progress::ProgressTracker;
use crate::source::{RawRecord, RecordSource};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::thread;
use std::time::Instant;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AggregatorState {
    Idle = 0,
    Running = 1,
    Flushing = 2,
    Draining = 3,
    Done = 4,
    Failed = 5,
}

impl AggregatorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AggregatorState::Running,
            2 => AggregatorState::Flushing,
            3 => AggregatorState::Draining,
            4 => AggregatorState::Done,
            5 => AggregatorState::Failed,
            _ => AggregatorState::Idle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AggregatorState::Done | AggregatorState::Failed)
    }
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregatorState::Idle => "idle",
            AggregatorState::Running => "running",
            AggregatorState::Flushing => "flushing",
            AggregatorState::Draining => "draining",
            AggregatorState::Done => "done",
            AggregatorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(AggregatorState::Idle as u8))
    }

    fn get(&self) -> AggregatorState {
        AggregatorState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: AggregatorState) {
        let previous = AggregatorState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("Aggregator {} -> {}", previous, state);
        }
    }

    /// Idle -> Running; false if the run was already started.
    fn begin(&self) -> bool {
        let started = self
            .0
            .compare_exchange(
                AggregatorState::Idle as u8,
                AggregatorState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if started {
            debug!("Aggregator idle -> running");
        }
        started
    }

    /// Move `from` -> `to` only if currently in `from`.
    fn transition(&self, from: AggregatorState, to: AggregatorState) {
        if self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("Aggregator {} -> {}", from, to);
        }
    }
}

/// Counters and outcome of one grouping run.
#[derive(Debug, Default, Clone)]
pub struct GroupStats {
    /// Records pulled from the stream, malformed ones included.
    pub records_read: u64,
    pub decode_failures: u64,
    /// Records that touched at least one node of interest.
    pub records_merged: u64,
    pub unmatched_records: u64,
    /// Sum over merged records of distinct nodes touched.
    pub node_contributions: u64,
    /// Records per checkpoint, in checkpoint order.
    pub checkpoint_records: Vec<u64>,
    pub output_nodes: usize,
    pub output_reads: usize,
    pub elapsed_secs: f64,
}

impl fmt::Display for GroupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Group statistics:")?;
        writeln!(f, "  Records read:        {}", self.records_read)?;
        writeln!(f, "  Malformed records:   {}", self.decode_failures)?;
        writeln!(f, "  Records merged:      {}", self.records_merged)?;
        writeln!(f, "  Unmatched records:   {}", self.unmatched_records)?;
        writeln!(f, "  Node contributions:  {}", self.node_contributions)?;
        writeln!(f, "  Checkpoints written: {}", self.checkpoint_records.len())?;
        writeln!(f, "  Output nodes:        {}", self.output_nodes)?;
        writeln!(f, "  Output reads:        {}", self.output_reads)?;
        writeln!(f, "  Elapsed:             {:.2}s", self.elapsed_secs)?;
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    records_read: AtomicU64,
    decode_failures: AtomicU64,
    unmatched: AtomicU64,
}

/// Accumulated reads between two checkpoints.
struct Generation {
    shards: Vec<Mutex<Shard>>,
    /// Slots handed out; may run past the threshold while a swap is pending.
    reserved: AtomicU64,
    /// Records fully inserted.
    merged: AtomicU64,
    contributions: AtomicU64,
}

impl Generation {
    fn new(shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
            reserved: AtomicU64::new(0),
            merged: AtomicU64::new(0),
            contributions: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, node_id: &str) -> &Mutex<Shard> {
        let mut hasher = FxHasher::default();
        node_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn insert(&self, classification: Classification<'_>) {
        let Classification { nodes, summary } = classification;
        self.contributions
            .fetch_add(nodes.len() as u64, Ordering::Relaxed);
        for id in nodes {
            let mut shard = self.shard_for(id).lock();
            match shard.get_mut(id) {
                Some(reads) => reads.push(summary.clone()),
                None => {
                    shard.insert(id.to_string(), vec![summary.clone()]);
                }
            }
        }
    }

    fn into_flushed(self) -> Flushed {
        Flushed {
            records: self.merged.into_inner(),
            contributions: self.contributions.into_inner(),
            shards: self.shards.into_iter().map(|shard| shard.into_inner()).collect(),
        }
    }
}

/// A generation handed off for writing.
struct Flushed {
    records: u64,
    contributions: u64,
    shards: Vec<Shard>,
}

/// The shared accumulation state of one run.
struct Accumulator<'a> {
    index: &'a NodeIndex,
    threshold: u64,
    shard_count: usize,
    current: RwLock<Generation>,
    /// Held from a swap until the writer takes the swapped-out generation.
    flush_permit: Mutex<()>,
    swapped: AtomicU64,
    state: &'a StateCell,
}

impl<'a> Accumulator<'a> {
    fn new(index: &'a NodeIndex, config: &GroupConfig, state: &'a StateCell) -> Self {
        Self {
            index,
            threshold: config.flush_threshold,
            shard_count: config.shards,
            current: RwLock::new(Generation::new(config.shards)),
            flush_permit: Mutex::new(()),
            swapped: AtomicU64::new(0),
            state,
        }
    }

    /// Merge one matched record, handing off the generation it fills.
    fn merge(&self, classification: Classification<'_>, flush_tx: &Sender<Flushed>) -> Result<()> {
        loop {
            let generation = self.current.read();
            if generation.reserved.fetch_add(1, Ordering::AcqRel) < self.threshold {
                generation.insert(classification);
                let merged = generation.merged.fetch_add(1, Ordering::AcqRel) + 1;
                drop(generation);
                if merged == self.threshold {
                    self.swap_if_full(flush_tx)?;
                }
                return Ok(());
            }
            // Full: wait for (or perform) the swap, then retry in the new generation.
            drop(generation);
            self.swap_if_full(flush_tx)?;
        }
    }

    /// Swap out a full generation and block until the writer receives it.
    ///
    /// Only the permit holder may own a swapped-out generation, so at most one
    /// waits beside the one being written.
    fn swap_if_full(&self, flush_tx: &Sender<Flushed>) -> Result<()> {
        let _permit = self.flush_permit.lock();
        let mut current = self.current.write();
        // No reader holds the lock, so every reserved slot below the threshold is inserted.
        if current.merged.load(Ordering::Acquire) < self.threshold {
            return Ok(());
        }
        self.state
            .transition(AggregatorState::Running, AggregatorState::Flushing);
        let full = std::mem::replace(&mut *current, Generation::new(self.shard_count));
        drop(current);
        self.swapped.fetch_add(1, Ordering::Relaxed);
        hand_off(flush_tx, full.into_flushed())
    }

    /// Hand off whatever is left, if anything.
    fn flush_remaining(&self, flush_tx: &Sender<Flushed>) -> Result<()> {
        let _permit = self.flush_permit.lock();
        let mut current = self.current.write();
        if current.merged.load(Ordering::Acquire) == 0 {
            return Ok(());
        }
        let rest = std::mem::replace(&mut *current, Generation::new(self.shard_count));
        drop(current);
        self.swapped.fetch_add(1, Ordering::Relaxed);
        hand_off(flush_tx, rest.into_flushed())
    }
}

fn hand_off(flush_tx: &Sender<Flushed>, flushed: Flushed) -> Result<()> {
    flush_tx.send(flushed).map_err(|_| {
        GnodeError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "checkpoint writer stopped",
        ))
    })
}

/// Groups one alignment stream into a single output file.
pub struct Aggregator<'a> {
    index: &'a NodeIndex,
    config: GroupConfig,
    state: StateCell,
}

impl<'a> Aggregator<'a> {
    pub fn new(index: &'a NodeIndex, config: GroupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            index,
            config,
            state: StateCell::new(),
        })
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn state(&self) -> AggregatorState {
        self.state.get()
    }

    /// Consume `source` and write the grouped result to `output`.
    ///
    /// On failure no output is written; checkpoints already on disk are left
    /// in place.
    pub fn run<S>(&self, source: &mut S, output: &Path) -> Result<GroupStats>
    where
        S: RecordSource + ?Sized,
    {
        if !self.state.begin() {
            return Err(GnodeError::Config(format!(
                "aggregator already used (state {})",
                self.state.get()
            )));
        }
        match self.execute(source, output) {
            Ok(stats) => {
                self.state.set(AggregatorState::Done);
                Ok(stats)
            }
            Err(e) => {
                self.state.set(AggregatorState::Failed);
                Err(e)
            }
        }
    }

    fn execute<S>(&self, source: &mut S, output: &Path) -> Result<GroupStats>
    where
        S: RecordSource + ?Sized,
    {
        let start = Instant::now();
        let config = &self.config;
        let namer = CheckpointNamer::for_output(output, config.checkpoint_dir.as_deref())?;
        let writer = AtomicWriter::new(config.write_attempts, config.retry_backoff);

        info!(
            "Grouping {} against {} nodes ({} workers, {} records per checkpoint)",
            source.describe(),
            self.index.len(),
            config.threads,
            config.flush_threshold
        );

        let counters = Counters::default();
        let failed = AtomicBool::new(false);
        let accumulator = Accumulator::new(self.index, config, &self.state);
        let progress =
            ProgressTracker::new("Read records").with_interval(config.progress_interval);
        let format = source.format();

        let (batch_tx, batch_rx) = bounded::<Vec<RawRecord>>(config.queue_capacity());
        // Rendezvous: a swapped-out generation stays with its worker until the
        // writer is ready for it.
        let (flush_tx, flush_rx) = bounded::<Flushed>(0);

        let (read_result, worker_results, written) = thread::scope(|scope| {
            let writer_handle = scope.spawn(|| {
                let result = write_generations(flush_rx, &namer, self.index, &writer, &self.state);
                if result.is_err() {
                    failed.store(true, Ordering::Release);
                }
                result
            });

            let workers: Vec<_> = (0..config.threads)
                .map(|_| {
                    let batch_rx = batch_rx.clone();
                    let flush_tx = flush_tx.clone();
                    let (accumulator, counters, failed) = (&accumulator, &counters, &failed);
                    scope.spawn(move || {
                        let result = classify_batches(
                            batch_rx,
                            format,
                            accumulator,
                            counters,
                            failed,
                            &flush_tx,
                        );
                        if result.is_err() {
                            failed.store(true, Ordering::Release);
                        }
                        result
                    })
                })
                .collect();
            drop(batch_rx);

            let read_result =
                read_batches(source, batch_tx, config.batch_size, &failed, &progress, &counters);

            let worker_results: Vec<Result<()>> = workers
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect();

            if read_result.is_ok() && !failed.load(Ordering::Acquire) {
                self.state.set(AggregatorState::Draining);
                if accumulator.flush_remaining(&flush_tx).is_err() {
                    failed.store(true, Ordering::Release);
                }
            }
            drop(flush_tx);

            let written = writer_handle
                .join()
                .unwrap_or_else(|e| std::panic::resume_unwind(e));
            (read_result, worker_results, written)
        });

        // Report the root cause: stream first, then the writer, then workers.
        read_result?;
        let written = written?;
        for result in worker_results {
            result?;
        }
        progress.finish();

        let checkpoints: Vec<_> = written.iter().map(|info| info.path.clone()).collect();
        let merge_stats: MergeStats = Merger::new(config.threads)
            .with_writer(writer)
            .merge(&checkpoints, output)?;
        if !config.keep_checkpoints {
            remove_checkpoints(&checkpoints);
        }

        let records_merged: u64 = written.iter().map(|info| info.records).sum();
        let stats = GroupStats {
            records_read: counters.records_read.load(Ordering::Relaxed),
            decode_failures: counters.decode_failures.load(Ordering::Relaxed),
            records_merged,
            unmatched_records: counters.unmatched.load(Ordering::Relaxed),
            node_contributions: written.iter().map(|info| info.contributions).sum(),
            checkpoint_records: written.iter().map(|info| info.records).collect(),
            output_nodes: merge_stats.nodes,
            output_reads: merge_stats.reads,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            "Grouped {} records into {} nodes in {:.2}s",
            stats.records_merged, stats.output_nodes, stats.elapsed_secs
        );
        Ok(stats)
    }
}

/// Reader loop: batch raw records onto the worker queue.
fn read_batches<S>(
    source: &mut S,
    batch_tx: Sender<Vec<RawRecord>>,
    batch_size: usize,
    failed: &AtomicBool,
    progress: &ProgressTracker,
    counters: &Counters,
) -> Result<()>
where
    S: RecordSource + ?Sized,
{
    let mut batch = Vec::with_capacity(batch_size);
    loop {
        if failed.load(Ordering::Acquire) {
            debug!("Reader stopping after downstream failure");
            return Ok(());
        }
        let raw = match source.next_raw()? {
            Some(raw) => raw,
            None => break,
        };
        batch.push(raw);
        if batch.len() == batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            counters
                .records_read
                .fetch_add(full.len() as u64, Ordering::Relaxed);
            progress.add(full.len() as u64);
            if batch_tx.send(full).is_err() {
                return Ok(());
            }
        }
    }
    if !batch.is_empty() {
        counters
            .records_read
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        progress.add(batch.len() as u64);
        let _ = batch_tx.send(batch);
    }
    Ok(())
}

/// Worker loop: decode, classify and merge until the queue closes.
fn classify_batches(
    batch_rx: Receiver<Vec<RawRecord>>,
    format: crate::alignment::RecordFormat,
    accumulator: &Accumulator<'_>,
    counters: &Counters,
    failed: &AtomicBool,
    flush_tx: &Sender<Flushed>,
) -> Result<()> {
    for batch in batch_rx.iter() {
        // Keep draining so the reader never blocks on a dead pool.
        if failed.load(Ordering::Acquire) {
            continue;
        }
        for raw in batch {
            let record = match format.decode(&raw.bytes, raw.index) {
                Ok(record) => record,
                Err(e) => {
                    counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping malformed {}", e);
                    continue;
                }
            };
            let classification = classify(&record, raw.index, accumulator.index);
            if classification.is_unmatched() {
                counters.unmatched.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            accumulator.merge(classification, flush_tx)?;
        }
    }
    Ok(())
}

/// Writer loop: persist generations in the order they arrive.
fn write_generations(
    flush_rx: Receiver<Flushed>,
    namer: &CheckpointNamer,
    index: &NodeIndex,
    writer: &AtomicWriter,
    state: &StateCell,
) -> Result<Vec<CheckpointInfo>> {
    let mut written = Vec::new();
    for (batch, flushed) in flush_rx.iter().enumerate() {
        let path = namer.path(batch as u64);
        let nodes = write_checkpoint(&path, index, &flushed.shards, writer)?;
        let info = CheckpointInfo {
            batch: batch as u64,
            path,
            records: flushed.records,
            contributions: flushed.contributions,
            nodes,
        };
        info!(
            "Wrote checkpoint {} ({} records, {} nodes)",
            info.path.display(),
            info.records,
            info.nodes
        );
        state.transition(AggregatorState::Flushing, AggregatorState::Running);
        written.push(info);
    }
    Ok(written)
}
