//! Merge command implementation.
//!
//! Recovers an output from checkpoints left on disk by a failed run or by a
//! run with `--keep-checkpoints`.

use crate::checkpoint::{remove_checkpoints, AtomicWriter, CheckpointNamer};
use crate::error::Result;
use crate::merger::{MergeStats, Merger};
use log::info;
use std::path::PathBuf;

/// Merge command configuration.
#[derive(Debug, Clone)]
pub struct MergeCommand {
    /// Final output file; also names the checkpoints to discover.
    pub output: PathBuf,
    /// Explicit checkpoints, merged in the given order.
    pub checkpoints: Vec<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    pub keep_checkpoints: bool,
    pub threads: usize,
    pub writer: AtomicWriter,
}

impl MergeCommand {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            checkpoints: Vec::new(),
            checkpoint_dir: None,
            keep_checkpoints: false,
            threads: rayon::current_num_threads(),
            writer: AtomicWriter::default(),
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Vec<PathBuf>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Look for checkpoints here instead of next to the output.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_keep_checkpoints(mut self, keep: bool) -> Self {
        self.keep_checkpoints = keep;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Checkpoints this command would merge, in merge order.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        if !self.checkpoints.is_empty() {
            return Ok(self.checkpoints.clone());
        }
        let namer = CheckpointNamer::for_output(&self.output, self.checkpoint_dir.as_deref())?;
        let found = namer.discover()?;
        info!(
            "Found {} checkpoints for {} in {}",
            found.len(),
            self.output.display(),
            namer.dir().display()
        );
        Ok(found)
    }

    pub fn run(&self) -> Result<MergeStats> {
        let checkpoints = self.resolve()?;
        let stats = Merger::new(self.threads)
            .with_writer(self.writer.clone())
            .merge(&checkpoints, &self.output)?;
        if !self.keep_checkpoints {
            remove_checkpoints(&checkpoints);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::read_checkpoint;
    use crate::node::{GroupedNode, NodeRecord, Strand};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn checkpoint(path: &std::path::Path, reads: usize) {
        let mut group = GroupedNode::new(NodeRecord::new("7", Strand::Forward, "ACGT"));
        for i in 0..reads {
            group.reads.push(crate::node::ReadSummary {
                name: format!("r{}", i),
                sequence: "A".into(),
                mapping_quality: 1,
                score: None,
                quality: String::new(),
                record_index: i as u64,
            });
        }
        let map: BTreeMap<_, _> = [("7".to_string(), group)].into_iter().collect();
        fs::write(path, serde_json::to_string(&map).unwrap()).unwrap();
    }

    #[test]
    fn test_discovers_and_removes() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.json");
        let namer = CheckpointNamer::for_output(&output, None).unwrap();
        checkpoint(&namer.path(0), 2);
        checkpoint(&namer.path(1), 3);

        let stats = MergeCommand::new(&output).with_threads(2).run().unwrap();
        assert_eq!(stats.checkpoints, 2);
        assert_eq!(stats.reads, 5);
        assert_eq!(read_checkpoint(&output).unwrap()["7"].reads.len(), 5);
        assert!(namer.discover().unwrap().is_empty());
    }

    #[test]
    fn test_keep_and_separate_dir() {
        let out_dir = tempdir().unwrap();
        let cp_dir = tempdir().unwrap();
        let output = out_dir.path().join("out.json");
        let namer = CheckpointNamer::for_output(&output, Some(cp_dir.path())).unwrap();
        checkpoint(&namer.path(3), 1);

        MergeCommand::new(&output)
            .with_checkpoint_dir(cp_dir.path())
            .with_keep_checkpoints(true)
            .run()
            .unwrap();
        assert_eq!(namer.discover().unwrap().len(), 1);
        assert!(output.exists());
    }
}
