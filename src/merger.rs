//! Merge checkpoints into the final grouped output.
//!
//! Checkpoints are parsed in parallel, a window of `threads` files at a time,
//! and folded in the order given. The fold concatenates read lists per node,
//! so the result depends only on checkpoint order.

use crate::checkpoint::{read_checkpoint, AtomicWriter};
use crate::error::{GnodeError, Result};
use crate::node::GroupedNode;
use log::info;
use rayon::prelude::*;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome of one merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub checkpoints: usize,
    pub nodes: usize,
    pub reads: usize,
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Merge statistics:")?;
        writeln!(f, "  Checkpoints merged: {}", self.checkpoints)?;
        writeln!(f, "  Output nodes:       {}", self.nodes)?;
        writeln!(f, "  Output reads:       {}", self.reads)?;
        Ok(())
    }
}

pub struct Merger {
    threads: usize,
    writer: AtomicWriter,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new(rayon::current_num_threads())
    }
}

impl Merger {
    /// `threads` checkpoints are parsed at once; at least one.
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            writer: AtomicWriter::default(),
        }
    }

    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Combine checkpoints, in order, into one map.
    pub fn combine(&self, checkpoints: &[PathBuf]) -> Result<BTreeMap<String, GroupedNode>> {
        let mut merged: BTreeMap<String, GroupedNode> = BTreeMap::new();
        for window in checkpoints.chunks(self.threads) {
            let parsed: Vec<Result<BTreeMap<String, GroupedNode>>> =
                window.par_iter().map(|path| read_checkpoint(path)).collect();
            for (path, checkpoint) in window.iter().zip(parsed) {
                fold_into(&mut merged, checkpoint?, path)?;
            }
        }
        Ok(merged)
    }

    /// Merge `checkpoints` and write the result to `output`.
    ///
    /// An empty list writes `{}`.
    pub fn merge(&self, checkpoints: &[PathBuf], output: &Path) -> Result<MergeStats> {
        let start = Instant::now();
        let merged = self.combine(checkpoints)?;
        let stats = MergeStats {
            checkpoints: checkpoints.len(),
            nodes: merged.len(),
            reads: merged.values().map(|group| group.reads.len()).sum(),
        };
        self.writer.write_json(output, &merged, true)?;
        info!(
            "Merged {} checkpoints into {} ({} nodes, {} reads) in {:.2}s",
            stats.checkpoints,
            output.display(),
            stats.nodes,
            stats.reads,
            start.elapsed().as_secs_f64()
        );
        Ok(stats)
    }
}

fn fold_into(
    merged: &mut BTreeMap<String, GroupedNode>,
    checkpoint: BTreeMap<String, GroupedNode>,
    path: &Path,
) -> Result<()> {
    for (id, group) in checkpoint {
        if group.node.id != id {
            return Err(GnodeError::Checkpoint {
                path: path.to_path_buf(),
                message: format!("entry {} describes node {}", id, group.node.id),
            });
        }
        match merged.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(group);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.node != group.node {
                    return Err(GnodeError::Checkpoint {
                        path: path.to_path_buf(),
                        message: format!(
                            "metadata for node {} differs from earlier checkpoints",
                            existing.node.id
                        ),
                    });
                }
                existing.reads.extend(group.reads);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeRecord, ReadSummary, Strand};
    use std::fs;
    use tempfile::tempdir;

    fn group(id: &str, reads: &[&str]) -> GroupedNode {
        let mut group = GroupedNode::new(NodeRecord::new(id, Strand::Forward, "ACGT"));
        for (i, name) in reads.iter().enumerate() {
            group.reads.push(ReadSummary {
                name: name.to_string(),
                sequence: "ACGT".into(),
                mapping_quality: 60,
                score: None,
                quality: String::new(),
                record_index: i as u64,
            });
        }
        group
    }

    fn write(dir: &Path, name: &str, groups: Vec<GroupedNode>) -> PathBuf {
        let map: BTreeMap<String, GroupedNode> =
            groups.into_iter().map(|g| (g.node.id.clone(), g)).collect();
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_concatenates_in_order() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.json", vec![group("n1", &["r1"]), group("n2", &["r1"])]);
        let b = write(dir.path(), "b.json", vec![group("n1", &["r2", "r3"])]);
        let c = write(dir.path(), "c.json", vec![group("n3", &["r4"])]);

        let merged = Merger::new(2).combine(&[a, b, c]).unwrap();
        let names: Vec<_> = merged["n1"].reads.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["r1", "r2", "r3"]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_empty_list_writes_empty_object() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.json");
        let stats = Merger::new(4).merge(&[], &output).unwrap();
        assert_eq!(stats, MergeStats::default());
        assert_eq!(fs::read_to_string(&output).unwrap().trim(), "{}");
    }

    #[test]
    fn test_repeat_merge_is_identical() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.json", vec![group("n2", &["x"]), group("n1", &["y"])]);
        let b = write(dir.path(), "b.json", vec![group("n1", &["z"])]);
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");

        Merger::new(1).merge(&[a.clone(), b.clone()], &first).unwrap();
        Merger::new(8).merge(&[a, b], &second).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_conflicting_metadata_rejected() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.json", vec![group("n1", &["r1"])]);
        let mut other = group("n1", &["r2"]);
        other.node.strand = Strand::Reverse;
        let b = write(dir.path(), "b.json", vec![other]);

        let result = Merger::new(2).combine(&[a, b]);
        assert!(matches!(result, Err(GnodeError::Checkpoint { .. })));
    }

    #[test]
    fn test_unreadable_checkpoint() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ truncated").unwrap();
        let result = Merger::new(1).combine(&[bad]);
        assert!(matches!(result, Err(GnodeError::Checkpoint { .. })));
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let mut map = BTreeMap::new();
        map.insert("n9".to_string(), group("n1", &["r"]));
        fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();
        assert!(Merger::new(1).combine(&[path]).is_err());
    }
}
