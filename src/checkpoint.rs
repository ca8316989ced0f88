//! Durable checkpoint files and atomic JSON writes.
//!
//! A checkpoint is written to a temporary file in the destination directory
//! and renamed into place, so a reader never sees a partial file. Checkpoint
//! names carry the final output's file name and a batch number:
//!
//! ```text
//! grouped_reads.json.batch_000000.json
//! grouped_reads.json.batch_000001.json
//! ```

use crate::error::{GnodeError, Result};
use crate::index::NodeIndex;
use crate::node::{GroupedNode, GroupedNodeRef, ReadSummary};
use crate::source::buffers::DEFAULT_OUTPUT_BUFFER;
use log::warn;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::Builder;

/// Mode of written checkpoints and outputs; temp files start out owner-only.
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

/// Accumulated reads for the nodes of one shard.
pub type Shard = FxHashMap<String, Vec<ReadSummary>>;

/// A checkpoint that has been durably written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub batch: u64,
    pub path: PathBuf,
    /// Alignment records merged into this checkpoint.
    pub records: u64,
    /// Sum over those records of distinct nodes touched.
    pub contributions: u64,
    pub nodes: usize,
}

/// Builds and recognises checkpoint file names for one output.
#[derive(Debug, Clone)]
pub struct CheckpointNamer {
    dir: PathBuf,
    prefix: String,
}

impl CheckpointNamer {
    /// Checkpoints for `output`, placed in `dir` or next to the output.
    pub fn for_output(output: &Path, dir: Option<&Path>) -> Result<Self> {
        let prefix = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                GnodeError::Config(format!("output path {} has no file name", output.display()))
            })?;
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => parent_dir(output).to_path_buf(),
        };
        Ok(Self { dir, prefix })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of checkpoint number `batch`.
    pub fn path(&self, batch: u64) -> PathBuf {
        self.dir
            .join(format!("{}.batch_{:06}.json", self.prefix, batch))
    }

    /// Batch number encoded in a file name, if it is one of our checkpoints.
    pub fn parse_batch(&self, file_name: &str) -> Option<u64> {
        let digits = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(".batch_")?
            .strip_suffix(".json")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Existing checkpoints for this output, in batch order.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(batch) = self.parse_batch(&name.to_string_lossy()) {
                found.push((batch, entry.path()));
            }
        }
        found.sort_by_key(|(batch, _)| *batch);
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }
}

/// Directory containing `path`, `.` for a bare file name.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Writes files via temp-file + rename, retrying failed attempts.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    attempts: u32,
    backoff: Duration,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_WRITE_ATTEMPTS,
            crate::config::DEFAULT_RETRY_BACKOFF,
        )
    }
}

impl AtomicWriter {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Serialize `value` as JSON to `path`.
    pub fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T, pretty: bool) -> Result<()> {
        self.write_with(path, |out| {
            if pretty {
                serde_json::to_writer_pretty(&mut *out, value)?;
            } else {
                serde_json::to_writer(&mut *out, value)?;
            }
            out.write_all(b"\n")
        })
    }

    /// Write `path` with `fill`, which may be called once per attempt.
    pub fn write_with<F>(&self, path: &Path, mut fill: F) -> Result<()>
    where
        F: FnMut(&mut BufWriter<&mut File>) -> io::Result<()>,
    {
        let mut attempt = 1;
        loop {
            match write_once(path, &mut fill) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.attempts => {
                    warn!(
                        "Write of {} failed (attempt {}/{}): {}",
                        path.display(),
                        attempt,
                        self.attempts,
                        e
                    );
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(GnodeError::Write {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }
}

fn write_once<F>(path: &Path, fill: &mut F) -> io::Result<()>
where
    F: FnMut(&mut BufWriter<&mut File>) -> io::Result<()>,
{
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(parent_dir(path))?;

    {
        let mut writer = BufWriter::with_capacity(DEFAULT_OUTPUT_BUFFER, temp.as_file_mut());
        fill(&mut writer)?;
        writer.flush()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(OUTPUT_MODE))?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    // Sync the directory so the rename itself is durable.
    #[cfg(unix)]
    if let Ok(dir) = File::open(parent_dir(path)) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Write one checkpoint from accumulated shards.
///
/// Keys are written in sorted order; node metadata comes from `index`.
pub fn write_checkpoint(
    path: &Path,
    index: &NodeIndex,
    shards: &[Shard],
    writer: &AtomicWriter,
) -> Result<usize> {
    let mut groups: BTreeMap<&str, GroupedNodeRef<'_>> = BTreeMap::new();
    for shard in shards {
        for (id, reads) in shard {
            let node = index.get(id).ok_or_else(|| GnodeError::Checkpoint {
                path: path.to_path_buf(),
                message: format!("node {} is not in the index", id),
            })?;
            groups.insert(id.as_str(), GroupedNodeRef { node, reads });
        }
    }
    writer.write_json(path, &groups, false)?;
    Ok(groups.len())
}

/// Load a checkpoint (or a merged output) from disk.
pub fn read_checkpoint(path: &Path) -> Result<BTreeMap<String, GroupedNode>> {
    let file = File::open(path).map_err(|e| GnodeError::Checkpoint {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_reader(BufReader::with_capacity(DEFAULT_OUTPUT_BUFFER, file)).map_err(|e| {
        GnodeError::Checkpoint {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })
}

/// Delete consumed checkpoints, returning how many were removed.
///
/// The output already exists by the time this runs, so a file that cannot be
/// removed is logged and left behind. Already-missing files are skipped.
pub fn remove_checkpoints(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove checkpoint {}: {}", path.display(), e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeRecord, Strand};
    use tempfile::tempdir;

    fn summary(name: &str, record_index: u64) -> ReadSummary {
        ReadSummary {
            name: name.into(),
            sequence: "ACGT".into(),
            mapping_quality: 60,
            score: Some(10),
            quality: String::new(),
            record_index,
        }
    }

    #[test]
    fn test_names() {
        let namer =
            CheckpointNamer::for_output(Path::new("/data/out/grouped.json"), None).unwrap();
        assert_eq!(namer.dir(), Path::new("/data/out"));
        assert_eq!(
            namer.path(7),
            PathBuf::from("/data/out/grouped.json.batch_000007.json")
        );
        assert_eq!(namer.parse_batch("grouped.json.batch_000007.json"), Some(7));
        assert_eq!(namer.parse_batch("grouped.json.batch_1234567.json"), Some(1_234_567));
        assert_eq!(namer.parse_batch("other.json.batch_000001.json"), None);
        assert_eq!(namer.parse_batch("grouped.json.batch_.json"), None);
        assert_eq!(namer.parse_batch("grouped.json.batch_x1.json"), None);

        let bare = CheckpointNamer::for_output(Path::new("grouped.json"), None).unwrap();
        assert_eq!(bare.dir(), Path::new("."));
    }

    #[test]
    fn test_discover_in_batch_order() {
        let dir = tempdir().unwrap();
        let namer = CheckpointNamer::for_output(&dir.path().join("out.json"), None).unwrap();
        for batch in [10u64, 2, 1] {
            fs::write(namer.path(batch), "{}").unwrap();
        }
        fs::write(dir.path().join("out.json"), "{}").unwrap();
        fs::write(dir.path().join("unrelated.batch_000000.json"), "{}").unwrap();

        let found = namer.discover().unwrap();
        assert_eq!(found, vec![namer.path(1), namer.path(2), namer.path(10)]);
    }

    #[test]
    fn test_checkpoint_write_and_read() {
        let dir = tempdir().unwrap();
        let index = NodeIndex::from_records(vec![
            NodeRecord::new("1", Strand::Forward, "AC"),
            NodeRecord::new("2", Strand::Reverse, "GT"),
        ])
        .unwrap();
        let mut a = Shard::default();
        a.insert("2".into(), vec![summary("r1", 0)]);
        let mut b = Shard::default();
        b.insert("1".into(), vec![summary("r1", 0), summary("r2", 1)]);

        let path = dir.path().join("cp.json");
        let nodes = write_checkpoint(&path, &index, &[a, b], &AtomicWriter::default()).unwrap();
        assert_eq!(nodes, 2);

        let loaded = read_checkpoint(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["1"].reads.len(), 2);
        assert_eq!(loaded["2"].node.strand, Strand::Reverse);
        assert_eq!(loaded["2"].reads[0].name, "r1");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_unknown_node_rejected() {
        let dir = tempdir().unwrap();
        let index = NodeIndex::from_records(vec![NodeRecord::new("1", Strand::Forward, "A")])
            .unwrap();
        let mut shard = Shard::default();
        shard.insert("9".into(), vec![summary("r", 0)]);
        let result = write_checkpoint(
            &dir.path().join("cp.json"),
            &index,
            &[shard],
            &AtomicWriter::default(),
        );
        assert!(matches!(result, Err(GnodeError::Checkpoint { .. })));
    }

    #[test]
    fn test_retries_then_gives_up() {
        let dir = tempdir().unwrap();
        let writer = AtomicWriter::new(3, Duration::from_millis(1));
        let mut calls = 0;
        let result = writer.write_with(&dir.path().join("x.json"), |_| {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        });

        assert_eq!(calls, 3);
        match result {
            Err(GnodeError::Write { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected write error, got {:?}", other),
        }
        assert!(!dir.path().join("x.json").exists());
    }

    #[test]
    fn test_retry_recovers() {
        let dir = tempdir().unwrap();
        let writer = AtomicWriter::new(3, Duration::from_millis(1));
        let mut calls = 0;
        let path = dir.path().join("x.json");
        writer
            .write_with(&path, |out| {
                calls += 1;
                if calls == 1 {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "transient"));
                }
                out.write_all(b"{}\n")
            })
            .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}\n");
    }

    #[test]
    fn test_missing_directory_is_write_error() {
        let writer = AtomicWriter::new(2, Duration::from_millis(1));
        let result = writer.write_json(Path::new("/nonexistent/dir/out.json"), &1, false);
        assert!(matches!(result, Err(GnodeError::Write { attempts: 2, .. })));
    }

    #[test]
    fn test_remove_checkpoints() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, "{}").unwrap();
        let removed = remove_checkpoints(&[path.clone(), dir.path().join("missing.json")]);
        assert_eq!(removed, 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_checkpoints_keeps_going_past_failures() {
        let dir = tempdir().unwrap();
        let stuck = dir.path().join("stuck.json");
        fs::create_dir(&stuck).unwrap();
        fs::write(stuck.join("inner"), "x").unwrap();
        let path = dir.path().join("b.json");
        fs::write(&path, "{}").unwrap();

        let removed = remove_checkpoints(&[stuck.clone(), path.clone()]);
        assert_eq!(removed, 1);
        assert!(stuck.exists());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_written_files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        AtomicWriter::default().write_json(&path, &1, true).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, OUTPUT_MODE);
    }
}
