//! Generate a synthetic node index and alignment stream.
//!
//! `gnode generate` writes `nodes.json` and either `reads.jsonl` or
//! `reads.bin` into the output directory. Node ids `1..=nodes` are in the
//! index; mappings that miss the index point at ids above that range.
//! Generation is deterministic for a given seed.

use crate::alignment::{AlignmentRecord, RecordFormat};
use crate::error::{GnodeError, Result};
use crate::node::{NodeRecord, Strand};
use crate::source::buffers::DEFAULT_OUTPUT_BUFFER;
use crate::source::frames::{write_frame, write_raw_frame};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const BASES: &[u8; 4] = b"ACGT";

/// Name of the generated index file.
pub const NODES_FILE: &str = "nodes.json";

/// Configuration for the generate command.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub output_dir: PathBuf,
    pub nodes: u64,
    pub reads: u64,
    pub seed: u64,
    pub format: RecordFormat,
    pub mappings_min: usize,
    pub mappings_max: usize,
    /// Probability that a mapping lands on an indexed node.
    pub hit_rate: f64,
    /// Probability that a record is written as garbage.
    pub malformed_rate: f64,
    pub force: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./gnode_bench_data"),
            nodes: 1_000,
            reads: 100_000,
            seed: 42,
            format: RecordFormat::Json,
            mappings_min: 1,
            mappings_max: 8,
            hit_rate: 0.5,
            malformed_rate: 0.0,
            force: false,
        }
    }
}

impl GenerateConfig {
    fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(GnodeError::Config("--nodes must be at least 1".into()));
        }
        if self.mappings_min > self.mappings_max {
            return Err(GnodeError::Config(format!(
                "--mappings-min ({}) exceeds --mappings-max ({})",
                self.mappings_min, self.mappings_max
            )));
        }
        for (name, rate) in [("--hit-rate", self.hit_rate), ("--malformed-rate", self.malformed_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(GnodeError::Config(format!("{} must be within 0..=1", name)));
            }
        }
        Ok(())
    }

    /// Path of the alignment stream for the configured format.
    pub fn reads_path(&self) -> PathBuf {
        let name = match self.format {
            RecordFormat::Json => "reads.jsonl",
            RecordFormat::Frames => "reads.bin",
        };
        self.output_dir.join(name)
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.output_dir.join(NODES_FILE)
    }
}

/// Statistics from generate operation.
#[derive(Debug, Default, Clone)]
pub struct GenerateStats {
    pub nodes: u64,
    pub records: u64,
    pub malformed: u64,
    /// Well-formed records with at least one indexed mapping.
    pub matching: u64,
    pub skipped: bool,
    pub elapsed_secs: f64,
}

impl std::fmt::Display for GenerateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            return write!(f, "skipped (files exist, use --force to overwrite)");
        }
        write!(
            f,
            "{} nodes, {} records ({} matching, {} malformed) ({:.1}s)",
            self.nodes, self.records, self.matching, self.malformed, self.elapsed_secs
        )
    }
}

/// Generate command.
pub struct GenerateCommand {
    config: GenerateConfig,
}

impl GenerateCommand {
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }

    pub fn run(&self) -> Result<GenerateStats> {
        self.config.validate()?;
        let start = Instant::now();
        let nodes_path = self.config.nodes_path();
        let reads_path = self.config.reads_path();

        if !self.config.force && nodes_path.exists() && reads_path.exists() {
            info!(
                "Skipping {} (files exist, use --force to overwrite)",
                self.config.output_dir.display()
            );
            return Ok(GenerateStats {
                skipped: true,
                ..Default::default()
            });
        }

        fs::create_dir_all(&self.config.output_dir)?;
        let mut rng = SmallRng::seed_from_u64(self.config.seed);

        let nodes = self.generate_nodes(&mut rng);
        write_index(&nodes_path, &nodes)?;
        info!("Wrote {} nodes to {}", nodes.len(), nodes_path.display());

        let mut stats = GenerateStats {
            nodes: self.config.nodes,
            ..Default::default()
        };
        let mut writer = BufWriter::with_capacity(DEFAULT_OUTPUT_BUFFER, File::create(&reads_path)?);
        for _ in 0..self.config.reads {
            stats.records += 1;
            if rng.gen_bool(self.config.malformed_rate) {
                stats.malformed += 1;
                self.write_malformed(&mut writer, &mut rng)?;
                continue;
            }
            let record = self.generate_record(stats.records, &mut rng);
            if record
                .mappings
                .iter()
                .any(|m| self.is_indexed(&m.node_id))
            {
                stats.matching += 1;
            }
            match self.config.format {
                RecordFormat::Json => {
                    writer.write_all(record.to_json_line().as_bytes())?;
                    writer.write_all(b"\n")?;
                }
                RecordFormat::Frames => write_frame(&mut writer, &record)?,
            }
        }
        writer.flush()?;

        stats.elapsed_secs = start.elapsed().as_secs_f64();
        info!("Wrote {}: {}", reads_path.display(), stats);
        Ok(stats)
    }

    fn is_indexed(&self, node_id: &str) -> bool {
        node_id
            .parse::<u64>()
            .map(|id| (1..=self.config.nodes).contains(&id))
            .unwrap_or(false)
    }

    fn generate_nodes(&self, rng: &mut SmallRng) -> Vec<NodeRecord> {
        let mut offset = 0u64;
        (1..=self.config.nodes)
            .map(|id| {
                let length = rng.gen_range(8..=64);
                let strand = if rng.gen_bool(0.5) {
                    Strand::Forward
                } else {
                    Strand::Reverse
                };
                let node = NodeRecord::new(id.to_string(), strand, random_bases(length, rng))
                    .with_start_offset(offset);
                offset += length as u64;
                node
            })
            .collect()
    }

    fn generate_node_id(&self, rng: &mut SmallRng) -> String {
        let nodes = self.config.nodes;
        let id = if rng.gen_bool(self.config.hit_rate) {
            rng.gen_range(1..=nodes)
        } else {
            rng.gen_range(nodes + 1..=nodes.saturating_mul(10).max(nodes + 1))
        };
        id.to_string()
    }

    fn generate_record(&self, serial: u64, rng: &mut SmallRng) -> AlignmentRecord {
        let length = rng.gen_range(50..=150);
        let mut record = AlignmentRecord::new(format!("read_{}", serial), random_bases(length, rng));
        record.mapping_quality = rng.gen_range(0..=60);
        record.score = if rng.gen_bool(0.9) {
            Some(rng.gen_range(0..=length as i32))
        } else {
            None
        };
        record.quality = (0..length)
            .map(|_| rng.gen_range(b'!'..=b'J') as char)
            .collect();

        let count = rng.gen_range(self.config.mappings_min..=self.config.mappings_max);
        let mut previous: Option<String> = None;
        for _ in 0..count {
            // Occasionally revisit the previous node, as looping paths do.
            let node_id = match &previous {
                Some(id) if rng.gen_bool(0.1) => id.clone(),
                _ => self.generate_node_id(rng),
            };
            record = record.with_mapping(node_id.clone(), Some(rng.gen_range(0..32)));
            previous = Some(node_id);
        }
        record
    }

    fn write_malformed<W: Write>(&self, writer: &mut W, rng: &mut SmallRng) -> Result<()> {
        match self.config.format {
            RecordFormat::Json => {
                let junk = if rng.gen_bool(0.5) {
                    "{\"name\": \"truncated\", \"path\": {\"mapping\": ["
                } else {
                    "not an alignment"
                };
                writer.write_all(junk.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            // An empty payload cannot hold even the record name.
            RecordFormat::Frames => write_raw_frame(writer, &[])?,
        }
        Ok(())
    }
}

fn random_bases(length: usize, rng: &mut SmallRng) -> String {
    (0..length)
        .map(|_| BASES[rng.gen_range(0..BASES.len())] as char)
        .collect()
}

/// Write nodes in the keyed `{"nodes": {id: {...}}}` shape.
fn write_index(path: &Path, nodes: &[NodeRecord]) -> Result<()> {
    let mut keyed = Map::new();
    for node in nodes {
        let mut entry = json!({
            "strand": node.strand.symbol(),
            "sequence": node.sequence,
            "length": node.length,
        });
        if let (Some(offset), Some(fields)) = (node.start_offset, entry.as_object_mut()) {
            fields.insert("start_offset".into(), Value::from(offset));
        }
        keyed.insert(node.id.clone(), entry);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &json!({ "nodes": keyed })).map_err(std::io::Error::from)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NodeIndex;
    use crate::source::{FrameSource, LineSource, RecordSource};
    use tempfile::tempdir;

    fn config(dir: &Path) -> GenerateConfig {
        GenerateConfig {
            output_dir: dir.to_path_buf(),
            nodes: 20,
            reads: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_index_loads() {
        let dir = tempdir().unwrap();
        let stats = GenerateCommand::new(config(dir.path())).run().unwrap();
        assert_eq!(stats.nodes, 20);
        assert_eq!(stats.records, 200);

        let index = NodeIndex::from_path(dir.path().join(NODES_FILE)).unwrap();
        assert_eq!(index.len(), 20);
        assert!(index.contains("1"));
        assert!(index.contains("20"));
        assert!(!index.contains("21"));
        assert!(index.iter().all(|node| node.is_consistent()));
    }

    #[test]
    fn test_deterministic_generation() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        GenerateCommand::new(config(a.path())).run().unwrap();
        GenerateCommand::new(config(b.path())).run().unwrap();

        for name in [NODES_FILE, "reads.jsonl"] {
            assert_eq!(
                fs::read(a.path().join(name)).unwrap(),
                fs::read(b.path().join(name)).unwrap()
            );
        }
    }

    #[test]
    fn test_malformed_records_fail_to_decode() {
        for format in [RecordFormat::Json, RecordFormat::Frames] {
            let dir = tempdir().unwrap();
            let cfg = GenerateConfig {
                format,
                malformed_rate: 0.3,
                ..config(dir.path())
            };
            let stats = GenerateCommand::new(cfg.clone()).run().unwrap();
            assert!(stats.malformed > 0);

            let source: Box<dyn RecordSource> = match format {
                RecordFormat::Json => Box::new(LineSource::from_path(cfg.reads_path()).unwrap()),
                RecordFormat::Frames => Box::new(FrameSource::open(cfg.reads_path()).unwrap()),
            };
            let results: Vec<_> = source.records().collect();
            assert_eq!(results.len() as u64, stats.records);
            let failures = results.iter().filter(|r| r.is_err()).count() as u64;
            assert_eq!(failures, stats.malformed);
        }
    }

    #[test]
    fn test_skips_existing_without_force() {
        let dir = tempdir().unwrap();
        GenerateCommand::new(config(dir.path())).run().unwrap();
        let again = GenerateCommand::new(config(dir.path())).run().unwrap();
        assert!(again.skipped);

        let forced = GenerateCommand::new(GenerateConfig {
            force: true,
            ..config(dir.path())
        })
        .run()
        .unwrap();
        assert!(!forced.skipped);
    }

    #[test]
    fn test_rejects_bad_rates() {
        let dir = tempdir().unwrap();
        let cfg = GenerateConfig {
            hit_rate: 1.5,
            ..config(dir.path())
        };
        assert!(matches!(
            GenerateCommand::new(cfg).run(),
            Err(GnodeError::Config(_))
        ));
    }
}
