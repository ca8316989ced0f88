//! Read-only index of the graph nodes reads are grouped by.
//!
//! The index document is produced by an external graph query and comes in
//! one of two JSON shapes:
//!
//! ```text
//! {"nodes": {"1234": {"strand": ">", "sequence": "ACGT", "length": 4}}}
//! [{"id": "1234", "strand": ">", "sequence": "ACGT", "length": 4, "start_offset": 100}]
//! ```

use crate::error::{GnodeError, Result};
use crate::node::{NodeRecord, Strand};
use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Immutable mapping from node id to node metadata.
#[derive(Debug, Clone)]
pub struct NodeIndex {
    nodes: FxHashMap<String, NodeRecord>,
}

/// Node fields as they appear in the index document (the id may be the key).
#[derive(Debug, Deserialize)]
struct NodeEntry {
    strand: String,
    #[serde(default)]
    sequence: String,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    start_offset: Option<u64>,
}

impl NodeEntry {
    fn into_record(self, id: String) -> Result<NodeRecord> {
        let strand = Strand::from_symbol(&self.strand).ok_or_else(|| {
            GnodeError::Index(format!("node {}: unknown strand '{}'", id, self.strand))
        })?;
        let length = match self.length {
            Some(length) => length,
            None if !self.sequence.is_empty() => self.sequence.len() as u64,
            None => {
                return Err(GnodeError::Index(format!(
                    "node {}: no sequence and no length",
                    id
                )))
            }
        };

        Ok(NodeRecord {
            id,
            strand,
            sequence: self.sequence,
            length,
            start_offset: self.start_offset,
        })
    }
}

impl NodeIndex {
    /// Build an index from already-extracted node records.
    ///
    /// Identical duplicates are collapsed. Fails if `records` is empty, if two
    /// records share an id but disagree on metadata, or if a record's length
    /// contradicts its sequence.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let mut nodes: FxHashMap<String, NodeRecord> = FxHashMap::default();
        let mut duplicates = 0usize;

        for record in records {
            if !record.is_consistent() {
                return Err(GnodeError::Index(format!(
                    "node {}: length {} does not match sequence length {}",
                    record.id,
                    record.length,
                    record.sequence.len()
                )));
            }
            match nodes.entry(record.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(existing) => {
                    if *existing.get() != record {
                        return Err(GnodeError::Index(format!(
                            "node {} listed twice with conflicting metadata",
                            record.id
                        )));
                    }
                    duplicates += 1;
                }
            }
        }

        if nodes.is_empty() {
            return Err(GnodeError::Index("no nodes of interest".to_string()));
        }
        if duplicates > 0 {
            debug!("Collapsed {} duplicate node entries", duplicates);
        }

        Ok(Self { nodes })
    }

    /// Load an index document from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            GnodeError::Index(format!("cannot open {}: {}", path.display(), e))
        })?;
        let index = Self::from_reader(BufReader::new(file))?;
        info!(
            "Loaded {} nodes of interest from {}",
            index.len(),
            path.display()
        );
        Ok(index)
    }

    /// Load an index document from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let document: Value = serde_json::from_reader(reader)
            .map_err(|e| GnodeError::Index(format!("not valid JSON: {}", e)))?;
        Self::from_document(document)
    }

    /// Parse an index document held in memory (useful for testing).
    pub fn from_json_str(content: &str) -> Result<Self> {
        Self::from_reader(content.as_bytes())
    }

    fn from_document(document: Value) -> Result<Self> {
        let body = match document {
            Value::Object(mut map) if map.contains_key("nodes") => {
                map.remove("nodes").unwrap_or_default()
            }
            other => other,
        };

        let records = match body {
            Value::Object(map) => map
                .into_iter()
                .map(|(id, entry)| parse_entry(id, entry))
                .collect::<Result<Vec<_>>>()?,
            Value::Array(items) => items
                .into_iter()
                .map(parse_listed)
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(GnodeError::Index(
                    "expected {\"nodes\": {...}} or a list of node objects".to_string(),
                ))
            }
        };

        Self::from_records(records)
    }

    /// Look up a node by id.
    #[inline]
    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    /// Check whether a node is of interest.
    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        let mut nodes: Vec<&NodeRecord> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.into_iter()
    }
}

fn parse_entry(id: String, entry: Value) -> Result<NodeRecord> {
    let entry: NodeEntry = serde_json::from_value(entry)
        .map_err(|e| GnodeError::Index(format!("node {}: {}", id, e)))?;
    entry.into_record(id)
}

fn parse_listed(item: Value) -> Result<NodeRecord> {
    let Value::Object(mut map) = item else {
        return Err(GnodeError::Index("node list entries must be objects".to_string()));
    };
    let id = match map.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(GnodeError::Index(format!("invalid node id {}", other)));
        }
        None => return Err(GnodeError::Index("node entry without id".to_string())),
    };
    parse_entry(id, Value::Object(map))
}
