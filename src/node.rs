//! Graph node metadata and the per-node read groups built from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Orientation of a node along the reference walk it was extracted from.
///
/// Serialized with the walk symbols `>` and `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// Parse a strand symbol as written by graph tools.
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            ">" | "+" | "forward" | "Forward" | "F" => Some(Strand::Forward),
            "<" | "-" | "reverse" | "Reverse" | "R" => Some(Strand::Reverse),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Strand::Forward => ">",
            Strand::Reverse => "<",
        }
    }
}

impl TryFrom<String> for Strand {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Strand::from_symbol(&s).ok_or_else(|| format!("unknown strand symbol '{}'", s))
    }
}

impl From<Strand> for &'static str {
    fn from(strand: Strand) -> Self {
        strand.symbol()
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A node of interest: one segment of the reference graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub strand: Strand,
    #[serde(default)]
    pub sequence: String,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u64>,
}

impl NodeRecord {
    /// Create a node whose length is taken from its sequence.
    pub fn new(id: impl Into<String>, strand: Strand, sequence: impl Into<String>) -> Self {
        let sequence = sequence.into();
        Self {
            id: id.into(),
            strand,
            length: sequence.len() as u64,
            sequence,
            start_offset: None,
        }
    }

    /// Set the node's offset along the reference walk.
    pub fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = Some(offset);
        self
    }

    /// A node with a recorded length but no sequence.
    pub fn without_sequence(id: impl Into<String>, strand: Strand, length: u64) -> Self {
        Self {
            id: id.into(),
            strand,
            sequence: String::new(),
            length,
            start_offset: None,
        }
    }

    /// True when the recorded length agrees with the sequence (if any).
    pub fn is_consistent(&self) -> bool {
        self.sequence.is_empty() || self.sequence.len() as u64 == self.length
    }
}

/// The part of an alignment kept in grouped output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSummary {
    #[serde(rename = "read_name")]
    pub name: String,
    pub sequence: String,
    pub mapping_quality: i32,
    pub score: Option<i32>,
    pub quality: String,
    /// Position of the source record in the input stream.
    pub record_index: u64,
}

/// A node together with every read that touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedNode {
    #[serde(flatten)]
    pub node: NodeRecord,
    pub reads: Vec<ReadSummary>,
}

impl GroupedNode {
    pub fn new(node: NodeRecord) -> Self {
        Self {
            node,
            reads: Vec::new(),
        }
    }
}

/// Borrowed view of a [`GroupedNode`], used when writing checkpoints so the
/// node metadata is not cloned out of the index.
#[derive(Debug, Serialize)]
pub struct GroupedNodeRef<'a> {
    #[serde(flatten)]
    pub node: &'a NodeRecord,
    pub reads: &'a [ReadSummary],
}
