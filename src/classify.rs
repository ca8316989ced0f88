//! Classification of one alignment against the node index.

use crate::alignment::AlignmentRecord;
use crate::index::NodeIndex;
use crate::node::ReadSummary;
use rustc_hash::FxHashSet;

/// Paths shorter than this are deduplicated with a linear scan.
const LINEAR_DEDUP_LIMIT: usize = 16;

/// The nodes of interest one record touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<'a> {
    /// Touched node ids, first occurrence order, each at most once.
    pub nodes: Vec<&'a str>,
    /// What every touched node receives for this record.
    pub summary: ReadSummary,
}

impl Classification<'_> {
    /// True if the record touched no node of interest.
    pub fn is_unmatched(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Classify one record.
///
/// Walks the mapping list once, keeps mappings whose node is in `index`, and
/// drops repeated mappings to a node already seen in this record.
pub fn classify<'a>(
    record: &'a AlignmentRecord,
    record_index: u64,
    index: &NodeIndex,
) -> Classification<'a> {
    let mut nodes: Vec<&'a str> = Vec::new();

    if record.mappings.len() <= LINEAR_DEDUP_LIMIT {
        for mapping in &record.mappings {
            let id = mapping.node_id.as_str();
            if index.contains(id) && !nodes.contains(&id) {
                nodes.push(id);
            }
        }
    } else {
        let mut seen: FxHashSet<&'a str> = FxHashSet::default();
        for mapping in &record.mappings {
            let id = mapping.node_id.as_str();
            if index.contains(id) && seen.insert(id) {
                nodes.push(id);
            }
        }
    }

    Classification {
        nodes,
        summary: record.summary(record_index),
    }
}
