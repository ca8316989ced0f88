//! Alignment records and their two wire encodings.
//!
//! JSON records follow the shape `vg view -a` prints: 64-bit integers such as
//! `node_id` and `offset` are usually quoted, most fields may be omitted when
//! they hold their default value, and mappings live under `path.mapping[]`.
//! Framed records carry the bincode encoding of [`AlignmentRecord`].

use crate::error::DecodeError;
use crate::node::ReadSummary;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One (node, offset) step of a read's path through the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub node_id: String,
    pub offset: Option<u64>,
}

impl Mapping {
    pub fn new(node_id: impl Into<String>, offset: Option<u64>) -> Self {
        Self {
            node_id: node_id.into(),
            offset,
        }
    }
}

/// A sequenced read and its mappings onto graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub name: String,
    pub sequence: String,
    pub mapping_quality: i32,
    pub score: Option<i32>,
    pub quality: String,
    pub mappings: Vec<Mapping>,
}

impl AlignmentRecord {
    /// Create a record with no quality information.
    pub fn new(name: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
            mapping_quality: 0,
            score: None,
            quality: String::new(),
            mappings: Vec::new(),
        }
    }

    /// Append a mapping to the record's path.
    pub fn with_mapping(mut self, node_id: impl Into<String>, offset: Option<u64>) -> Self {
        self.mappings.push(Mapping::new(node_id, offset));
        self
    }

    /// Project the record down to what grouped output keeps.
    pub fn summary(&self, record_index: u64) -> ReadSummary {
        ReadSummary {
            name: self.name.clone(),
            sequence: self.sequence.clone(),
            mapping_quality: self.mapping_quality,
            score: self.score,
            quality: self.quality.clone(),
            record_index,
        }
    }

    /// Render the record as one line of `vg view -a` style JSON.
    pub fn to_json_line(&self) -> String {
        let mappings: Vec<_> = self
            .mappings
            .iter()
            .map(|m| match m.offset {
                Some(offset) => json!({
                    "position": {"node_id": m.node_id, "offset": offset.to_string()}
                }),
                None => json!({"position": {"node_id": m.node_id}}),
            })
            .collect();

        let mut value = json!({
            "name": self.name,
            "sequence": self.sequence,
            "mapping_quality": self.mapping_quality,
            "quality": self.quality,
            "path": {"mapping": mappings},
        });
        if let Some(score) = self.score {
            value["score"] = json!(score);
        }
        value.to_string()
    }

    /// Encode the record as a frame payload.
    pub fn to_frame_payload(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
    }
}

/// Encoding of the records carried by an alignment stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// One JSON object per line.
    Json,
    /// 4-byte little-endian length followed by a bincode payload.
    Frames,
}

impl RecordFormat {
    /// Parse format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" | "ndjson" => Some(Self::Json),
            "frames" | "framed" | "binary" | "bin" => Some(Self::Frames),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Frames => "frames",
        }
    }

    /// Decode one raw record. `record_index` is only used for diagnostics.
    pub fn decode(&self, raw: &[u8], record_index: u64) -> Result<AlignmentRecord, DecodeError> {
        match self {
            Self::Json => decode_json(raw, record_index),
            Self::Frames => decode_frame(raw, record_index),
        }
    }
}

/// A JSON integer that may or may not be quoted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn into_id(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }

    fn to_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonAlignment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sequence: String,
    #[serde(default)]
    mapping_quality: Option<Scalar>,
    #[serde(default)]
    score: Option<Scalar>,
    #[serde(default)]
    quality: String,
    #[serde(default)]
    path: Option<JsonPath>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonPath {
    #[serde(default)]
    mapping: Vec<JsonMapping>,
}

#[derive(Debug, Deserialize)]
struct JsonMapping {
    #[serde(default)]
    position: Option<JsonPosition>,
}

#[derive(Debug, Deserialize)]
struct JsonPosition {
    #[serde(default)]
    node_id: Option<Scalar>,
    #[serde(default)]
    offset: Option<Scalar>,
}

fn int_field(
    value: Option<Scalar>,
    field: &str,
    record_index: u64,
) -> Result<Option<i32>, DecodeError> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .to_i64()
        .and_then(|n| i32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| DecodeError::new(record_index, format!("invalid {}: {:?}", field, value)))
}

fn decode_json(raw: &[u8], record_index: u64) -> Result<AlignmentRecord, DecodeError> {
    let wire: JsonAlignment = serde_json::from_slice(raw)
        .map_err(|e| DecodeError::new(record_index, format!("invalid JSON: {}", e)))?;

    let name = wire
        .name
        .ok_or_else(|| DecodeError::new(record_index, "missing read name"))?;
    let mapping_quality = int_field(wire.mapping_quality, "mapping_quality", record_index)?;
    let score = int_field(wire.score, "score", record_index)?;

    let mut mappings = Vec::new();
    for mapping in wire.path.unwrap_or_default().mapping {
        let Some(position) = mapping.position else {
            continue;
        };
        let Some(node_id) = position.node_id else {
            continue;
        };
        let offset = match position.offset {
            Some(offset) => Some(
                offset
                    .to_i64()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| {
                        DecodeError::new(record_index, format!("invalid offset: {:?}", offset))
                    })?,
            ),
            None => None,
        };
        mappings.push(Mapping {
            node_id: node_id.into_id(),
            offset,
        });
    }

    Ok(AlignmentRecord {
        name,
        sequence: wire.sequence,
        mapping_quality: mapping_quality.unwrap_or(0),
        score,
        quality: wire.quality,
        mappings,
    })
}

fn decode_frame(raw: &[u8], record_index: u64) -> Result<AlignmentRecord, DecodeError> {
    let (record, used): (AlignmentRecord, usize) =
        bincode::serde::decode_from_slice(raw, bincode::config::standard())
            .map_err(|e| DecodeError::new(record_index, format!("invalid frame payload: {}", e)))?;
    if used != raw.len() {
        return Err(DecodeError::new(
            record_index,
            format!("{} trailing bytes in frame payload", raw.len() - used),
        ));
    }
    Ok(record)
}
