//! Error types shared by every stage of the grouping pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A single alignment record that could not be decoded.
///
/// Recovered locally: the record is skipped and the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {record_index}: {message}")]
pub struct DecodeError {
    /// Zero-based position of the record in the input stream.
    pub record_index: u64,
    pub message: String,
}

impl DecodeError {
    pub fn new(record_index: u64, message: impl Into<String>) -> Self {
        Self {
            record_index,
            message: message.into(),
        }
    }
}

/// Errors that can occur while building, running or merging a grouping run.
#[derive(Error, Debug)]
pub enum GnodeError {
    #[error("invalid node index: {0}")]
    Index(String),

    #[error("malformed alignment {0}")]
    Decode(#[from] DecodeError),

    #[error("alignment stream failed: {0}")]
    Source(String),

    #[error("could not write {} after {attempts} attempt(s): {source}", path.display())]
    Write {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("bad checkpoint {}: {message}", path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GnodeError {
    /// Name of the pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            GnodeError::Index(_) => "index",
            GnodeError::Decode(_) => "decode",
            GnodeError::Source(_) => "source",
            GnodeError::Write { .. } => "write",
            GnodeError::Checkpoint { .. } => "merge",
            GnodeError::Config(_) => "config",
            GnodeError::Io(_) => "io",
        }
    }

    /// Fatal errors abort the run; decode errors only skip one record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GnodeError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, GnodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(GnodeError::Index("empty".into()).stage(), "index");
        assert_eq!(GnodeError::Source("exit 1".into()).stage(), "source");
        let write = GnodeError::Write {
            path: PathBuf::from("out.json"),
            attempts: 3,
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(write.stage(), "write");
        assert!(write.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_decode_is_not_fatal() {
        let err = GnodeError::from(DecodeError::new(7, "missing name"));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "malformed alignment record 7: missing name");
        assert!(GnodeError::Config("x".into()).is_fatal());
    }
}
