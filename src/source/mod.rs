//! Alignment record sources.
//!
//! A source is a single forward pass over an external byte stream. It hands
//! out undecoded records so decoding can run on the worker pool; a failure to
//! decode one record never ends the stream, while a failure of the stream
//! itself (I/O error, truncated frame, non-zero exit of the producing
//! process) is fatal.
//!
//! Backends:
//! - [`LineSource`]: one JSON record per line from a file, stdin or any reader
//! - [`FrameSource`]: 4-byte little-endian length + bincode payload
//! - [`ProcessSource`]: JSON lines from an external program's stdout

pub mod buffers;
pub mod frames;
pub mod lines;
pub mod process;

pub use frames::{write_frame, FrameSource};
pub use lines::LineSource;
pub use process::ProcessSource;

use crate::alignment::{AlignmentRecord, RecordFormat};
use crate::error::{GnodeError, Result};
use std::path::PathBuf;

/// One undecoded record and its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub index: u64,
    pub bytes: Vec<u8>,
}

/// Producer of raw alignment records.
pub trait RecordSource {
    /// Encoding of the records this source yields.
    fn format(&self) -> RecordFormat;

    /// Name of the underlying stream, for diagnostics.
    fn describe(&self) -> String;

    /// Next raw record, `Ok(None)` at end of stream, `Err` if the stream failed.
    fn next_raw(&mut self) -> Result<Option<RawRecord>>;

    /// Decode lazily, one record at a time.
    fn records(self) -> Records<Self>
    where
        Self: Sized,
    {
        Records {
            source: self,
            failed: false,
        }
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn format(&self) -> RecordFormat {
        (**self).format()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn next_raw(&mut self) -> Result<Option<RawRecord>> {
        (**self).next_raw()
    }
}

/// Iterator over decoded records.
///
/// Yields `Err(GnodeError::Decode)` for a malformed record and keeps going;
/// a stream failure is yielded once and ends the iteration.
pub struct Records<S> {
    source: S,
    failed: bool,
}

impl<S: RecordSource> Iterator for Records<S> {
    type Item = Result<(u64, AlignmentRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.source.next_raw() {
            Ok(Some(raw)) => Some(
                self.source
                    .format()
                    .decode(&raw.bytes, raw.index)
                    .map(|record| (raw.index, record))
                    .map_err(GnodeError::from),
            ),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Where the alignment stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A file in the given format; `-` reads JSON lines from stdin.
    File { path: PathBuf, format: RecordFormat },
    /// A shell command whose stdout is JSON lines.
    Command(String),
    /// A GAM file decoded with `<vg> view -a`.
    Gam { vg: String, path: PathBuf },
}

impl SourceSpec {
    /// Open the stream.
    pub fn open(&self) -> Result<Box<dyn RecordSource>> {
        match self {
            SourceSpec::File { path, format } if path.as_os_str() == "-" => match format {
                RecordFormat::Json => Ok(Box::new(LineSource::stdin())),
                RecordFormat::Frames => Ok(Box::new(FrameSource::new(
                    std::io::stdin(),
                    "<stdin>",
                ))),
            },
            SourceSpec::File { path, format } => match format {
                RecordFormat::Json => Ok(Box::new(LineSource::from_path(path)?)),
                RecordFormat::Frames => Ok(Box::new(FrameSource::open(path)?)),
            },
            SourceSpec::Command(command_line) => Ok(Box::new(ProcessSource::shell(command_line)?)),
            SourceSpec::Gam { vg, path } => Ok(Box::new(ProcessSource::vg_view(vg, path)?)),
        }
    }
}
