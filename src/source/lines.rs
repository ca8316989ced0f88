//! Newline-delimited JSON alignment streams.

use super::buffers::{DEFAULT_INPUT_BUFFER, DEFAULT_LINE_BUFFER};
use super::{RawRecord, RecordSource};
use crate::alignment::RecordFormat;
use crate::error::{GnodeError, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Stdin};
use std::path::Path;

/// Reads one JSON record per line from any buffered reader.
///
/// Blank lines are skipped and do not consume a record index.
pub struct LineSource<R: BufRead> {
    reader: R,
    label: String,
    line_number: u64,
    next_index: u64,
    buffer: Vec<u8>,
}

impl LineSource<BufReader<File>> {
    /// Open a JSON-lines file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            GnodeError::Source(format!("cannot open {}: {}", path.display(), e))
        })?;
        Ok(Self::new(
            BufReader::with_capacity(DEFAULT_INPUT_BUFFER, file),
            path.display().to_string(),
        ))
    }
}

impl LineSource<BufReader<Stdin>> {
    /// Read JSON lines from standard input.
    pub fn stdin() -> Self {
        Self::new(
            BufReader::with_capacity(DEFAULT_INPUT_BUFFER, io::stdin()),
            "<stdin>".to_string(),
        )
    }
}

impl<R: BufRead> LineSource<R> {
    /// Create a line source over any buffered reader.
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
            line_number: 0,
            next_index: 0,
            buffer: Vec::with_capacity(DEFAULT_LINE_BUFFER),
        }
    }

    /// Number of lines consumed so far, blank ones included.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

impl<R: BufRead> RecordSource for LineSource<R> {
    fn format(&self) -> RecordFormat {
        RecordFormat::Json
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn next_raw(&mut self) -> Result<Option<RawRecord>> {
        loop {
            self.buffer.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut self.buffer).map_err(|e| {
                GnodeError::Source(format!(
                    "{}: read failed after line {}: {}",
                    self.label, self.line_number, e
                ))
            })?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            while matches!(self.buffer.last(), Some(b'\n' | b'\r')) {
                self.buffer.pop();
            }
            if self.buffer.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            // The line buffer stays with the source; records own a right-sized copy.
            let bytes = self.buffer.to_vec();
            let index = self.next_index;
            self.next_index += 1;
            return Ok(Some(RawRecord { index, bytes }));
        }
    }
}
