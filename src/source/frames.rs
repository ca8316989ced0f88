//! Length-prefixed binary alignment streams.
//!
//! Each frame is a 4-byte little-endian payload length followed by the
//! payload. A stream that ends inside a frame cannot be re-synchronised, so
//! truncation is a stream failure rather than a per-record decode failure.

use super::buffers::{DEFAULT_INPUT_BUFFER, MAX_FRAME_LEN, MMAP_THRESHOLD};
use super::{RawRecord, RecordSource};
use crate::alignment::{AlignmentRecord, RecordFormat};
use crate::error::{GnodeError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::Path;

/// Reads length-prefixed frames from any byte reader.
pub struct FrameSource<R: Read> {
    reader: R,
    label: String,
    next_index: u64,
    offset: u64,
}

impl FrameSource<Box<dyn Read>> {
    /// Open a framed file, memory-mapping it when it is large enough.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            GnodeError::Source(format!("cannot open {}: {}", path.display(), e))
        })?;
        let size = file.metadata()?.len();

        let reader: Box<dyn Read> = if size >= MMAP_THRESHOLD {
            // The file is opened read-only and only read sequentially.
            let mmap = unsafe { Mmap::map(&file)? };
            Box::new(Cursor::new(mmap))
        } else {
            Box::new(BufReader::with_capacity(DEFAULT_INPUT_BUFFER, file))
        };

        Ok(Self::new(reader, path.display().to_string()))
    }
}

impl<R: Read> FrameSource<R> {
    /// Create a frame source over any reader.
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
            next_index: 0,
            offset: 0,
        }
    }

    /// Read the length header, `None` on a clean end of stream.
    fn read_header(&mut self) -> Result<Option<usize>> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(GnodeError::Source(format!(
                        "{}: truncated frame header at byte {}",
                        self.label, self.offset
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.read_failed(e)),
            }
        }
        Ok(Some(u32::from_le_bytes(header) as usize))
    }

    fn read_failed(&self, e: io::Error) -> GnodeError {
        GnodeError::Source(format!(
            "{}: read failed at byte {}: {}",
            self.label, self.offset, e
        ))
    }
}

impl<R: Read> RecordSource for FrameSource<R> {
    fn format(&self) -> RecordFormat {
        RecordFormat::Frames
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn next_raw(&mut self) -> Result<Option<RawRecord>> {
        let Some(len) = self.read_header()? else {
            return Ok(None);
        };
        if len > MAX_FRAME_LEN {
            return Err(GnodeError::Source(format!(
                "{}: frame at byte {} declares {} bytes (limit {})",
                self.label, self.offset, len, MAX_FRAME_LEN
            )));
        }

        let mut bytes = vec![0u8; len];
        self.reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                GnodeError::Source(format!(
                    "{}: truncated frame at byte {} (expected {} payload bytes)",
                    self.label, self.offset, len
                ))
            } else {
                self.read_failed(e)
            }
        })?;
        self.offset += 4 + len as u64;

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(RawRecord { index, bytes }))
    }
}

/// Write one record as a frame.
pub fn write_frame<W: Write>(writer: &mut W, record: &AlignmentRecord) -> Result<()> {
    let payload = record
        .to_frame_payload()
        .map_err(|e| GnodeError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;
    write_raw_frame(writer, &payload)
}

/// Write an already-encoded payload as a frame.
pub fn write_raw_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        GnodeError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame payload exceeds 4 GiB",
        ))
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}
