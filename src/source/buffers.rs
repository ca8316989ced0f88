//! Buffer size constants for stream I/O.
//!
//! These constants control memory usage vs I/O throughput tradeoffs.

/// Input buffer for alignment streams (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Initial line buffer capacity (16 KB).
/// JSON alignment records with a full path and quality string are a few KB.
pub const DEFAULT_LINE_BUFFER: usize = 16 * 1024;

/// Output buffer for checkpoint and output files (2 MB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Minimum framed file size to use mmap (smaller files use buffered I/O).
pub const MMAP_THRESHOLD: u64 = 64 * 1024;

/// Largest frame payload accepted before the stream is considered corrupt.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;
