//! Represents one fixed-size slice of a file's bytes.

use serde::Serialize;
use sqlx::FromRow;

/// Default chunk payload size: 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Length and position of a persisted chunk, without its payload.
#[derive(Serialize, Clone, Copy, FromRow, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Zero-based position within the object.
    pub sequence: i64,

    /// Payload length in bytes.
    pub payload_len: i64,
}

/// Outcome of streaming an object into the chunk store.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct WriteSummary {
    pub size_bytes: i64,
    pub chunk_count: u32,
    pub etag: String,
}

/// Number of chunks an object of `size_bytes` occupies.
pub fn expected_chunk_count(size_bytes: u64, chunk_size: usize) -> u64 {
    size_bytes.div_ceil(chunk_size as u64)
}
