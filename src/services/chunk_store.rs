//! src/services/chunk_store.rs
//!
//! ChunkStore: byte-exact persistence of file payloads as fixed-size chunks
//! keyed by `(object_id, sequence)`. Writes are streamed so at most one chunk
//! is buffered in memory; reads stream chunks back in ascending `sequence`.
//!
//! One writer per object id at a time. The store does not lock; a second
//! concurrent writer collides on the `(object_id, sequence)` primary key and
//! fails with `StorageError::Conflict`.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut, stream, stream::BoxStream};
use md5::Context;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult, is_unique_violation};
use crate::models::chunk::{ChunkInfo, WriteSummary};

/// Stream of file bytes handed back to callers.
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

#[derive(Clone)]
pub struct ChunkStore {
    /// Shared SQLite connection pool holding the `chunks` table.
    db: Arc<SqlitePool>,

    /// Maximum payload length of a single chunk.
    chunk_size: usize,
}

impl ChunkStore {
    pub fn new(db: Arc<SqlitePool>, chunk_size: usize) -> Self {
        Self {
            db,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Consume `stream` fully and persist it as chunks `0..k` of `object_id`.
    ///
    /// Every chunk but the last is exactly `chunk_size` bytes; an empty stream
    /// persists no chunks at all. On failure the chunks this call already wrote
    /// are removed best-effort, and the caller must not record catalog metadata.
    /// A write that fails before its first chunk touches nothing.
    pub async fn write<S>(&self, object_id: Uuid, stream: S) -> StorageResult<WriteSummary>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut persisted = 0u32;
        match self.write_chunks(object_id, stream, &mut persisted).await {
            Ok(summary) => {
                debug!(
                    "stored object {} as {} chunks ({} bytes)",
                    object_id, summary.chunk_count, summary.size_bytes
                );
                Ok(summary)
            }
            Err(err) => {
                if persisted > 0 && !matches!(err, StorageError::Conflict(_)) {
                    if let Err(cleanup) = self.delete(object_id).await {
                        warn!(
                            "failed to remove partial chunks of {}: {}",
                            object_id, cleanup
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn write_chunks<S>(
        &self,
        object_id: Uuid,
        stream: S,
        persisted: &mut u32,
    ) -> StorageResult<WriteSummary>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let id = object_id.to_string();
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut digest = Context::new();
        let mut size_bytes: i64 = 0;
        let mut sequence: u32 = 0;

        pin_mut!(stream);
        while let Some(next) = stream.next().await {
            let data = next.map_err(StorageError::write)?;
            size_bytes += data.len() as i64;
            digest.consume(&data);

            let mut rest = &data[..];
            while !rest.is_empty() {
                let take = (self.chunk_size - buffer.len()).min(rest.len());
                buffer.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if buffer.len() == self.chunk_size {
                    let payload = buffer.split().freeze();
                    self.persist(&id, sequence, &payload).await?;
                    sequence += 1;
                    *persisted = sequence;
                }
            }
        }

        if !buffer.is_empty() {
            let payload = buffer.split().freeze();
            self.persist(&id, sequence, &payload).await?;
            sequence += 1;
            *persisted = sequence;
        }

        Ok(WriteSummary {
            size_bytes,
            chunk_count: sequence,
            etag: format!("{:x}", digest.compute()),
        })
    }

    async fn persist(&self, object_id: &str, sequence: u32, payload: &[u8]) -> StorageResult<()> {
        sqlx::query("INSERT INTO chunks (object_id, sequence, payload) VALUES (?, ?, ?)")
            .bind(object_id)
            .bind(i64::from(sequence))
            .bind(payload)
            .execute(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StorageError::Conflict(format!(
                        "chunk {} of object `{}` already exists; another writer is active",
                        sequence, object_id
                    ))
                } else {
                    StorageError::write(err)
                }
            })?;
        debug!(
            "persisted chunk {} of {} ({} bytes)",
            sequence,
            object_id,
            payload.len()
        );
        Ok(())
    }

    /// Stream the object's bytes, chunk by chunk, in ascending `sequence`.
    ///
    /// Fails with `NotFound` when no chunk exists. The total length is not
    /// checked against catalog metadata.
    pub async fn read(&self, object_id: Uuid) -> StorageResult<ByteStream> {
        let id = object_id.to_string();
        let sequences: Vec<i64> = sqlx::query_scalar(
            "SELECT sequence FROM chunks WHERE object_id = ? ORDER BY sequence ASC",
        )
        .bind(&id)
        .fetch_all(&*self.db)
        .await
        .map_err(StorageError::read)?;

        if sequences.is_empty() {
            return Err(StorageError::not_found(format!(
                "content of object `{}`",
                object_id
            )));
        }

        let db = self.db.clone();
        let chunks = stream::iter(sequences).then(move |sequence| {
            let db = db.clone();
            let id = id.clone();
            async move {
                let payload: Vec<u8> = sqlx::query_scalar(
                    "SELECT payload FROM chunks WHERE object_id = ? AND sequence = ?",
                )
                .bind(&id)
                .bind(sequence)
                .fetch_one(&*db)
                .await
                .map_err(StorageError::read)?;
                Ok::<_, StorageError>(Bytes::from(payload))
            }
        });

        Ok(chunks.boxed())
    }

    /// Sequence numbers and payload lengths of every chunk, in order.
    pub async fn chunk_infos(&self, object_id: Uuid) -> StorageResult<Vec<ChunkInfo>> {
        sqlx::query_as::<_, ChunkInfo>(
            "SELECT sequence, length(payload) AS payload_len
             FROM chunks WHERE object_id = ? ORDER BY sequence ASC",
        )
        .bind(object_id.to_string())
        .fetch_all(&*self.db)
        .await
        .map_err(StorageError::read)
    }

    /// Remove every chunk of `object_id`. Returns how many were removed;
    /// zero is not an error.
    pub async fn delete(&self, object_id: Uuid) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE object_id = ?")
            .bind(object_id.to_string())
            .execute(&*self.db)
            .await
            .map_err(StorageError::write)?;
        debug!(
            "removed {} chunks of {}",
            result.rows_affected(),
            object_id
        );
        Ok(result.rows_affected())
    }
}

/// Collect a byte stream into memory.
#[cfg(test)]
pub async fn collect_bytes(mut stream: ByteStream) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Wrap an in-memory buffer as a stream of `piece`-sized reads.
#[cfg(test)]
pub fn body_stream(
    data: Vec<u8>,
    piece: usize,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let pieces: Vec<io::Result<Bytes>> = data
        .chunks(piece.max(1))
        .map(|p| Ok(Bytes::copy_from_slice(p)))
        .collect();
    stream::iter(pieces)
}
