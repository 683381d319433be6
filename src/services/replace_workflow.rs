//! ReplaceWorkflow: swap a file's bytes while keeping its metadata.
//!
//! Steps run in order: delete old chunks, write new chunks, update the
//! catalog record. Between the first two steps the file has no readable
//! content; a failure there leaves it unavailable until a replace succeeds.
//! There is no rollback.

use bytes::Bytes;
use futures::Stream;
use std::io;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::models::object::StoredObject;
use crate::services::{chunk_store::ChunkStore, object_catalog::ObjectCatalog};

#[derive(Clone)]
pub struct ReplaceWorkflow {
    chunks: ChunkStore,
    catalog: ObjectCatalog,
}

impl ReplaceWorkflow {
    pub fn new(chunks: ChunkStore, catalog: ObjectCatalog) -> Self {
        Self { chunks, catalog }
    }

    /// Replace the content of file `object_id` with `stream`.
    ///
    /// Name, placement and tags are preserved. `content_type`, when given,
    /// overwrites the recorded one.
    pub async fn replace<S>(
        &self,
        owner_id: &str,
        object_id: Uuid,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let existing = self.catalog.get(owner_id, object_id).await?;
        if !existing.is_file() {
            return Err(StorageError::Validation(format!(
                "object `{}` is a link and has no content to replace",
                object_id
            )));
        }

        let removed = self.chunks.delete(object_id).await?;
        let summary = match self.chunks.write(object_id, stream).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(
                    "replace of {} failed after removing {} old chunks; content unavailable: {}",
                    object_id, removed, err
                );
                return Err(err);
            }
        };

        let updated = self
            .catalog
            .update_content(
                owner_id,
                object_id,
                summary.size_bytes,
                content_type,
                &summary.etag,
            )
            .await?;
        info!(
            "replaced content of {} ({} -> {} bytes)",
            object_id,
            existing.size_bytes().unwrap_or(0),
            summary.size_bytes
        );
        Ok(updated)
    }
}
