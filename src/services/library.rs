//! src/services/library.rs
//!
//! Library: the handle the transport layer talks to. It owns one instance of
//! each storage component, all sharing the same SQLite pool, and runs the
//! multi-step flows that span them:
//!
//! - upload: validate → write chunks → commit catalog record
//! - download: catalog lookup → chunk reassembly
//! - delete: catalog record → chunks → tag sweep
//! - tag/untag: registry + object snapshots (+ sweep on untag)

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::models::{
    chunk::expected_chunk_count,
    object::{LocationRef, ObjectKind, StoredObject},
    tag::Tag,
};
use crate::services::{
    chunk_store::{ByteStream, ChunkStore},
    location_tree::LocationTree,
    object_catalog::{NewObject, ObjectCatalog},
    replace_workflow::ReplaceWorkflow,
    tag_registry::TagRegistry,
};

/// Parameters for a file upload; the bytes arrive separately as a stream.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub display_name: String,
    pub content_type: Option<String>,
    pub location: Option<LocationRef>,
}

/// Result of cross-checking a file's chunks against its catalog record.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct IntegrityReport {
    pub object_id: Uuid,
    pub recorded_size: i64,
    pub stored_size: i64,
    pub expected_chunks: u64,
    pub stored_chunks: u64,
    /// Sequences run `0..k` without gaps.
    pub contiguous: bool,
    pub intact: bool,
}

#[derive(Clone)]
pub struct Library {
    /// Shared SQLite connection pool, also used by readiness checks.
    pub db: Arc<SqlitePool>,
    pub chunks: ChunkStore,
    pub catalog: ObjectCatalog,
    pub locations: LocationTree,
    pub tags: TagRegistry,
    pub replace: ReplaceWorkflow,
}

impl Library {
    pub fn new(db: Arc<SqlitePool>, chunk_size: usize) -> Self {
        let chunks = ChunkStore::new(db.clone(), chunk_size);
        let locations = LocationTree::new(db.clone());
        let catalog = ObjectCatalog::new(db.clone(), locations.clone());
        let tags = TagRegistry::new(db.clone(), catalog.clone());
        let replace = ReplaceWorkflow::new(chunks.clone(), catalog.clone());
        Self {
            db,
            chunks,
            catalog,
            locations,
            tags,
            replace,
        }
    }

    /// Store a new file: bytes first, then the catalog record.
    ///
    /// A crash between the two leaves orphan chunks, never a record without
    /// content.
    pub async fn upload_file<S>(
        &self,
        owner_id: &str,
        file: NewFile,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut new = NewObject {
            owner_id: owner_id.to_string(),
            display_name: file.display_name,
            location: file.location,
            kind: ObjectKind::File {
                size_bytes: 0,
                content_type: file.content_type.clone(),
                etag: None,
            },
        };
        self.catalog.validate_new(&new).await?;

        let object_id = Uuid::new_v4();
        let summary = self.chunks.write(object_id, stream).await?;
        new.kind = ObjectKind::File {
            size_bytes: summary.size_bytes,
            content_type: file.content_type,
            etag: Some(summary.etag),
        };

        match self.catalog.create(object_id, new).await {
            Ok(object) => Ok(object),
            Err(err) => {
                if let Err(cleanup) = self.chunks.delete(object_id).await {
                    warn!(
                        "catalog commit for {} failed and its chunks could not be removed: {}",
                        object_id, cleanup
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn create_link(
        &self,
        owner_id: &str,
        display_name: &str,
        url: &str,
        location: Option<LocationRef>,
    ) -> StorageResult<StoredObject> {
        self.catalog
            .create(
                Uuid::new_v4(),
                NewObject {
                    owner_id: owner_id.to_string(),
                    display_name: display_name.to_string(),
                    location,
                    kind: ObjectKind::Link {
                        url: url.to_string(),
                    },
                },
            )
            .await
    }

    /// Catalog record plus a stream of the file's bytes.
    pub async fn open_file(
        &self,
        owner_id: &str,
        object_id: Uuid,
    ) -> StorageResult<(StoredObject, ByteStream)> {
        let object = self.catalog.get(owner_id, object_id).await?;
        let body = match object.size_bytes() {
            None => {
                return Err(StorageError::Validation(format!(
                    "object `{}` is a link and has no content",
                    object_id
                )));
            }
            Some(0) => stream::empty::<StorageResult<Bytes>>().boxed(),
            Some(_) => self.chunks.read(object_id).await?,
        };
        Ok((object, body))
    }

    /// Compare the stored chunks of a file with its recorded size.
    pub async fn verify_file(
        &self,
        owner_id: &str,
        object_id: Uuid,
    ) -> StorageResult<IntegrityReport> {
        let object = self.catalog.get(owner_id, object_id).await?;
        let recorded_size = object.size_bytes().ok_or_else(|| {
            StorageError::Validation(format!("object `{}` is a link", object_id))
        })?;

        let infos = self.chunks.chunk_infos(object_id).await?;
        let stored_size: i64 = infos.iter().map(|c| c.payload_len).sum();
        let contiguous = infos
            .iter()
            .enumerate()
            .all(|(i, c)| c.sequence == i as i64);
        let expected_chunks =
            expected_chunk_count(recorded_size.max(0) as u64, self.chunks.chunk_size());
        let stored_chunks = infos.len() as u64;

        Ok(IntegrityReport {
            object_id,
            recorded_size,
            stored_size,
            expected_chunks,
            stored_chunks,
            contiguous,
            intact: contiguous && stored_size == recorded_size && stored_chunks == expected_chunks,
        })
    }

    /// Remove an object, its chunks, and any tags it was the last holder of.
    pub async fn delete_object(&self, owner_id: &str, object_id: Uuid) -> StorageResult<StoredObject> {
        let removed = self.catalog.delete(owner_id, object_id).await?;
        if removed.is_file() {
            self.chunks.delete(object_id).await?;
        }
        if !removed.tags.is_empty() {
            self.tags.collect_quietly(owner_id).await;
        }
        info!("deleted {} `{}`", removed.kind.as_str(), removed.display_name);
        Ok(removed)
    }

    /// Find or create the tag named `raw_name` and attach it to the object.
    pub async fn tag_object(
        &self,
        owner_id: &str,
        object_id: Uuid,
        raw_name: &str,
    ) -> StorageResult<(Tag, StoredObject)> {
        // Fail before registering a tag for a missing object.
        self.catalog.get(owner_id, object_id).await?;
        let tag = self.tags.get_or_create(owner_id, raw_name).await?;
        self.tags.attach(owner_id, object_id, &tag).await?;
        let object = self.catalog.get(owner_id, object_id).await?;
        Ok((tag, object))
    }

    /// Detach `tag_name` from the object, then sweep unused tags.
    pub async fn untag_object(
        &self,
        owner_id: &str,
        object_id: Uuid,
        tag_name: &str,
    ) -> StorageResult<StoredObject> {
        let object = self.tags.detach(owner_id, object_id, tag_name).await?;
        self.tags.collect_quietly(owner_id).await;
        Ok(object)
    }
}
