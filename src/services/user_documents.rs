//! Per-user JSON documents with optimistic, revision-checked updates.
//!
//! Each user owns one row per document table. Updates read the document and
//! its `revision`, apply a closure, and write back only if the revision is
//! unchanged; a lost race re-runs the whole read-apply-write.

use serde::{Serialize, de::DeserializeOwned};
use sqlx::SqlitePool;
use std::{marker::PhantomData, sync::Arc};
use tracing::debug;

use crate::errors::{StorageError, StorageResult};
use crate::models::{location::Hierarchy, tag::TagVocabulary};

const MAX_UPDATE_ATTEMPTS: usize = 8;

/// A document stored once per user in its own table.
pub trait UserDocument: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const TABLE: &'static str;
}

impl UserDocument for Hierarchy {
    const TABLE: &'static str = "location_trees";
}

impl UserDocument for TagVocabulary {
    const TABLE: &'static str = "tag_registries";
}

/// What an update closure decided.
pub enum Change<T> {
    /// Persist the modified document and return the value.
    Write(T),
    /// Leave the stored document untouched.
    Skip(T),
}

pub struct UserDocuments<D> {
    db: Arc<SqlitePool>,
    _doc: PhantomData<fn() -> D>,
}

impl<D> Clone for UserDocuments<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _doc: PhantomData,
        }
    }
}

impl<D: UserDocument> UserDocuments<D> {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            db,
            _doc: PhantomData,
        }
    }

    /// Current document for `owner_id`; the empty default when none is stored.
    pub async fn load(&self, owner_id: &str) -> StorageResult<D> {
        Ok(self
            .fetch(owner_id)
            .await?
            .map(|(doc, _)| doc)
            .unwrap_or_default())
    }

    async fn fetch(&self, owner_id: &str) -> StorageResult<Option<(D, i64)>> {
        let row: Option<(String, i64)> = sqlx::query_as(&format!(
            "SELECT document, revision FROM {} WHERE owner_id = ?",
            D::TABLE
        ))
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await
        .map_err(StorageError::read)?;

        row.map(|(json, revision)| {
            serde_json::from_str(&json)
                .map(|doc| (doc, revision))
                .map_err(StorageError::read)
        })
        .transpose()
    }

    /// Apply `apply` to the owner's document and persist the result.
    ///
    /// `apply` may run more than once when concurrent updates race, so it must
    /// only depend on the document it is handed.
    pub async fn update<T, F>(&self, owner_id: &str, mut apply: F) -> StorageResult<T>
    where
        F: FnMut(&mut D) -> StorageResult<Change<T>>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let (mut doc, revision) = match self.fetch(owner_id).await? {
                Some(found) => found,
                None => {
                    self.create_empty(owner_id).await?;
                    (D::default(), 0)
                }
            };

            let value = match apply(&mut doc)? {
                Change::Skip(value) => return Ok(value),
                Change::Write(value) => value,
            };

            let json = serde_json::to_string(&doc).map_err(StorageError::write)?;
            let result = sqlx::query(&format!(
                "UPDATE {} SET document = ?, revision = revision + 1
                 WHERE owner_id = ? AND revision = ?",
                D::TABLE
            ))
            .bind(&json)
            .bind(owner_id)
            .bind(revision)
            .execute(&*self.db)
            .await
            .map_err(StorageError::write)?;

            if result.rows_affected() == 1 {
                return Ok(value);
            }
            debug!(
                "{} revision {} for {} moved underneath us (attempt {})",
                D::TABLE,
                revision,
                owner_id,
                attempt
            );
        }

        Err(StorageError::Conflict(format!(
            "{} for `{}` kept changing during update",
            D::TABLE,
            owner_id
        )))
    }

    async fn create_empty(&self, owner_id: &str) -> StorageResult<()> {
        let json = serde_json::to_string(&D::default()).map_err(StorageError::write)?;
        sqlx::query(&format!(
            "INSERT INTO {} (owner_id, document, revision) VALUES (?, ?, 0)
             ON CONFLICT(owner_id) DO NOTHING",
            D::TABLE
        ))
        .bind(owner_id)
        .bind(&json)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::tag::Tag;
    use uuid::Uuid;

    #[tokio::test]
    async fn missing_document_loads_as_default() {
        let docs = UserDocuments::<TagVocabulary>::new(test_pool().await);
        assert_eq!(docs.load("nobody").await.unwrap(), TagVocabulary::default());
    }

    #[tokio::test]
    async fn skip_does_not_bump_revision() {
        let db = test_pool().await;
        let docs = UserDocuments::<TagVocabulary>::new(db.clone());
        let tag = Tag {
            id: Uuid::new_v4(),
            name: "Math".into(),
        };

        docs.update("alice", |vocab| {
            vocab.tags.push(tag.clone());
            Ok(Change::Write(()))
        })
        .await
        .unwrap();
        docs.update("alice", |_| Ok(Change::Skip(())))
            .await
            .unwrap();

        let revision: i64 =
            sqlx::query_scalar("SELECT revision FROM tag_registries WHERE owner_id = 'alice'")
                .fetch_one(&*db)
                .await
                .unwrap();
        assert_eq!(revision, 1);
        assert_eq!(docs.load("alice").await.unwrap().tags, vec![tag]);
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let docs = UserDocuments::<Hierarchy>::new(test_pool().await);
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        let updates = ids.iter().map(|id| {
            let docs = docs.clone();
            let id = *id;
            async move {
                docs.update("alice", |tree| {
                    tree.insert_semester(id, "Term");
                    Ok(Change::Write(()))
                })
                .await
            }
        });
        for result in futures::future::join_all(updates).await {
            result.unwrap();
        }

        let tree = docs.load("alice").await.unwrap();
        assert_eq!(tree.semesters.len(), ids.len());
        for id in ids {
            assert!(tree.semester(id).is_ok());
        }
    }
}
