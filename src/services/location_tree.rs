//! LocationTree: per-user semester → subject → topic hierarchy.
//!
//! Node ids are unique within a user's tree; names are not. Adds are
//! set-insertions keyed by id, so replaying an add with the same id is a
//! no-op. Deleting a node drops its subtree from the tree only: objects that
//! reference it keep their (now dangling) location ids.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::models::{
    location::{Hierarchy, MissingSegment, NodeRef, Semester, Subject, Topic},
    object::LocationRef,
};
use crate::services::user_documents::{Change, UserDocuments};

#[derive(Clone)]
pub struct LocationTree {
    docs: UserDocuments<Hierarchy>,
}

fn require_name(raw: &str) -> StorageResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StorageError::Validation("name must not be empty".into()));
    }
    Ok(name)
}

fn missing(segment: MissingSegment) -> StorageError {
    StorageError::not_found(segment)
}

impl LocationTree {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            docs: UserDocuments::new(db),
        }
    }

    /// The owner's whole tree.
    pub async fn get(&self, owner_id: &str) -> StorageResult<Hierarchy> {
        self.docs.load(owner_id).await
    }

    pub async fn add_semester(&self, owner_id: &str, name: &str) -> StorageResult<Semester> {
        self.insert_semester(owner_id, Uuid::new_v4(), name).await
    }

    /// Insert a semester with a caller-chosen id; a no-op if the id exists.
    pub async fn insert_semester(
        &self,
        owner_id: &str,
        id: Uuid,
        name: &str,
    ) -> StorageResult<Semester> {
        let name = require_name(name)?;
        let semester = self
            .docs
            .update(owner_id, |tree| {
                let inserted = tree.insert_semester(id, name);
                let node = tree.semester(id).map_err(missing)?.clone();
                Ok(if inserted {
                    Change::Write(node)
                } else {
                    Change::Skip(node)
                })
            })
            .await?;
        info!("semester {} ready for {}", semester.id, owner_id);
        Ok(semester)
    }

    pub async fn add_subject(
        &self,
        owner_id: &str,
        semester_id: Uuid,
        name: &str,
    ) -> StorageResult<Subject> {
        self.insert_subject(owner_id, semester_id, Uuid::new_v4(), name)
            .await
    }

    pub async fn insert_subject(
        &self,
        owner_id: &str,
        semester_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> StorageResult<Subject> {
        let name = require_name(name)?;
        let subject = self
            .docs
            .update(owner_id, |tree| {
                let inserted = tree.insert_subject(semester_id, id, name).map_err(missing)?;
                let node = tree.subject(semester_id, id).map_err(missing)?.clone();
                Ok(if inserted {
                    Change::Write(node)
                } else {
                    Change::Skip(node)
                })
            })
            .await?;
        info!(
            "subject {} ready under semester {} for {}",
            subject.id, semester_id, owner_id
        );
        Ok(subject)
    }

    pub async fn add_topic(
        &self,
        owner_id: &str,
        semester_id: Uuid,
        subject_id: Uuid,
        name: &str,
    ) -> StorageResult<Topic> {
        self.insert_topic(owner_id, semester_id, subject_id, Uuid::new_v4(), name)
            .await
    }

    pub async fn insert_topic(
        &self,
        owner_id: &str,
        semester_id: Uuid,
        subject_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> StorageResult<Topic> {
        let name = require_name(name)?;
        let topic = self
            .docs
            .update(owner_id, |tree| {
                let inserted = tree
                    .insert_topic(semester_id, subject_id, id, name)
                    .map_err(missing)?;
                let node = tree
                    .topic(semester_id, subject_id, id)
                    .map_err(missing)?
                    .clone();
                Ok(if inserted {
                    Change::Write(node)
                } else {
                    Change::Skip(node)
                })
            })
            .await?;
        info!(
            "topic {} ready under subject {} for {}",
            topic.id, subject_id, owner_id
        );
        Ok(topic)
    }

    /// Rename a node in place. Child ids and object placements are untouched.
    pub async fn rename(&self, owner_id: &str, node: NodeRef, name: &str) -> StorageResult<()> {
        let name = require_name(name)?;
        self.docs
            .update(owner_id, |tree| {
                let changed = tree.rename(node, name).map_err(missing)?;
                Ok(if changed {
                    Change::Write(())
                } else {
                    Change::Skip(())
                })
            })
            .await
    }

    /// Remove a node and its subtree.
    ///
    /// Objects placed under the removed node keep their location ids.
    pub async fn delete(&self, owner_id: &str, node: NodeRef) -> StorageResult<()> {
        self.docs
            .update(owner_id, |tree| {
                tree.remove(node).map_err(missing)?;
                Ok(Change::Write(()))
            })
            .await?;
        info!("removed {:?} for {}", node, owner_id);
        Ok(())
    }

    /// Names along a partial or full path, failing at the first missing segment.
    pub async fn resolve_path(
        &self,
        owner_id: &str,
        semester_id: Uuid,
        subject_id: Option<Uuid>,
        topic_id: Option<Uuid>,
    ) -> StorageResult<Vec<String>> {
        if topic_id.is_some() && subject_id.is_none() {
            return Err(StorageError::Validation(
                "a topic id requires a subject id".into(),
            ));
        }
        let tree = self.docs.load(owner_id).await?;
        tree.resolve_path(semester_id, subject_id, topic_id)
            .map_err(missing)
    }

    /// Check that `location` names an existing, correctly nested topic.
    pub async fn validate(&self, owner_id: &str, location: &LocationRef) -> StorageResult<()> {
        let tree = self.docs.load(owner_id).await?;
        tree.contains(location)
            .map_err(|segment| StorageError::InvalidLocation(format!("{} does not exist", segment)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn builds_and_resolves_a_path() {
        let tree = LocationTree::new(test_pool().await);
        let sem = tree.add_semester("alice", "2024").await.unwrap();
        let sub = tree.add_subject("alice", sem.id, "Math").await.unwrap();
        let top = tree
            .add_topic("alice", sem.id, sub.id, "Algebra")
            .await
            .unwrap();

        let names = tree
            .resolve_path("alice", sem.id, Some(sub.id), Some(top.id))
            .await
            .unwrap();
        assert_eq!(names, vec!["2024", "Math", "Algebra"]);
        let partial = tree
            .resolve_path("alice", sem.id, Some(sub.id), None)
            .await
            .unwrap();
        assert_eq!(partial, vec!["2024", "Math"]);
    }

    #[tokio::test]
    async fn explicit_id_insert_is_idempotent() {
        let tree = LocationTree::new(test_pool().await);
        let id = Uuid::new_v4();
        tree.insert_semester("alice", id, "Fall").await.unwrap();
        tree.insert_semester("alice", id, "Fall").await.unwrap();
        assert_eq!(tree.get("alice").await.unwrap().semesters.len(), 1);

        tree.add_semester("alice", "Fall").await.unwrap();
        tree.add_semester("alice", "Fall").await.unwrap();
        assert_eq!(tree.get("alice").await.unwrap().semesters.len(), 3);
    }

    #[tokio::test]
    async fn trees_are_scoped_per_owner() {
        let tree = LocationTree::new(test_pool().await);
        let sem = tree.add_semester("alice", "2024").await.unwrap();
        let err = tree
            .add_subject("bob", sem.id, "Math")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(tree.get("bob").await.unwrap().semesters.is_empty());
    }

    #[tokio::test]
    async fn rejects_blank_names() {
        let tree = LocationTree::new(test_pool().await);
        let err = tree.add_semester("alice", "   ").await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn validate_reports_wrong_nesting() {
        let tree = LocationTree::new(test_pool().await);
        let sem = tree.add_semester("alice", "2024").await.unwrap();
        let other = tree.add_semester("alice", "2025").await.unwrap();
        let sub = tree.add_subject("alice", sem.id, "Math").await.unwrap();
        let top = tree
            .add_topic("alice", sem.id, sub.id, "Algebra")
            .await
            .unwrap();

        let good = LocationRef {
            semester_id: sem.id,
            subject_id: sub.id,
            topic_id: top.id,
        };
        tree.validate("alice", &good).await.unwrap();

        let crossed = LocationRef {
            semester_id: other.id,
            ..good
        };
        assert!(matches!(
            tree.validate("alice", &crossed).await,
            Err(StorageError::InvalidLocation(_))
        ));
    }

    #[tokio::test]
    async fn delete_cascades_and_rename_keeps_ids() {
        let tree = LocationTree::new(test_pool().await);
        let sem = tree.add_semester("alice", "2024").await.unwrap();
        let sub = tree.add_subject("alice", sem.id, "Math").await.unwrap();
        tree.add_topic("alice", sem.id, sub.id, "Algebra")
            .await
            .unwrap();

        let node = NodeRef::Subject {
            semester_id: sem.id,
            subject_id: sub.id,
        };
        tree.rename("alice", node, "Mathematics").await.unwrap();
        let names = tree
            .resolve_path("alice", sem.id, Some(sub.id), None)
            .await
            .unwrap();
        assert_eq!(names, vec!["2024", "Mathematics"]);

        tree.delete("alice", NodeRef::Semester { semester_id: sem.id })
            .await
            .unwrap();
        assert!(matches!(
            tree.resolve_path("alice", sem.id, None, None).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            tree.delete("alice", node).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
