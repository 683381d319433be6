//! src/services/object_catalog.rs
//!
//! ObjectCatalog: the authoritative metadata record for every file and link.
//! Existence, ownership and placement are decided here; file bytes live in
//! the chunk store under the same id. Every query is scoped by `owner_id`, so
//! another user's object is indistinguishable from a missing one.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::models::{
    object::{KIND_FILE, KIND_LINK, LocationRef, ObjectKind, ObjectRow, StoredObject},
    tag::TagSnapshot,
};
use crate::services::location_tree::LocationTree;

const OBJECT_COLUMNS: &str = "id, owner_id, kind, display_name, created_at, size_bytes, \
     content_type, etag, url, semester_id, subject_id, topic_id, tags";

/// Fields required to create a catalog record.
#[derive(Clone, Debug)]
pub struct NewObject {
    pub owner_id: String,
    pub display_name: String,
    pub location: Option<LocationRef>,
    pub kind: ObjectKind,
}

/// Listing filter. Location ids narrow from semester down to topic; `has_url`
/// selects links (`true`) or files (`false`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObjectFilter {
    pub semester_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub has_url: Option<bool>,
    /// Case-insensitive substring of `display_name`.
    pub q: Option<String>,
    pub tag_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ObjectCatalog {
    db: Arc<SqlitePool>,
    locations: LocationTree,
}

fn require_display_name(raw: &str) -> StorageResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StorageError::Validation(
            "display name must not be empty".into(),
        ));
    }
    Ok(name)
}

fn object_not_found(object_id: Uuid) -> StorageError {
    StorageError::not_found(format!("object `{}`", object_id))
}

impl ObjectCatalog {
    pub fn new(db: Arc<SqlitePool>, locations: LocationTree) -> Self {
        Self { db, locations }
    }

    /// Check required fields before any bytes are written.
    pub async fn validate_new(&self, new: &NewObject) -> StorageResult<()> {
        if new.owner_id.trim().is_empty() {
            return Err(StorageError::Validation("owner id must not be empty".into()));
        }
        require_display_name(&new.display_name)?;
        if let ObjectKind::Link { url } = &new.kind {
            if url.trim().is_empty() {
                return Err(StorageError::Validation("link url must not be empty".into()));
            }
        }
        if let Some(location) = &new.location {
            self.locations.validate(&new.owner_id, location).await?;
        }
        Ok(())
    }

    /// Insert a catalog record under `id`.
    ///
    /// For files, call only after the chunk store confirmed the write.
    pub async fn create(&self, id: Uuid, new: NewObject) -> StorageResult<StoredObject> {
        self.validate_new(&new).await?;

        let (size_bytes, content_type, etag, url) = match &new.kind {
            ObjectKind::File {
                size_bytes,
                content_type,
                etag,
            } => (Some(*size_bytes), content_type.clone(), etag.clone(), None),
            ObjectKind::Link { url } => (None, None, None, Some(url.trim().to_string())),
        };
        let location = new.location;

        let row = sqlx::query_as::<_, ObjectRow>(&format!(
            "INSERT INTO objects (
                id, owner_id, kind, display_name, created_at, size_bytes,
                content_type, etag, url, semester_id, subject_id, topic_id, tags
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '[]')
            RETURNING {}",
            OBJECT_COLUMNS
        ))
        .bind(id.to_string())
        .bind(&new.owner_id)
        .bind(new.kind.as_str())
        .bind(require_display_name(&new.display_name)?)
        .bind(Utc::now())
        .bind(size_bytes)
        .bind(content_type)
        .bind(etag)
        .bind(url)
        .bind(location.map(|l| l.semester_id.to_string()))
        .bind(location.map(|l| l.subject_id.to_string()))
        .bind(location.map(|l| l.topic_id.to_string()))
        .fetch_one(&*self.db)
        .await
        .map_err(StorageError::write)?;

        let object = StoredObject::try_from(row)?;
        info!(
            "cataloged {} `{}` ({}) for {}",
            object.kind.as_str(),
            object.display_name,
            object.id,
            object.owner_id
        );
        Ok(object)
    }

    pub async fn get(&self, owner_id: &str, object_id: Uuid) -> StorageResult<StoredObject> {
        let row = sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {} FROM objects WHERE id = ? AND owner_id = ?",
            OBJECT_COLUMNS
        ))
        .bind(object_id.to_string())
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await
        .map_err(StorageError::read)?
        .ok_or_else(|| object_not_found(object_id))?;
        StoredObject::try_from(row)
    }

    /// Change the display name. Renaming to the current name is a no-op.
    pub async fn rename(
        &self,
        owner_id: &str,
        object_id: Uuid,
        new_name: &str,
    ) -> StorageResult<StoredObject> {
        let name = require_display_name(new_name)?;
        let result = sqlx::query(
            "UPDATE objects SET display_name = ? WHERE id = ? AND owner_id = ?",
        )
        .bind(name)
        .bind(object_id.to_string())
        .bind(owner_id)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;
        if result.rows_affected() == 0 {
            return Err(object_not_found(object_id));
        }
        self.get(owner_id, object_id).await
    }

    /// Replace the placement triple in one statement. `None` unplaces the object.
    pub async fn move_object(
        &self,
        owner_id: &str,
        object_id: Uuid,
        location: Option<LocationRef>,
    ) -> StorageResult<StoredObject> {
        if let Some(location) = &location {
            self.locations.validate(owner_id, location).await?;
        }
        let result = sqlx::query(
            "UPDATE objects SET semester_id = ?, subject_id = ?, topic_id = ?
             WHERE id = ? AND owner_id = ?",
        )
        .bind(location.map(|l| l.semester_id.to_string()))
        .bind(location.map(|l| l.subject_id.to_string()))
        .bind(location.map(|l| l.topic_id.to_string()))
        .bind(object_id.to_string())
        .bind(owner_id)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;
        if result.rows_affected() == 0 {
            return Err(object_not_found(object_id));
        }
        debug!("moved {} to {:?}", object_id, location);
        self.get(owner_id, object_id).await
    }

    /// Record new content for a file, keeping name, placement and tags.
    pub async fn update_content(
        &self,
        owner_id: &str,
        object_id: Uuid,
        size_bytes: i64,
        content_type: Option<String>,
        etag: &str,
    ) -> StorageResult<StoredObject> {
        let result = sqlx::query(
            "UPDATE objects
             SET size_bytes = ?, content_type = COALESCE(?, content_type), etag = ?
             WHERE id = ? AND owner_id = ? AND kind = ?",
        )
        .bind(size_bytes)
        .bind(content_type)
        .bind(etag)
        .bind(object_id.to_string())
        .bind(owner_id)
        .bind(KIND_FILE)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;
        if result.rows_affected() == 0 {
            return Err(object_not_found(object_id));
        }
        self.get(owner_id, object_id).await
    }

    /// Remove the catalog record and return what was removed.
    ///
    /// File chunks are not touched here; the library deletes them right after.
    pub async fn delete(&self, owner_id: &str, object_id: Uuid) -> StorageResult<StoredObject> {
        let row = sqlx::query_as::<_, ObjectRow>(&format!(
            "DELETE FROM objects WHERE id = ? AND owner_id = ? RETURNING {}",
            OBJECT_COLUMNS
        ))
        .bind(object_id.to_string())
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await
        .map_err(StorageError::write)?
        .ok_or_else(|| object_not_found(object_id))?;
        info!("removed catalog record {} for {}", object_id, owner_id);
        StoredObject::try_from(row)
    }

    /// Objects of `owner_id` matching `filter`, newest first.
    pub async fn find(
        &self,
        owner_id: &str,
        filter: &ObjectFilter,
    ) -> StorageResult<Vec<StoredObject>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM objects WHERE owner_id = ",
            OBJECT_COLUMNS
        ));
        builder.push_bind(owner_id.to_string());

        if let Some(semester_id) = filter.semester_id {
            builder.push(" AND semester_id = ");
            builder.push_bind(semester_id.to_string());
        }
        if let Some(subject_id) = filter.subject_id {
            builder.push(" AND subject_id = ");
            builder.push_bind(subject_id.to_string());
        }
        if let Some(topic_id) = filter.topic_id {
            builder.push(" AND topic_id = ");
            builder.push_bind(topic_id.to_string());
        }
        if let Some(has_url) = filter.has_url {
            builder.push(" AND kind = ");
            builder.push_bind(if has_url { KIND_LINK } else { KIND_FILE });
        }
        if let Some(tag_id) = filter.tag_id {
            builder.push(
                " AND EXISTS (SELECT 1 FROM json_each(objects.tags) \
                 WHERE json_extract(value, '$.id') = ",
            );
            builder.push_bind(tag_id.to_string());
            builder.push(")");
        }
        builder.push(" ORDER BY created_at DESC, id ASC");

        let rows: Vec<ObjectRow> = builder
            .build_query_as()
            .fetch_all(&*self.db)
            .await
            .map_err(StorageError::read)?;

        // SQLite's lower() only folds ASCII, so the name match happens here.
        let needle = filter
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);
        rows.into_iter()
            .filter(|row| match &needle {
                Some(needle) => row.display_name.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .map(StoredObject::try_from)
            .collect()
    }

    /// Add a tag snapshot unless one with the same tag id is already present.
    ///
    /// Returns `true` when the snapshot was added.
    pub async fn add_tag(
        &self,
        owner_id: &str,
        object_id: Uuid,
        tag: &TagSnapshot,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE objects
             SET tags = json_insert(tags, '$[#]', json_object('id', ?1, 'name', ?2))
             WHERE id = ?3 AND owner_id = ?4
               AND NOT EXISTS (
                   SELECT 1 FROM json_each(objects.tags)
                   WHERE json_extract(value, '$.id') = ?1
               )",
        )
        .bind(tag.id.to_string())
        .bind(&tag.name)
        .bind(object_id.to_string())
        .bind(owner_id)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Either already tagged or no such object.
        self.get(owner_id, object_id).await?;
        Ok(false)
    }

    /// Drop every snapshot whose name equals `name` exactly.
    pub async fn remove_tags_named(
        &self,
        owner_id: &str,
        object_id: Uuid,
        name: &str,
    ) -> StorageResult<StoredObject> {
        let result = sqlx::query(
            "UPDATE objects
             SET tags = (
                 SELECT COALESCE(json_group_array(json(value)), '[]')
                 FROM json_each(objects.tags)
                 WHERE json_extract(value, '$.name') IS NOT ?
             )
             WHERE id = ? AND owner_id = ?",
        )
        .bind(name)
        .bind(object_id.to_string())
        .bind(owner_id)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;
        if result.rows_affected() == 0 {
            return Err(object_not_found(object_id));
        }
        self.get(owner_id, object_id).await
    }

    /// Rewrite the embedded name of tag `tag_id` on every object of one kind.
    ///
    /// Returns how many objects were rewritten.
    pub async fn rename_tag_snapshots(
        &self,
        owner_id: &str,
        kind: &str,
        tag_id: Uuid,
        new_name: &str,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE objects
             SET tags = (
                 SELECT json_group_array(json(
                     CASE WHEN json_extract(value, '$.id') = ?1
                          THEN json_object('id', ?1, 'name', ?2)
                          ELSE value
                     END))
                 FROM json_each(objects.tags)
             )
             WHERE owner_id = ?3 AND kind = ?4
               AND EXISTS (
                   SELECT 1 FROM json_each(objects.tags)
                   WHERE json_extract(value, '$.id') = ?1
               )",
        )
        .bind(tag_id.to_string())
        .bind(new_name)
        .bind(owner_id)
        .bind(kind)
        .execute(&*self.db)
        .await
        .map_err(StorageError::write)?;
        Ok(result.rows_affected())
    }

    /// Tag ids referenced by any object of `owner_id` with the given kind.
    ///
    /// Objects whose tag list cannot be decoded are skipped with a warning.
    pub async fn referenced_tag_ids(
        &self,
        owner_id: &str,
        kind: &str,
    ) -> StorageResult<HashSet<Uuid>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, tags FROM objects WHERE owner_id = ? AND kind = ?")
                .bind(owner_id)
                .bind(kind)
                .fetch_all(&*self.db)
                .await
                .map_err(StorageError::read)?;

        let mut live = HashSet::new();
        for (object_id, tags) in rows {
            match serde_json::from_str::<Vec<TagSnapshot>>(&tags) {
                Ok(snapshots) => live.extend(snapshots.into_iter().map(|t| t.id)),
                Err(err) => warn!(
                    "skipping unreadable tags of {} {} during sweep: {}",
                    kind, object_id, err
                ),
            }
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::location::NodeRef;

    struct Fixture {
        catalog: ObjectCatalog,
        tree: LocationTree,
        db: Arc<SqlitePool>,
    }

    async fn fixture() -> Fixture {
        let db = test_pool().await;
        let tree = LocationTree::new(db.clone());
        Fixture {
            catalog: ObjectCatalog::new(db.clone(), tree.clone()),
            tree,
            db,
        }
    }

    fn file(owner: &str, name: &str, location: Option<LocationRef>) -> NewObject {
        NewObject {
            owner_id: owner.into(),
            display_name: name.into(),
            location,
            kind: ObjectKind::File {
                size_bytes: 10,
                content_type: None,
                etag: None,
            },
        }
    }

    fn link(owner: &str, name: &str, url: &str) -> NewObject {
        NewObject {
            owner_id: owner.into(),
            display_name: name.into(),
            location: None,
            kind: ObjectKind::Link { url: url.into() },
        }
    }

    async fn placed(tree: &LocationTree, owner: &str) -> LocationRef {
        let sem = tree.add_semester(owner, "2024").await.unwrap();
        let sub = tree.add_subject(owner, sem.id, "Math").await.unwrap();
        let top = tree
            .add_topic(owner, sem.id, sub.id, "Algebra")
            .await
            .unwrap();
        LocationRef {
            semester_id: sem.id,
            subject_id: sub.id,
            topic_id: top.id,
        }
    }

    #[tokio::test]
    async fn create_validates_required_fields() {
        let f = fixture().await;
        let err = f
            .catalog
            .create(Uuid::new_v4(), file("alice", "  ", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let err = f
            .catalog
            .create(Uuid::new_v4(), link("alice", "Docs", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let err = f
            .catalog
            .create(Uuid::new_v4(), file("", "a.txt", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn create_and_get_round_trip_placement() {
        let f = fixture().await;
        let location = placed(&f.tree, "alice").await;
        let id = Uuid::new_v4();
        let created = f
            .catalog
            .create(id, file("alice", "notes.pdf", Some(location)))
            .await
            .unwrap();
        assert_eq!(created.id, id);
        assert_eq!(created.location, Some(location));
        assert_eq!(f.catalog.get("alice", id).await.unwrap(), created);

        assert!(matches!(
            f.catalog.get("bob", id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn move_rejects_foreign_or_crossed_locations() {
        let f = fixture().await;
        let alice_loc = placed(&f.tree, "alice").await;
        let bob_loc = placed(&f.tree, "bob").await;
        let id = Uuid::new_v4();
        f.catalog
            .create(id, file("alice", "a.txt", None))
            .await
            .unwrap();

        let err = f
            .catalog
            .move_object("alice", id, Some(bob_loc))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidLocation(_)));

        let moved = f
            .catalog
            .move_object("alice", id, Some(alice_loc))
            .await
            .unwrap();
        assert_eq!(moved.location, Some(alice_loc));

        let cleared = f.catalog.move_object("alice", id, None).await.unwrap();
        assert_eq!(cleared.location, None);
    }

    #[tokio::test]
    async fn rename_is_idempotent_and_scoped() {
        let f = fixture().await;
        let id = Uuid::new_v4();
        f.catalog
            .create(id, file("alice", "a.txt", None))
            .await
            .unwrap();
        let renamed = f.catalog.rename("alice", id, "b.txt").await.unwrap();
        assert_eq!(renamed.display_name, "b.txt");
        let again = f.catalog.rename("alice", id, "b.txt").await.unwrap();
        assert_eq!(again, renamed);
        assert!(matches!(
            f.catalog.rename("alice", Uuid::new_v4(), "c.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn find_filters_by_kind_name_and_location() {
        let f = fixture().await;
        let location = placed(&f.tree, "alice").await;
        f.catalog
            .create(Uuid::new_v4(), file("alice", "Lecture Notes.pdf", Some(location)))
            .await
            .unwrap();
        f.catalog
            .create(Uuid::new_v4(), file("alice", "budget.xlsx", None))
            .await
            .unwrap();
        f.catalog
            .create(Uuid::new_v4(), link("alice", "Course NOTES wiki", "https://x"))
            .await
            .unwrap();
        f.catalog
            .create(Uuid::new_v4(), file("bob", "notes.txt", None))
            .await
            .unwrap();

        let all = f
            .catalog
            .find("alice", &ObjectFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let notes = f
            .catalog
            .find(
                "alice",
                &ObjectFilter {
                    q: Some("notes".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(notes.len(), 2);

        let links = f
            .catalog
            .find(
                "alice",
                &ObjectFilter {
                    has_url: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert!(!links[0].is_file());

        let in_topic = f
            .catalog
            .find(
                "alice",
                &ObjectFilter {
                    semester_id: Some(location.semester_id),
                    topic_id: Some(location.topic_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(in_topic.len(), 1);
        assert_eq!(in_topic[0].display_name, "Lecture Notes.pdf");
    }

    #[tokio::test]
    async fn name_search_folds_non_ascii_case() {
        let f = fixture().await;
        f.catalog
            .create(Uuid::new_v4(), link("alice", "ÜBUNG Analysis", "https://x"))
            .await
            .unwrap();
        f.catalog
            .create(Uuid::new_v4(), file("alice", "Straße.pdf", None))
            .await
            .unwrap();

        for q in ["übung", "ÜBUNG", "Übung analysis"] {
            let hits = f
                .catalog
                .find(
                    "alice",
                    &ObjectFilter {
                        q: Some(q.into()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 1, "query {}", q);
            assert_eq!(hits[0].display_name, "ÜBUNG Analysis");
        }

        let hits = f
            .catalog
            .find(
                "alice",
                &ObjectFilter {
                    q: Some("STRASSE".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn deleted_node_leaves_placement_dangling() {
        let f = fixture().await;
        let location = placed(&f.tree, "alice").await;
        let id = Uuid::new_v4();
        f.catalog
            .create(id, file("alice", "proof.pdf", Some(location)))
            .await
            .unwrap();

        f.tree
            .delete(
                "alice",
                NodeRef::Topic {
                    semester_id: location.semester_id,
                    subject_id: location.subject_id,
                    topic_id: location.topic_id,
                },
            )
            .await
            .unwrap();

        let stale = f.catalog.get("alice", id).await.unwrap();
        assert_eq!(stale.location, Some(location));

        let by_topic = f
            .catalog
            .find(
                "alice",
                &ObjectFilter {
                    topic_id: Some(location.topic_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_topic.len(), 1);
        assert_eq!(by_topic[0].id, id);

        assert!(matches!(
            f.catalog.move_object("alice", id, Some(location)).await,
            Err(StorageError::InvalidLocation(_))
        ));
        let unplaced = f.catalog.move_object("alice", id, None).await.unwrap();
        assert!(unplaced.location.is_none());
    }

    #[tokio::test]
    async fn tag_snapshots_add_once_and_remove_by_name() {
        let f = fixture().await;
        let id = Uuid::new_v4();
        f.catalog
            .create(id, file("alice", "a.txt", None))
            .await
            .unwrap();
        let math = TagSnapshot {
            id: Uuid::new_v4(),
            name: "Math".into(),
        };
        let exam = TagSnapshot {
            id: Uuid::new_v4(),
            name: "Exam".into(),
        };

        assert!(f.catalog.add_tag("alice", id, &math).await.unwrap());
        assert!(!f.catalog.add_tag("alice", id, &math).await.unwrap());
        assert!(f.catalog.add_tag("alice", id, &exam).await.unwrap());
        assert_eq!(
            f.catalog.get("alice", id).await.unwrap().tags,
            vec![math.clone(), exam.clone()]
        );

        let after = f
            .catalog
            .remove_tags_named("alice", id, "Math")
            .await
            .unwrap();
        assert_eq!(after.tags, vec![exam]);

        assert!(matches!(
            f.catalog.add_tag("alice", Uuid::new_v4(), &math).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn referenced_ids_skip_corrupt_rows() {
        let f = fixture().await;
        let good = Uuid::new_v4();
        let bad = Uuid::new_v4();
        for id in [good, bad] {
            f.catalog
                .create(id, file("alice", "a.txt", None))
                .await
                .unwrap();
        }
        let tag = TagSnapshot {
            id: Uuid::new_v4(),
            name: "Math".into(),
        };
        f.catalog.add_tag("alice", good, &tag).await.unwrap();
        sqlx::query("UPDATE objects SET tags = 'not json' WHERE id = ?")
            .bind(bad.to_string())
            .execute(&*f.db)
            .await
            .unwrap();

        let live = f
            .catalog
            .referenced_tag_ids("alice", KIND_FILE)
            .await
            .unwrap();
        assert_eq!(live, HashSet::from([tag.id]));
    }
}
