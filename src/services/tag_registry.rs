//! TagRegistry: per-user tag vocabulary and its lifecycle.
//!
//! Names are unique per user under case-insensitive comparison; the first
//! spelling wins. Objects carry `{id, name}` snapshots rather than references,
//! so a rename fans out to every holder, and cleanup is a mark-and-sweep pass
//! over all files and links instead of a reference count.
//!
//! Neither the fan-out nor the sweep is atomic with the mutation that
//! triggered it. A crash mid-rename leaves some snapshots with the old name
//! until the rename is retried; a crash before a sweep leaves an unused tag
//! until the next sweep.

use sqlx::SqlitePool;
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::models::{
    object::{KIND_FILE, KIND_LINK, StoredObject},
    tag::{Tag, TagSnapshot, TagVocabulary, normalize_name},
};
use crate::services::{
    object_catalog::ObjectCatalog,
    user_documents::{Change, UserDocuments},
};

#[derive(Clone)]
pub struct TagRegistry {
    docs: UserDocuments<TagVocabulary>,
    catalog: ObjectCatalog,
}

fn require_tag_name(raw: &str) -> StorageResult<&str> {
    normalize_name(raw)
        .ok_or_else(|| StorageError::Validation("tag name must not be empty".into()))
}

impl TagRegistry {
    pub fn new(db: Arc<SqlitePool>, catalog: ObjectCatalog) -> Self {
        Self {
            docs: UserDocuments::new(db),
            catalog,
        }
    }

    pub async fn list(&self, owner_id: &str) -> StorageResult<Vec<Tag>> {
        Ok(self.docs.load(owner_id).await?.tags)
    }

    /// Existing tag matching `raw_name` case-insensitively, or a new one.
    pub async fn get_or_create(&self, owner_id: &str, raw_name: &str) -> StorageResult<Tag> {
        let name = require_tag_name(raw_name)?;
        self.docs
            .update(owner_id, |vocab| {
                if let Some(existing) = vocab.find_by_name(name) {
                    return Ok(Change::Skip(existing.clone()));
                }
                let tag = Tag {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                };
                vocab.tags.push(tag.clone());
                Ok(Change::Write(tag))
            })
            .await
    }

    /// Add `tag` to the object's snapshots; re-attaching the same id is a no-op.
    ///
    /// A sweep between `get_or_create` and the snapshot write can drop the
    /// still-unreferenced tag, so it is registered again by id afterwards.
    pub async fn attach(&self, owner_id: &str, object_id: Uuid, tag: &Tag) -> StorageResult<bool> {
        let added = self
            .catalog
            .add_tag(owner_id, object_id, &TagSnapshot::from(tag))
            .await?;
        if added {
            info!("tagged {} with `{}`", object_id, tag.name);
        }
        self.ensure_registered(owner_id, std::slice::from_ref(tag))
            .await?;
        Ok(added)
    }

    /// Put back any of `tags` whose id is missing from the registry.
    ///
    /// A tag whose name now belongs to a different id is left out.
    async fn ensure_registered(&self, owner_id: &str, tags: &[Tag]) -> StorageResult<()> {
        let restored = self
            .docs
            .update(owner_id, |vocab| {
                let mut restored = Vec::new();
                for tag in tags {
                    if vocab.find_by_id(tag.id).is_some() {
                        continue;
                    }
                    if let Some(other) = vocab.find_by_name(&tag.name) {
                        warn!(
                            "tag {} `{}` cannot be restored, name is held by {}",
                            tag.id, tag.name, other.id
                        );
                        continue;
                    }
                    vocab.tags.push(tag.clone());
                    restored.push(tag.id);
                }
                Ok(if restored.is_empty() {
                    Change::Skip(restored)
                } else {
                    Change::Write(restored)
                })
            })
            .await?;
        if !restored.is_empty() {
            info!("restored {} swept tags for {}", restored.len(), owner_id);
        }
        Ok(())
    }

    /// Remove every snapshot named exactly `tag_name` from the object.
    ///
    /// The registry is left alone; run `garbage_collect` afterwards.
    pub async fn detach(
        &self,
        owner_id: &str,
        object_id: Uuid,
        tag_name: &str,
    ) -> StorageResult<StoredObject> {
        self.catalog
            .remove_tags_named(owner_id, object_id, tag_name)
            .await
    }

    /// Rename a tag and rewrite its snapshot on every file and link.
    ///
    /// Returns the number of objects rewritten.
    pub async fn rename(&self, owner_id: &str, tag_id: Uuid, new_name: &str) -> StorageResult<u64> {
        let name = require_tag_name(new_name)?;
        self.docs
            .update(owner_id, |vocab| {
                if let Some(other) = vocab.find_by_name(name).filter(|t| t.id != tag_id) {
                    return Err(StorageError::Validation(format!(
                        "tag name `{}` is already used by `{}`",
                        name, other.name
                    )));
                }
                let tag = vocab
                    .tags
                    .iter_mut()
                    .find(|t| t.id == tag_id)
                    .ok_or_else(|| StorageError::not_found(format!("tag `{}`", tag_id)))?;
                if tag.name == name {
                    return Ok(Change::Skip(()));
                }
                tag.name = name.to_string();
                Ok(Change::Write(()))
            })
            .await?;

        let mut affected = 0;
        for kind in [KIND_FILE, KIND_LINK] {
            affected += self
                .catalog
                .rename_tag_snapshots(owner_id, kind, tag_id, name)
                .await?;
        }
        info!(
            "renamed tag {} to `{}` on {} objects for {}",
            tag_id, name, affected, owner_id
        );
        Ok(affected)
    }

    /// Remove every registered tag no file or link of `owner_id` references.
    ///
    /// Returns the number of tags removed. Objects whose tags cannot be read
    /// are skipped rather than failing the sweep.
    pub async fn garbage_collect(&self, owner_id: &str) -> StorageResult<usize> {
        let live = self.live_tag_ids(owner_id).await?;

        let removed = self
            .docs
            .update(owner_id, |vocab| {
                let (kept, removed): (Vec<Tag>, Vec<Tag>) = vocab
                    .tags
                    .drain(..)
                    .partition(|t| live.contains(&t.id));
                vocab.tags = kept;
                Ok(if removed.is_empty() {
                    Change::Skip(removed)
                } else {
                    Change::Write(removed)
                })
            })
            .await?;
        if removed.is_empty() {
            return Ok(0);
        }

        // An attach may have landed between the scan and the sweep.
        let live = self.live_tag_ids(owner_id).await?;
        let revived: Vec<Tag> = removed
            .iter()
            .filter(|t| live.contains(&t.id))
            .cloned()
            .collect();
        if !revived.is_empty() {
            self.ensure_registered(owner_id, &revived).await?;
        }

        let swept = removed.len() - revived.len();
        if swept > 0 {
            info!("swept {} unused tags for {}", swept, owner_id);
        }
        Ok(swept)
    }

    async fn live_tag_ids(&self, owner_id: &str) -> StorageResult<HashSet<Uuid>> {
        let mut live = self.catalog.referenced_tag_ids(owner_id, KIND_FILE).await?;
        live.extend(self.catalog.referenced_tag_ids(owner_id, KIND_LINK).await?);
        Ok(live)
    }

    /// `garbage_collect` for callers that must not fail on cleanup.
    pub async fn collect_quietly(&self, owner_id: &str) {
        if let Err(err) = self.garbage_collect(owner_id).await {
            warn!("tag sweep for {} failed, will retry next time: {}", owner_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::object::ObjectKind;
    use crate::services::{location_tree::LocationTree, object_catalog::NewObject};

    struct Fixture {
        tags: TagRegistry,
        catalog: ObjectCatalog,
    }

    async fn fixture() -> Fixture {
        let db = test_pool().await;
        let catalog = ObjectCatalog::new(db.clone(), LocationTree::new(db.clone()));
        Fixture {
            tags: TagRegistry::new(db, catalog.clone()),
            catalog,
        }
    }

    async fn object(catalog: &ObjectCatalog, owner: &str, link: bool) -> Uuid {
        let id = Uuid::new_v4();
        let kind = if link {
            ObjectKind::Link {
                url: "https://example.org".into(),
            }
        } else {
            ObjectKind::File {
                size_bytes: 0,
                content_type: None,
                etag: None,
            }
        };
        catalog
            .create(
                id,
                NewObject {
                    owner_id: owner.into(),
                    display_name: "thing".into(),
                    location: None,
                    kind,
                },
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn get_or_create_dedupes_case_insensitively() {
        let f = fixture().await;
        let first = f.tags.get_or_create("alice", "Math").await.unwrap();
        let second = f.tags.get_or_create("alice", "  math ").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Math");
        assert_eq!(f.tags.list("alice").await.unwrap().len(), 1);

        let other_owner = f.tags.get_or_create("bob", "math").await.unwrap();
        assert_ne!(other_owner.id, first.id);
        assert_eq!(other_owner.name, "math");
    }

    #[tokio::test]
    async fn get_or_create_rejects_blank() {
        let f = fixture().await;
        assert!(matches!(
            f.tags.get_or_create("alice", " \t").await,
            Err(StorageError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_tag_after_last_detach() {
        let f = fixture().await;
        let file = object(&f.catalog, "alice", false).await;
        let tag = f.tags.get_or_create("alice", "Math").await.unwrap();
        f.tags.attach("alice", file, &tag).await.unwrap();

        assert_eq!(f.tags.garbage_collect("alice").await.unwrap(), 0);
        f.tags.detach("alice", file, "Math").await.unwrap();
        assert_eq!(f.tags.garbage_collect("alice").await.unwrap(), 1);
        assert!(f.tags.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_keeps_tag_still_held_by_a_link() {
        let f = fixture().await;
        let file = object(&f.catalog, "alice", false).await;
        let link = object(&f.catalog, "alice", true).await;
        let tag = f.tags.get_or_create("alice", "Math").await.unwrap();
        f.tags.attach("alice", file, &tag).await.unwrap();
        f.tags.attach("alice", link, &tag).await.unwrap();

        f.tags.detach("alice", file, "Math").await.unwrap();
        assert_eq!(f.tags.garbage_collect("alice").await.unwrap(), 0);
        assert_eq!(f.tags.list("alice").await.unwrap(), vec![tag]);
    }

    #[tokio::test]
    async fn attach_after_an_early_sweep_re_registers_the_tag() {
        let f = fixture().await;
        let link = object(&f.catalog, "alice", true).await;
        let tag = f.tags.get_or_create("alice", "Exam").await.unwrap();
        assert_eq!(f.tags.garbage_collect("alice").await.unwrap(), 1);

        f.tags.attach("alice", link, &tag).await.unwrap();
        assert_eq!(f.tags.list("alice").await.unwrap(), vec![tag.clone()]);

        assert_eq!(f.tags.rename("alice", tag.id, "Final").await.unwrap(), 1);
        let again = f.tags.get_or_create("alice", "final").await.unwrap();
        assert_eq!(again.id, tag.id);
        f.tags.attach("alice", link, &again).await.unwrap();
        let held = f.catalog.get("alice", link).await.unwrap().tags;
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].name, "Final");
    }

    #[tokio::test]
    async fn re_registration_yields_to_a_newer_tag_of_the_same_name() {
        let f = fixture().await;
        let stale = Tag {
            id: Uuid::new_v4(),
            name: "Exam".into(),
        };
        let current = f.tags.get_or_create("alice", "exam").await.unwrap();
        f.tags
            .ensure_registered("alice", std::slice::from_ref(&stale))
            .await
            .unwrap();
        assert_eq!(f.tags.list("alice").await.unwrap(), vec![current]);
    }

    #[tokio::test]
    async fn detach_matches_name_exactly() {
        let f = fixture().await;
        let file = object(&f.catalog, "alice", false).await;
        let tag = f.tags.get_or_create("alice", "Math").await.unwrap();
        f.tags.attach("alice", file, &tag).await.unwrap();

        let after = f.tags.detach("alice", file, "math").await.unwrap();
        assert_eq!(after.tags.len(), 1);
    }

    #[tokio::test]
    async fn rename_fans_out_to_every_holder() {
        let f = fixture().await;
        let holders = [
            object(&f.catalog, "alice", false).await,
            object(&f.catalog, "alice", false).await,
            object(&f.catalog, "alice", true).await,
        ];
        let bystander = object(&f.catalog, "alice", false).await;
        let tag = f.tags.get_or_create("alice", "Math").await.unwrap();
        let other = f.tags.get_or_create("alice", "Exam").await.unwrap();
        for id in holders {
            f.tags.attach("alice", id, &tag).await.unwrap();
            f.tags.attach("alice", id, &other).await.unwrap();
        }
        f.tags.attach("alice", bystander, &other).await.unwrap();

        let affected = f.tags.rename("alice", tag.id, "Mathematics").await.unwrap();
        assert_eq!(affected, 3);

        for id in holders {
            let object = f.catalog.get("alice", id).await.unwrap();
            assert_eq!(
                object.tags,
                vec![
                    TagSnapshot {
                        id: tag.id,
                        name: "Mathematics".into()
                    },
                    TagSnapshot::from(&other),
                ]
            );
        }
        let registry = f.tags.list("alice").await.unwrap();
        assert_eq!(registry[0].id, tag.id);
        assert_eq!(registry[0].name, "Mathematics");
    }

    #[tokio::test]
    async fn rename_rejects_unknown_and_colliding_names() {
        let f = fixture().await;
        let math = f.tags.get_or_create("alice", "Math").await.unwrap();
        f.tags.get_or_create("alice", "Exam").await.unwrap();

        assert!(matches!(
            f.tags.rename("alice", Uuid::new_v4(), "Whatever").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            f.tags.rename("alice", math.id, "EXAM").await,
            Err(StorageError::Validation(_))
        ));
        // Changing only the casing of its own name is allowed.
        f.tags.rename("alice", math.id, "MATH").await.unwrap();
        assert_eq!(f.tags.list("alice").await.unwrap()[0].name, "MATH");
    }
}
