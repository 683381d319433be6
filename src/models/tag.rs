//! Tags: the per-user registry entry and the snapshot copied into objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical registry entry. `name` keeps the casing it was first created with.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// `{id, name}` copy embedded in an object's metadata.
///
/// Holders are rewritten when the canonical tag is renamed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TagSnapshot {
    pub id: Uuid,
    pub name: String,
}

impl From<&Tag> for TagSnapshot {
    fn from(tag: &Tag) -> Self {
        Self {
            id: tag.id,
            name: tag.name.clone(),
        }
    }
}

/// The persisted per-user registry document (`{tags:[{id,name}]}`).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TagVocabulary {
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl TagVocabulary {
    /// Case-insensitive lookup by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Tag> {
        let wanted = name.to_lowercase();
        self.tags.iter().find(|t| t.name.to_lowercase() == wanted)
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<&Tag> {
        self.tags.iter().find(|t| t.id == id)
    }
}

/// Trim a raw tag name, returning `None` when nothing is left.
pub fn normalize_name(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
