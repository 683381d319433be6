//! Represents a stored object (file or link) in a user's library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::models::tag::TagSnapshot;

/// Placement of an object inside the owner's semester → subject → topic tree.
///
/// All three ids are present or the object is unplaced; a partial triple
/// cannot be represented.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocationRef {
    pub semester_id: Uuid,
    pub subject_id: Uuid,
    pub topic_id: Uuid,
}

/// Kind-specific part of a catalog record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectKind {
    File {
        /// Sum of chunk payload lengths.
        size_bytes: i64,
        /// MIME type recorded at upload, if any.
        content_type: Option<String>,
        /// Hex MD5 of the content.
        etag: Option<String>,
    },
    Link {
        url: String,
    },
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::File { .. } => KIND_FILE,
            ObjectKind::Link { .. } => KIND_LINK,
        }
    }
}

pub const KIND_FILE: &str = "file";
pub const KIND_LINK: &str = "link";

/// A single file or link in the catalog.
///
/// The `StoredObject` carries metadata only; file bytes live in the chunk
/// store under the same `id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Immutable identifier, shared with the object's chunks.
    pub id: Uuid,

    /// Owning user. Never changes.
    pub owner_id: String,

    /// File name or link title.
    pub display_name: String,

    pub created_at: DateTime<Utc>,

    /// Optional placement in the owner's location tree.
    pub location: Option<LocationRef>,

    /// Tag snapshots, unique by tag id, in attach order.
    pub tags: Vec<TagSnapshot>,

    #[serde(flatten)]
    pub kind: ObjectKind,
}

impl StoredObject {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, ObjectKind::File { .. })
    }

    /// Byte size for files, `None` for links.
    pub fn size_bytes(&self) -> Option<i64> {
        match &self.kind {
            ObjectKind::File { size_bytes, .. } => Some(*size_bytes),
            ObjectKind::Link { .. } => None,
        }
    }
}

/// Raw `objects` row as stored in SQLite.
#[derive(FromRow, Debug)]
pub struct ObjectRow {
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: Option<i64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub url: Option<String>,
    pub semester_id: Option<String>,
    pub subject_id: Option<String>,
    pub topic_id: Option<String>,
    pub tags: String,
}

fn parse_id(raw: &str, field: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw)
        .map_err(|err| StorageError::read(format!("corrupt {} `{}`: {}", field, raw, err)))
}

impl TryFrom<ObjectRow> for StoredObject {
    type Error = StorageError;

    fn try_from(row: ObjectRow) -> Result<Self, Self::Error> {
        let location = match (&row.semester_id, &row.subject_id, &row.topic_id) {
            (Some(semester), Some(subject), Some(topic)) => Some(LocationRef {
                semester_id: parse_id(semester, "semester_id")?,
                subject_id: parse_id(subject, "subject_id")?,
                topic_id: parse_id(topic, "topic_id")?,
            }),
            (None, None, None) => None,
            _ => {
                return Err(StorageError::read(format!(
                    "object `{}` has a partial location",
                    row.id
                )));
            }
        };

        let kind = match row.kind.as_str() {
            KIND_FILE => ObjectKind::File {
                size_bytes: row.size_bytes.unwrap_or(0),
                content_type: row.content_type,
                etag: row.etag,
            },
            KIND_LINK => ObjectKind::Link {
                url: row.url.unwrap_or_default(),
            },
            other => {
                return Err(StorageError::read(format!(
                    "object `{}` has unknown kind `{}`",
                    row.id, other
                )));
            }
        };

        let tags: Vec<TagSnapshot> =
            serde_json::from_str(&row.tags).map_err(StorageError::read)?;

        Ok(StoredObject {
            id: parse_id(&row.id, "id")?,
            owner_id: row.owner_id,
            display_name: row.display_name,
            created_at: row.created_at,
            location,
            tags,
            kind,
        })
    }
}
