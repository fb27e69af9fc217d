//! Datapack metadata model and the sidecar JSON format.

use crate::{StoreError, StoreResult};
use geochart_layout::Namespace;
use geochart_types::DatapackTitle;
use std::fmt;

/// Ownership category of a datapack, stored in the sidecar as `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatapackType {
    User,
    Official,
    Workshop,
    Temp,
}

impl DatapackType {
    /// Returns the type implied by an owning namespace.
    pub fn for_namespace(namespace: &Namespace) -> Self {
        match namespace {
            Namespace::User(_) => Self::User,
            Namespace::Official => Self::Official,
            Namespace::Workshop(_) => Self::Workshop,
            Namespace::Temp => Self::Temp,
        }
    }
}

impl fmt::Display for DatapackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Official => "official",
            Self::Workshop => "workshop",
            Self::Temp => "temp",
        };
        write!(f, "{s}")
    }
}

/// The identity of a datapack: its owning namespace plus its title.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatapackKey {
    pub namespace: Namespace,
    pub title: DatapackTitle,
}

impl DatapackKey {
    pub fn new(namespace: Namespace, title: DatapackTitle) -> Self {
        Self { namespace, title }
    }
}

impl fmt::Display for DatapackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.title)
    }
}

/// A datapack's metadata record, serialised verbatim as the sidecar JSON.
///
/// The `uuid` field names the owning namespace. It is redundant with the
/// sidecar's location on disk and is asserted consistent whenever a
/// directory is set up or scanned.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatapackMetadata {
    pub title: DatapackTitle,
    pub original_file_name: String,
    pub stored_file_name: String,
    pub description: String,
    pub authored_by: String,
    pub tags: Vec<String>,
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Human-readable payload size, e.g. `30MB`
    pub size: String,
    pub is_public: bool,
    /// Tie-break rank when multiple datapacks cover the same column
    pub priority: i32,
    #[serde(rename = "type")]
    pub kind: DatapackType,
    /// Owning namespace in wire form
    pub uuid: Namespace,
    /// Whether a `files/` directory of PDF attachments exists
    pub has_files: bool,
    /// Cover image filename within the datapack directory, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datapack_image: Option<String>,
}

impl DatapackMetadata {
    /// Returns this datapack's identity key.
    pub fn key(&self) -> DatapackKey {
        DatapackKey::new(self.uuid.clone(), self.title.clone())
    }

    /// Asserts that the record's ownership fields agree with the namespace
    /// whose directory it is stored (or about to be stored) under.
    pub fn assert_owned_by(&self, namespace: &Namespace) -> StoreResult<()> {
        if &self.uuid != namespace {
            return Err(StoreError::Integrity(format!(
                "metadata uuid '{}' does not match namespace '{}'",
                self.uuid, namespace
            )));
        }
        let expected = DatapackType::for_namespace(namespace);
        if self.kind != expected {
            return Err(StoreError::Integrity(format!(
                "metadata type '{}' does not match namespace '{}'",
                self.kind, namespace
            )));
        }
        Ok(())
    }
}

/// A partial metadata edit. `None` fields are left unchanged.
///
/// A title change renames the datapack directory; everything else is a
/// sidecar rewrite in place.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatapackMetadataPatch {
    pub title: Option<DatapackTitle>,
    pub description: Option<String>,
    pub authored_by: Option<String>,
    pub tags: Option<Vec<String>>,
    pub references: Option<Vec<String>>,
    pub contact: Option<String>,
    pub notes: Option<String>,
    pub date: Option<String>,
    pub is_public: Option<bool>,
    pub priority: Option<i32>,
}

impl DatapackMetadataPatch {
    /// Applies every non-title field to `metadata`.
    pub fn apply_fields(&self, metadata: &mut DatapackMetadata) {
        if let Some(description) = &self.description {
            metadata.description = description.clone();
        }
        if let Some(authored_by) = &self.authored_by {
            metadata.authored_by = authored_by.clone();
        }
        if let Some(tags) = &self.tags {
            metadata.tags = tags.clone();
        }
        if let Some(references) = &self.references {
            metadata.references = references.clone();
        }
        if let Some(contact) = &self.contact {
            metadata.contact = Some(contact.clone());
        }
        if let Some(notes) = &self.notes {
            metadata.notes = Some(notes.clone());
        }
        if let Some(date) = &self.date {
            metadata.date = Some(date.clone());
        }
        if let Some(is_public) = self.is_public {
            metadata.is_public = is_public;
        }
        if let Some(priority) = self.priority {
            metadata.priority = priority;
        }
    }
}
