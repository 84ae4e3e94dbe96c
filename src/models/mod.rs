//! Data models for ontohub entities.
//!
//! This module defines the core data structures:
//! - `EntityType` - The closed set of ontology entity kinds
//! - `Entity` - A canonical, versionless record with structural columns
//! - `Draft` / `DraftChange` - Pending edits scoped to a named draft
//! - `EffectiveEntity` - Canonical state with a draft change applied
//! - `Changeset` - What a submitted draft produces

pub mod graph;
pub mod ontology;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of ontology entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Category,
    Property,
    Subobject,
    Template,
    Module,
    Bundle,
    Dashboard,
    Resource,
}

impl EntityType {
    /// Get all entity types.
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Category,
            EntityType::Property,
            EntityType::Subobject,
            EntityType::Template,
            EntityType::Module,
            EntityType::Bundle,
            EntityType::Dashboard,
            EntityType::Resource,
        ]
    }

    /// Singular name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Category => "category",
            EntityType::Property => "property",
            EntityType::Subobject => "subobject",
            EntityType::Template => "template",
            EntityType::Module => "module",
            EntityType::Bundle => "bundle",
            EntityType::Dashboard => "dashboard",
            EntityType::Resource => "resource",
        }
    }

    /// Directory holding this type in the ontology repository.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityType::Category => "categories",
            EntityType::Property => "properties",
            EntityType::Subobject => "subobjects",
            EntityType::Template => "templates",
            EntityType::Module => "modules",
            EntityType::Bundle => "bundles",
            EntityType::Dashboard => "dashboards",
            EntityType::Resource => "resources",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        EntityType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == lower || t.dir_name() == lower)
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

/// Typed address of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_key: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_key: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_key: entity_key.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_key)
    }
}

/// A canonical ontology record.
///
/// Only one version of each entity exists at a time. Structural fields are
/// denormalized from `canonical_json` on construction so storage can index them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,

    /// Stable identifier, unique per type
    pub entity_key: String,

    /// The full canonical document
    pub canonical_json: Value,

    /// Parent categories (categories only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_keys: Vec<String>,

    /// Owning category (resources only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_key: Option<String>,

    /// When this version was synced from the ontology repository
    pub synced_at: DateTime<Utc>,
}

impl Entity {
    /// Create an entity, deriving its structural columns from the document.
    pub fn new(entity_type: EntityType, entity_key: impl Into<String>, canonical_json: Value) -> Self {
        Self::with_synced_at(entity_type, entity_key, canonical_json, Utc::now())
    }

    pub fn with_synced_at(
        entity_type: EntityType,
        entity_key: impl Into<String>,
        canonical_json: Value,
        synced_at: DateTime<Utc>,
    ) -> Self {
        let parent_keys = match entity_type {
            EntityType::Category => ontology::CategoryView::from_json(&canonical_json).parents,
            _ => Vec::new(),
        };
        let category_key = match entity_type {
            EntityType::Resource => ontology::ResourceView::from_json(&canonical_json).category,
            _ => None,
        };
        Self {
            entity_type,
            entity_key: entity_key.into(),
            canonical_json,
            parent_keys,
            category_key,
            synced_at,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_key.clone())
    }
}

/// Member properties and subobjects declared by a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMembers {
    pub properties: Vec<String>,
    pub subobjects: Vec<String>,
}

/// Kind of pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE" => Ok(ChangeType::Create),
            "UPDATE" => Ok(ChangeType::Update),
            "DELETE" => Ok(ChangeType::Delete),
            _ => Err(format!("Unknown change type: {}", s)),
        }
    }
}

/// One pending edit within a draft.
///
/// At most one change exists per `(draft_id, entity_type, entity_key)`;
/// later edits amend the record in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftChange {
    pub draft_id: String,
    pub entity_type: EntityType,
    pub entity_key: String,
    pub change_type: ChangeType,

    /// RFC 6902 operations (UPDATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,

    /// Full document (CREATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_json: Option<Value>,

    pub updated_at: DateTime<Utc>,
}

impl DraftChange {
    pub fn create(draft_id: &str, entity_type: EntityType, entity_key: &str, doc: Value) -> Self {
        Self {
            draft_id: draft_id.to_string(),
            entity_type,
            entity_key: entity_key.to_string(),
            change_type: ChangeType::Create,
            patch: None,
            replacement_json: Some(doc),
            updated_at: Utc::now(),
        }
    }

    pub fn update(draft_id: &str, entity_type: EntityType, entity_key: &str, patch: Value) -> Self {
        Self {
            draft_id: draft_id.to_string(),
            entity_type,
            entity_key: entity_key.to_string(),
            change_type: ChangeType::Update,
            patch: Some(patch),
            replacement_json: None,
            updated_at: Utc::now(),
        }
    }

    pub fn delete(draft_id: &str, entity_type: EntityType, entity_key: &str) -> Self {
        Self {
            draft_id: draft_id.to_string(),
            entity_type,
            entity_key: entity_key.to_string(),
            change_type: ChangeType::Delete,
            patch: None,
            replacement_json: None,
            updated_at: Utc::now(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_key.clone())
    }
}

/// Draft lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    #[default]
    Open,
    Submitted,
    Discarded,
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DraftStatus::Open => "open",
            DraftStatus::Submitted => "submitted",
            DraftStatus::Discarded => "discarded",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DraftStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(DraftStatus::Open),
            "submitted" => Ok(DraftStatus::Submitted),
            "discarded" => Ok(DraftStatus::Discarded),
            _ => Err(format!("Unknown draft status: {}", s)),
        }
    }
}

/// A named collection of pending changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    /// Short identifier (e.g., "dr-a1b2")
    pub id: String,

    /// Opaque token that also addresses the draft
    pub token: String,

    pub title: String,

    #[serde(default)]
    pub status: DraftStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            token: uuid::Uuid::new_v4().to_string(),
            title,
            status: DraftStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == DraftStatus::Open
    }
}

/// How an entity's effective state relates to canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Unchanged => "unchanged",
        };
        write!(f, "{}", s)
    }
}

/// Caller-detectable inconsistencies between a change and canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayAnomaly {
    /// CREATE for a key that also exists canonically
    CreateOverCanonical,
    /// DELETE for a key with no canonical entity
    DeleteWithoutCanonical,
}

/// An entity as seen through a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveEntity {
    pub entity_type: EntityType,
    pub entity_key: String,
    pub effective_json: Value,
    pub change_status: ChangeStatus,

    /// Set when the draft patch could not be applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<OverlayAnomaly>,
}

impl EffectiveEntity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_key.clone())
    }

    /// Whether the entity has a document to show.
    pub fn exists(&self) -> bool {
        !self.effective_json.is_null()
    }

    pub fn label(&self) -> Option<&str> {
        self.effective_json.get("label").and_then(Value::as_str)
    }
}

/// One file-level change produced by submitting a draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesetEntry {
    /// Path in the ontology repository (e.g., "categories/Dog.json")
    pub path: String,
    pub entity_type: EntityType,
    pub entity_key: String,
    pub action: ChangeType,

    /// New file content; absent for deletions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Everything a submitted draft changes, ready to become a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    pub draft_id: String,
    pub title: String,
    pub entries: Vec<ChangesetEntry>,
}
