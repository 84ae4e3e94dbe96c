//! Storage contracts consumed by the overlay and derivation engines.
//!
//! The engines never talk to SQLite directly. They read canonical entities
//! through [`EntityStore`] and pending edits through [`DraftStore`], so the
//! same code runs against the on-disk [`Storage`](super::Storage) and the
//! in-memory [`MemoryStore`](super::MemoryStore).

use crate::Result;
use crate::models::{CategoryMembers, DraftChange, Entity, EntityType};

/// Read access to canonical entities.
pub trait EntityStore {
    /// Get one entity, or `None` if no canonical record exists.
    fn get_entity(&self, entity_type: EntityType, entity_key: &str) -> Result<Option<Entity>>;

    /// All canonical entities of a type, ordered by key.
    fn list_entities_by_type(&self, entity_type: EntityType) -> Result<Vec<Entity>>;

    /// Canonical resources whose `category_key` equals `category_key`.
    fn list_resources_by_category(&self, category_key: &str) -> Result<Vec<Entity>>;

    /// Canonical member properties and subobjects of a category.
    ///
    /// Unknown categories have no members.
    fn get_category_members(&self, category_key: &str) -> Result<CategoryMembers>;
}

/// Read access to draft change logs.
pub trait DraftStore {
    fn get_draft_change(
        &self,
        draft_id: &str,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Result<Option<DraftChange>>;

    /// All changes of a draft, ordered by entity type then key.
    fn list_draft_changes(&self, draft_id: &str) -> Result<Vec<DraftChange>>;
}
