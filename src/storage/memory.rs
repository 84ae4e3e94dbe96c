//! In-memory store for computing over snapshots without a database.

use super::store::{DraftStore, EntityStore};
use crate::Result;
use crate::models::{CategoryMembers, DraftChange, Entity, EntityRef, EntityType};
use crate::models::ontology::CategoryView;
use std::collections::BTreeMap;

/// Canonical entities and draft changes held in ordered maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entities: BTreeMap<EntityRef, Entity>,
    changes: BTreeMap<(String, EntityRef), DraftChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or supersede a canonical entity.
    pub fn put_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.entity_ref(), entity);
    }

    pub fn remove_entity(&mut self, entity_type: EntityType, entity_key: &str) -> Option<Entity> {
        self.entities
            .remove(&EntityRef::new(entity_type, entity_key))
    }

    /// Insert or amend the single change for this draft/entity pair.
    pub fn put_change(&mut self, change: DraftChange) {
        let key = (change.draft_id.clone(), change.entity_ref());
        self.changes.insert(key, change);
    }

    pub fn remove_change(
        &mut self,
        draft_id: &str,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Option<DraftChange> {
        self.changes
            .remove(&(draft_id.to_string(), EntityRef::new(entity_type, entity_key)))
    }

    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut store = Self::new();
        for entity in entities {
            store.put_entity(entity);
        }
        store
    }
}

impl EntityStore for MemoryStore {
    fn get_entity(&self, entity_type: EntityType, entity_key: &str) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .get(&EntityRef::new(entity_type, entity_key))
            .cloned())
    }

    fn list_entities_by_type(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect())
    }

    fn list_resources_by_category(&self, category_key: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .values()
            .filter(|e| {
                e.entity_type == EntityType::Resource
                    && e.category_key.as_deref() == Some(category_key)
            })
            .cloned()
            .collect())
    }

    fn get_category_members(&self, category_key: &str) -> Result<CategoryMembers> {
        let members = self
            .entities
            .get(&EntityRef::new(EntityType::Category, category_key))
            .map(|e| {
                let view = CategoryView::from_json(&e.canonical_json);
                CategoryMembers {
                    properties: view.properties,
                    subobjects: view.subobjects,
                }
            })
            .unwrap_or_default();
        Ok(members)
    }
}

impl DraftStore for MemoryStore {
    fn get_draft_change(
        &self,
        draft_id: &str,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Result<Option<DraftChange>> {
        Ok(self
            .changes
            .get(&(draft_id.to_string(), EntityRef::new(entity_type, entity_key)))
            .cloned())
    }

    fn list_draft_changes(&self, draft_id: &str) -> Result<Vec<DraftChange>> {
        Ok(self
            .changes
            .iter()
            .filter(|((id, _), _)| id == draft_id)
            .map(|(_, change)| change.clone())
            .collect())
    }
}
