//! Draft overlay engine.
//!
//! Computes the *effective* view of an entity: its canonical document with the
//! draft's pending change applied. This is the single place where "effective"
//! semantics are defined; everything that reads ontology state through a draft
//! (derivation, graph queries, listings) goes through [`EffectiveState`].
//!
//! ## Overlay rule
//!
//! | change   | effective json             | status                      |
//! |----------|----------------------------|-----------------------------|
//! | none     | canonical                  | `unchanged`                 |
//! | CREATE   | `replacement_json`         | `added`                     |
//! | DELETE   | canonical (shown struck)   | `deleted`                   |
//! | UPDATE   | canonical + patch          | `modified` / `unchanged`    |
//!
//! An UPDATE whose patch cannot be applied does not fail: the result carries
//! `patch_error`, keeps the canonical document and reports `unchanged`.

use crate::models::ontology::{CategoryView, ResourceView};
use crate::models::{
    CategoryMembers, ChangeStatus, ChangeType, DraftChange, EffectiveEntity, Entity, EntityRef,
    EntityType, OverlayAnomaly,
};
use crate::storage::{DraftStore, EntityStore};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Derived arrays on modules and bundles. They may be absent from the
/// canonical document, so patches touching them must use `add`.
pub const DERIVED_ARRAY_PATHS: &[&str] = &["/properties", "/subobjects", "/templates", "/resources"];

/// Apply one draft change (if any) to one canonical entity (if any).
///
/// Fails with `NotFound` only when there is nothing to show: no canonical
/// entity and no change, or an UPDATE with no canonical document to patch.
pub fn apply_overlay(
    entity_type: EntityType,
    entity_key: &str,
    canonical: Option<&Entity>,
    change: Option<&DraftChange>,
) -> Result<EffectiveEntity> {
    let effective = |effective_json: Value, change_status: ChangeStatus| EffectiveEntity {
        entity_type,
        entity_key: entity_key.to_string(),
        effective_json,
        change_status,
        patch_error: None,
        anomaly: None,
    };

    let Some(change) = change else {
        return match canonical {
            Some(entity) => Ok(effective(entity.canonical_json.clone(), ChangeStatus::Unchanged)),
            None => Err(Error::NotFound(format!("{}:{}", entity_type, entity_key))),
        };
    };

    match change.change_type {
        ChangeType::Create => {
            let doc = change.replacement_json.clone().unwrap_or_else(|| json!({}));
            let mut result = effective(doc, ChangeStatus::Added);
            if canonical.is_some() {
                tracing::warn!(
                    entity = %EntityRef::new(entity_type, entity_key),
                    draft = %change.draft_id,
                    "CREATE change shadows an existing canonical entity"
                );
                result.anomaly = Some(OverlayAnomaly::CreateOverCanonical);
            }
            Ok(result)
        }
        ChangeType::Delete => match canonical {
            Some(entity) => Ok(effective(entity.canonical_json.clone(), ChangeStatus::Deleted)),
            None => {
                tracing::warn!(
                    entity = %EntityRef::new(entity_type, entity_key),
                    draft = %change.draft_id,
                    "DELETE change targets an entity with no canonical record"
                );
                let mut result = effective(Value::Null, ChangeStatus::Deleted);
                result.anomaly = Some(OverlayAnomaly::DeleteWithoutCanonical);
                Ok(result)
            }
        },
        ChangeType::Update => {
            let entity = canonical.ok_or_else(|| {
                Error::NotFound(format!(
                    "{}:{} (draft update has no canonical entity)",
                    entity_type, entity_key
                ))
            })?;
            let Some(patch) = change.patch.as_ref() else {
                return Ok(effective(entity.canonical_json.clone(), ChangeStatus::Unchanged));
            };
            match apply_patch(&entity.canonical_json, patch) {
                Ok(doc) => {
                    let status = if doc == entity.canonical_json {
                        ChangeStatus::Unchanged
                    } else {
                        ChangeStatus::Modified
                    };
                    Ok(effective(doc, status))
                }
                Err(message) => {
                    tracing::warn!(
                        entity = %entity.entity_ref(),
                        draft = %change.draft_id,
                        error = %message,
                        "draft patch could not be applied; showing canonical document"
                    );
                    let mut result =
                        effective(entity.canonical_json.clone(), ChangeStatus::Unchanged);
                    result.patch_error = Some(message);
                    Ok(result)
                }
            }
        }
    }
}

/// Apply the single-entity rule to every key.
///
/// Keys with nothing to show are left out of the result.
pub fn apply_overlay_batch(
    entity_type: EntityType,
    keys: &[String],
    canonical_by_key: &HashMap<String, Entity>,
    changes_by_key: &HashMap<String, DraftChange>,
) -> BTreeMap<String, EffectiveEntity> {
    let mut out = BTreeMap::new();
    for key in keys {
        match apply_overlay(
            entity_type,
            key,
            canonical_by_key.get(key),
            changes_by_key.get(key),
        ) {
            Ok(effective) => {
                out.insert(key.clone(), effective);
            }
            Err(e) => tracing::debug!(entity_type = %entity_type, key = %key, "skipping: {}", e),
        }
    }
    out
}

/// Apply an RFC 6902 patch to a copy of `doc`.
///
/// Returns a description of the failure instead of an error so callers can
/// surface it as data.
pub fn apply_patch(doc: &Value, patch: &Value) -> std::result::Result<Value, String> {
    let ops: json_patch::Patch =
        serde_json::from_value(patch.clone()).map_err(|e| format!("malformed patch: {}", e))?;
    let mut out = doc.clone();
    json_patch::patch(&mut out, &ops.0).map_err(|e| e.to_string())?;
    Ok(out)
}

/// Rewrite `replace` operations whose target does not exist into `add`.
///
/// `replace` fails on absent paths while `add` creates or replaces, so this
/// keeps producer patches valid against documents that lack optional fields.
/// Operations are simulated in order so earlier ops can create later targets.
pub fn enforce_add_semantics(doc: &Value, patch: &Value) -> Value {
    let Some(ops) = patch.as_array() else {
        return patch.clone();
    };

    let mut working = doc.clone();
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        let mut op = op.clone();
        let is_replace = op.get("op").and_then(Value::as_str) == Some("replace");
        if is_replace {
            let missing = op
                .get("path")
                .and_then(Value::as_str)
                .is_some_and(|path| working.pointer(path).is_none());
            if missing {
                op["op"] = Value::String("add".to_string());
            }
        }
        if let Ok(next) = apply_patch(&working, &Value::Array(vec![op.clone()])) {
            working = next;
        }
        out.push(op);
    }
    Value::Array(out)
}

/// Whether documents of this type carry the derived arrays.
pub fn has_derived_arrays(entity_type: EntityType) -> bool {
    matches!(entity_type, EntityType::Module | EntityType::Bundle)
}

/// The derived array an operation path falls under, if any.
fn derived_array_root(path: &str) -> Option<&'static str> {
    DERIVED_ARRAY_PATHS.iter().copied().find(|root| {
        path == *root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Patch taking `from` to `to`, or `None` when they are equal.
///
/// For modules and bundles, element-level edits of a derived array are
/// folded into one `add` of the whole array, so the patch still applies
/// after a re-sync drops the array from the canonical document.
pub fn diff_patch(entity_type: EntityType, from: &Value, to: &Value) -> Result<Option<Value>> {
    let patch = json_patch::diff(from, to);
    if patch.0.is_empty() {
        return Ok(None);
    }
    let Value::Array(ops) = serde_json::to_value(&patch)? else {
        return Ok(None);
    };
    if !has_derived_arrays(entity_type) {
        return Ok(Some(Value::Array(ops)));
    }

    let mut folded: Vec<Value> = Vec::with_capacity(ops.len());
    let mut seen: HashSet<&'static str> = HashSet::new();
    for op in ops {
        let root = op.get("path").and_then(Value::as_str).and_then(derived_array_root);
        let Some(root) = root else {
            folded.push(op);
            continue;
        };
        if !seen.insert(root) {
            continue;
        }
        folded.push(match to.pointer(root) {
            Some(value) => json!({ "op": "add", "path": root, "value": value }),
            None => json!({ "op": "remove", "path": root }),
        });
    }
    Ok(Some(Value::Array(folded)))
}

/// Fold a new patch into an existing UPDATE against `canonical`.
///
/// The combined edit is re-expressed as a single diff from canonical.
/// Returns `None` when the result equals canonical, meaning the change
/// should be dropped.
pub fn compose_update(
    entity_type: EntityType,
    canonical: &Value,
    existing_patch: Option<&Value>,
    new_patch: &Value,
) -> Result<Option<Value>> {
    let base = match existing_patch {
        Some(existing) => apply_patch(canonical, existing).map_err(|e| {
            Error::InvalidInput(format!(
                "existing change cannot be applied ({}); revert it first",
                e
            ))
        })?,
        None => canonical.clone(),
    };
    let new_patch = enforce_add_semantics(&base, new_patch);
    let updated = apply_patch(&base, &new_patch)
        .map_err(|e| Error::InvalidInput(format!("patch cannot be applied: {}", e)))?;
    diff_patch(entity_type, canonical, &updated)
}

/// Effective-state lookups used by derivation and graph queries.
pub trait EffectiveStateProvider {
    /// Effective entity, or `None` when there is nothing to show.
    fn effective_entity(&self, entity_type: EntityType, entity_key: &str)
    -> Result<Option<EffectiveEntity>>;

    /// Effective member properties and subobjects of a category.
    ///
    /// Deleted or unknown categories have no members.
    fn category_members(&self, category_key: &str) -> Result<CategoryMembers>;

    /// Keys of live resources whose effective category is `category_key`.
    fn resources_for_category(&self, category_key: &str) -> Result<BTreeSet<String>>;

    /// Effective document, `None` only when neither a canonical entity nor a
    /// CREATE change exists.
    fn get_effective_json(&self, entity_type: EntityType, entity_key: &str) -> Result<Option<Value>> {
        Ok(self
            .effective_entity(entity_type, entity_key)?
            .filter(EffectiveEntity::exists)
            .map(|e| e.effective_json))
    }

    /// Whether the draft deletes this entity.
    fn is_deleted(&self, entity_type: EntityType, entity_key: &str) -> Result<bool> {
        Ok(self
            .effective_entity(entity_type, entity_key)?
            .is_some_and(|e| e.change_status == ChangeStatus::Deleted))
    }
}

/// Properties and subobjects a category has, including inherited ones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InheritedMembers {
    pub category: String,

    /// Ancestors in breadth-first order, nearest first
    pub ancestors: Vec<String>,

    /// Property key → category that declares it (nearest wins)
    pub properties: BTreeMap<String, String>,

    /// Subobject key → category that declares it (nearest wins)
    pub subobjects: BTreeMap<String, String>,
}

/// Canonical store plus a snapshot of one draft's change log.
///
/// Changes are fetched once at construction; every lookup afterwards reads
/// canonical rows on demand and overlays the snapshot.
pub struct EffectiveState<'a, S: ?Sized> {
    store: &'a S,
    draft_id: Option<String>,
    changes: HashMap<EntityRef, DraftChange>,
}

impl<'a, S> EffectiveState<'a, S>
where
    S: EntityStore + DraftStore + ?Sized,
{
    /// Snapshot `draft_id`'s changes over `store`. No draft means canonical state.
    pub fn new(store: &'a S, draft_id: Option<&str>) -> Result<Self> {
        let changes = match draft_id {
            Some(id) => store
                .list_draft_changes(id)?
                .into_iter()
                .map(|c| (c.entity_ref(), c))
                .collect(),
            None => HashMap::new(),
        };
        Ok(Self {
            store,
            draft_id: draft_id.map(str::to_string),
            changes,
        })
    }

    pub fn canonical(store: &'a S) -> Self {
        Self {
            store,
            draft_id: None,
            changes: HashMap::new(),
        }
    }

    pub fn draft_id(&self) -> Option<&str> {
        self.draft_id.as_deref()
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn change(&self, entity_type: EntityType, entity_key: &str) -> Option<&DraftChange> {
        self.changes.get(&EntityRef::new(entity_type, entity_key))
    }

    /// All changes in the snapshot, ordered by entity.
    pub fn changes(&self) -> Vec<&DraftChange> {
        let mut changes: Vec<&DraftChange> = self.changes.values().collect();
        changes.sort_by(|a, b| a.entity_ref().cmp(&b.entity_ref()));
        changes
    }

    pub fn get_effective_entity(
        &self,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Result<EffectiveEntity> {
        let canonical = self.store.get_entity(entity_type, entity_key)?;
        apply_overlay(
            entity_type,
            entity_key,
            canonical.as_ref(),
            self.change(entity_type, entity_key),
        )
    }

    /// Every entity of a type as seen through the draft, ordered by key.
    ///
    /// Includes draft-created entities with no canonical record.
    pub fn effective_entities_of_type(&self, entity_type: EntityType) -> Result<Vec<EffectiveEntity>> {
        let canonical: HashMap<String, Entity> = self
            .store
            .list_entities_by_type(entity_type)?
            .into_iter()
            .map(|e| (e.entity_key.clone(), e))
            .collect();
        let changes: HashMap<String, DraftChange> = self
            .changes
            .values()
            .filter(|c| c.entity_type == entity_type)
            .map(|c| (c.entity_key.clone(), c.clone()))
            .collect();

        let mut keys: BTreeSet<String> = canonical.keys().cloned().collect();
        keys.extend(changes.keys().cloned());
        let keys: Vec<String> = keys.into_iter().collect();

        Ok(apply_overlay_batch(entity_type, &keys, &canonical, &changes)
            .into_values()
            .collect())
    }

    /// Members of a category and all its effective ancestors.
    pub fn inherited_members(&self, category_key: &str) -> Result<InheritedMembers> {
        if self.get_effective_json(EntityType::Category, category_key)?.is_none() {
            return Err(Error::NotFound(format!("category:{}", category_key)));
        }

        let mut result = InheritedMembers {
            category: category_key.to_string(),
            ..Default::default()
        };
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(category_key.to_string());
        queue.push_back(category_key.to_string());

        while let Some(current) = queue.pop_front() {
            let members = self.category_members(&current)?;
            for p in members.properties {
                result.properties.entry(p).or_insert_with(|| current.clone());
            }
            for s in members.subobjects {
                result.subobjects.entry(s).or_insert_with(|| current.clone());
            }

            let Some(json) = self.get_effective_json(EntityType::Category, &current)? else {
                continue;
            };
            for parent in CategoryView::from_json(&json).parents {
                if visited.insert(parent.clone()) {
                    result.ancestors.push(parent.clone());
                    queue.push_back(parent);
                }
            }
        }

        Ok(result)
    }

    fn resource_belongs_to(&self, resource_key: &str, category_key: &str) -> Result<bool> {
        let Some(effective) = self.effective_entity(EntityType::Resource, resource_key)? else {
            return Ok(false);
        };
        if effective.change_status == ChangeStatus::Deleted {
            return Ok(false);
        }
        let view = ResourceView::from_json(&effective.effective_json);
        Ok(view.category.as_deref() == Some(category_key))
    }
}

impl<S> EffectiveStateProvider for EffectiveState<'_, S>
where
    S: EntityStore + DraftStore + ?Sized,
{
    fn effective_entity(
        &self,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Result<Option<EffectiveEntity>> {
        match self.get_effective_entity(entity_type, entity_key) {
            Ok(effective) => Ok(Some(effective)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn category_members(&self, category_key: &str) -> Result<CategoryMembers> {
        // Untouched categories can use the store's structural index.
        if self.change(EntityType::Category, category_key).is_none() {
            return self.store.get_category_members(category_key);
        }

        match self.effective_entity(EntityType::Category, category_key)? {
            Some(effective) if effective.change_status != ChangeStatus::Deleted => {
                let view = CategoryView::from_json(&effective.effective_json);
                Ok(CategoryMembers {
                    properties: view.properties,
                    subobjects: view.subobjects,
                })
            }
            _ => Ok(CategoryMembers::default()),
        }
    }

    fn resources_for_category(&self, category_key: &str) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();

        for resource in self.store.list_resources_by_category(category_key)? {
            if self.change(EntityType::Resource, &resource.entity_key).is_none()
                || self.resource_belongs_to(&resource.entity_key, category_key)?
            {
                out.insert(resource.entity_key);
            }
        }

        // Draft edits can move a resource into this category or create one.
        for change in self.changes.values() {
            if change.entity_type != EntityType::Resource || change.change_type == ChangeType::Delete {
                continue;
            }
            if !out.contains(&change.entity_key)
                && self.resource_belongs_to(&change.entity_key, category_key)?
            {
                out.insert(change.entity_key.clone());
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::test_utils::{category, create, delete, resource, update};

    fn dog() -> Entity {
        category("Dog", &["Animal"], &[])
    }

    #[test]
    fn test_no_change_is_unchanged() {
        let canonical = dog();
        let eff = apply_overlay(EntityType::Category, "Dog", Some(&canonical), None).unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Unchanged);
        assert_eq!(eff.effective_json, canonical.canonical_json);
        assert!(eff.patch_error.is_none());
    }

    #[test]
    fn test_nothing_to_show_is_not_found() {
        let err = apply_overlay(EntityType::Category, "Ghost", None, None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_create_wins_even_over_canonical() {
        let doc = json!({ "label": "Brand new dog" });
        let change = create("d1", EntityType::Category, "Dog", doc.clone());

        let fresh = apply_overlay(EntityType::Category, "Dog", None, Some(&change)).unwrap();
        assert_eq!(fresh.change_status, ChangeStatus::Added);
        assert_eq!(fresh.effective_json, doc);
        assert!(fresh.anomaly.is_none());

        let canonical = dog();
        let shadowing =
            apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
        assert_eq!(shadowing.change_status, ChangeStatus::Added);
        assert_eq!(shadowing.effective_json, doc);
        assert_eq!(shadowing.anomaly, Some(OverlayAnomaly::CreateOverCanonical));
    }

    #[test]
    fn test_delete_keeps_canonical_document() {
        let canonical = dog();
        let change = delete("d1", EntityType::Category, "Dog");
        let eff = apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Deleted);
        assert_eq!(eff.effective_json, canonical.canonical_json);
    }

    #[test]
    fn test_delete_without_canonical_is_flagged_noop() {
        let change = delete("d1", EntityType::Category, "Gone");
        let eff = apply_overlay(EntityType::Category, "Gone", None, Some(&change)).unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Deleted);
        assert_eq!(eff.anomaly, Some(OverlayAnomaly::DeleteWithoutCanonical));
        assert!(!eff.exists());
    }

    #[test]
    fn test_update_applies_patch() {
        let canonical = dog();
        let change = update(
            "d1",
            EntityType::Category,
            "Dog",
            json!([{ "op": "add", "path": "/properties", "value": ["HasCollar"] }]),
        );
        let eff = apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Modified);
        assert_eq!(eff.effective_json["properties"], json!(["HasCollar"]));
        // Canonical is never mutated
        assert_eq!(canonical.canonical_json["properties"], json!([]));
    }

    #[test]
    fn test_update_to_identical_document_is_unchanged() {
        let canonical = dog();
        let change = update(
            "d1",
            EntityType::Category,
            "Dog",
            json!([{ "op": "replace", "path": "/label", "value": "Dog" }]),
        );
        let eff = apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Unchanged);
        assert!(eff.patch_error.is_none());
    }

    #[test]
    fn test_inapplicable_patch_fails_soft() {
        let canonical = Entity::new(EntityType::Module, "Pets", json!({ "categories": ["Dog"] }));
        let change = update(
            "d1",
            EntityType::Module,
            "Pets",
            json!([{ "op": "replace", "path": "/properties", "value": ["HasCollar"] }]),
        );
        let eff = apply_overlay(EntityType::Module, "Pets", Some(&canonical), Some(&change)).unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Unchanged);
        assert_eq!(eff.effective_json, canonical.canonical_json);
        assert!(eff.patch_error.is_some());
    }

    #[test]
    fn test_malformed_patch_fails_soft() {
        let canonical = dog();
        let change = update("d1", EntityType::Category, "Dog", json!({ "not": "a patch" }));
        let eff = apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
        assert!(eff.patch_error.unwrap().contains("malformed patch"));
        assert_eq!(eff.effective_json, canonical.canonical_json);
    }

    #[test]
    fn test_overlay_is_deterministic() {
        let canonical = dog();
        let change = update(
            "d1",
            EntityType::Category,
            "Dog",
            json!([{ "op": "add", "path": "/label", "value": "Hound" }]),
        );
        let first = apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
        for _ in 0..5 {
            let again =
                apply_overlay(EntityType::Category, "Dog", Some(&canonical), Some(&change)).unwrap();
            assert_eq!(
                serde_json::to_string(&again).unwrap(),
                serde_json::to_string(&first).unwrap()
            );
        }
    }

    #[test]
    fn test_batch_skips_keys_with_nothing_to_show() {
        let canonical: HashMap<String, Entity> =
            [("Dog".to_string(), dog())].into_iter().collect();
        let changes: HashMap<String, DraftChange> = [(
            "Cat".to_string(),
            create("d1", EntityType::Category, "Cat", json!({ "label": "Cat" })),
        )]
        .into_iter()
        .collect();
        let keys = vec!["Cat".to_string(), "Dog".to_string(), "Ghost".to_string()];

        let out = apply_overlay_batch(EntityType::Category, &keys, &canonical, &changes);
        assert_eq!(out.len(), 2);
        assert_eq!(out["Cat"].change_status, ChangeStatus::Added);
        assert_eq!(out["Dog"].change_status, ChangeStatus::Unchanged);
    }

    #[test]
    fn test_enforce_add_semantics_rewrites_missing_replace() {
        let doc = json!({ "categories": ["Dog"], "label": "Pets" });
        let patch = json!([
            { "op": "replace", "path": "/properties", "value": ["HasCollar"] },
            { "op": "replace", "path": "/label", "value": "Pet things" },
            { "op": "replace", "path": "/properties", "value": ["HasName"] }
        ]);
        let fixed = enforce_add_semantics(&doc, &patch);
        assert_eq!(fixed[0]["op"], "add");
        assert_eq!(fixed[1]["op"], "replace");
        // The first op created the path, so the later replace stays a replace
        assert_eq!(fixed[2]["op"], "replace");
        assert!(apply_patch(&doc, &fixed).is_ok());
    }

    #[test]
    fn test_compose_update_amends_existing_patch() {
        let canonical = json!({ "label": "Dog", "properties": [] });
        let first = compose_update(
            EntityType::Category,
            &canonical,
            None,
            &json!([{ "op": "replace", "path": "/label", "value": "Hound" }]),
        )
        .unwrap()
        .unwrap();
        let second = compose_update(
            EntityType::Category,
            &canonical,
            Some(&first),
            &json!([{ "op": "add", "path": "/properties/-", "value": "HasCollar" }]),
        )
        .unwrap()
        .unwrap();

        let result = apply_patch(&canonical, &second).unwrap();
        assert_eq!(result["label"], "Hound");
        assert_eq!(result["properties"], json!(["HasCollar"]));
    }

    #[test]
    fn test_compose_update_back_to_canonical_is_none() {
        let canonical = json!({ "label": "Dog" });
        let first = compose_update(
            EntityType::Category,
            &canonical,
            None,
            &json!([{ "op": "replace", "path": "/label", "value": "Hound" }]),
        )
        .unwrap()
        .unwrap();
        let reverted = compose_update(
            EntityType::Category,
            &canonical,
            Some(&first),
            &json!([{ "op": "replace", "path": "/label", "value": "Dog" }]),
        )
        .unwrap();
        assert!(reverted.is_none());
    }

    #[test]
    fn test_diff_folds_derived_arrays_into_add() {
        let canonical = json!({ "categories": ["Dog"], "properties": ["Old"], "resources": ["r1"] });
        let target = json!({
            "categories": ["Dog"],
            "properties": ["HasCollar", "HasName"],
            "resources": [],
            "templates": ["Card"]
        });
        let patch = diff_patch(EntityType::Module, &canonical, &target).unwrap().unwrap();
        let ops = patch.as_array().unwrap();
        assert_eq!(ops.len(), 3);
        for op in ops {
            assert_eq!(op["op"], "add");
            assert!(DERIVED_ARRAY_PATHS.contains(&op["path"].as_str().unwrap()));
        }
        assert_eq!(apply_patch(&canonical, &patch).unwrap(), target);
        let bare = json!({ "categories": ["Dog"] });
        assert_eq!(apply_patch(&bare, &patch).unwrap(), target);

        // Other types keep the element-level diff.
        let patch = diff_patch(EntityType::Category, &canonical, &target).unwrap().unwrap();
        assert!(patch.as_array().unwrap().iter().any(|op| op["path"] == "/properties/0"));
    }

    #[test]
    fn test_diff_removes_dropped_derived_array() {
        let canonical = json!({ "categories": ["Dog"], "templates": ["Card"] });
        let target = json!({ "categories": ["Dog"] });
        let patch = diff_patch(EntityType::Bundle, &canonical, &target).unwrap().unwrap();
        assert_eq!(patch, json!([{ "op": "remove", "path": "/templates" }]));
    }

    #[test]
    fn test_compose_update_rejects_inapplicable_patch() {
        let canonical = json!({ "label": "Dog" });
        let err = compose_update(
            EntityType::Category,
            &canonical,
            None,
            &json!([{ "op": "remove", "path": "/nope" }]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_get_effective_json_semantics() {
        let mut store = MemoryStore::with_entities([dog(), category("Gone", &[], &[])]);
        store.put_change(create("d1", EntityType::Category, "Cat", json!({ "label": "Cat" })));
        store.put_change(delete("d1", EntityType::Category, "Gone"));
        store.put_change(delete("d1", EntityType::Category, "NeverExisted"));
        let state = EffectiveState::new(&store, Some("d1")).unwrap();

        assert!(state.get_effective_json(EntityType::Category, "Dog").unwrap().is_some());
        assert!(state.get_effective_json(EntityType::Category, "Cat").unwrap().is_some());
        // Deleted entities still show their canonical document
        assert!(state.get_effective_json(EntityType::Category, "Gone").unwrap().is_some());
        assert!(state.is_deleted(EntityType::Category, "Gone").unwrap());
        assert!(state.get_effective_json(EntityType::Category, "NeverExisted").unwrap().is_none());
        assert!(state.get_effective_json(EntityType::Category, "Ghost").unwrap().is_none());
    }

    #[test]
    fn test_without_draft_everything_is_unchanged() {
        let mut store = MemoryStore::with_entities([dog()]);
        store.put_change(delete("d1", EntityType::Category, "Dog"));
        let state = EffectiveState::new(&store, None).unwrap();
        let eff = state.get_effective_entity(EntityType::Category, "Dog").unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Unchanged);
    }

    #[test]
    fn test_effective_entities_of_type_includes_creates() {
        let mut store = MemoryStore::with_entities([dog()]);
        store.put_change(create("d1", EntityType::Category, "Cat", json!({})));
        let state = EffectiveState::new(&store, Some("d1")).unwrap();

        let all = state.effective_entities_of_type(EntityType::Category).unwrap();
        let keys: Vec<&str> = all.iter().map(|e| e.entity_key.as_str()).collect();
        assert_eq!(keys, vec!["Cat", "Dog"]);
    }

    #[test]
    fn test_category_members_follow_draft() {
        let mut store = MemoryStore::with_entities([
            category("Dog", &[], &["HasName"]),
            category("Cat", &[], &["HasWhiskers"]),
        ]);
        store.put_change(update(
            "d1",
            EntityType::Category,
            "Dog",
            json!([{ "op": "add", "path": "/properties/-", "value": "HasCollar" }]),
        ));
        store.put_change(delete("d1", EntityType::Category, "Cat"));
        let state = EffectiveState::new(&store, Some("d1")).unwrap();

        assert_eq!(
            state.category_members("Dog").unwrap().properties,
            vec!["HasName", "HasCollar"]
        );
        assert!(state.category_members("Cat").unwrap().properties.is_empty());
    }

    #[test]
    fn test_resources_include_draft_creates_and_moves() {
        let mut store = MemoryStore::with_entities([
            resource("alice", "Person"),
            resource("bob", "Person"),
            resource("acme", "Company"),
        ]);
        store.put_change(create(
            "d1",
            EntityType::Resource,
            "carol",
            json!({ "category": "Person" }),
        ));
        store.put_change(update(
            "d1",
            EntityType::Resource,
            "acme",
            json!([{ "op": "replace", "path": "/category", "value": "Person" }]),
        ));
        store.put_change(delete("d1", EntityType::Resource, "bob"));
        let state = EffectiveState::new(&store, Some("d1")).unwrap();

        let people: Vec<String> = state.resources_for_category("Person").unwrap().into_iter().collect();
        assert_eq!(people, vec!["acme", "alice", "carol"]);
        assert!(state.resources_for_category("Company").unwrap().is_empty());
    }

    #[test]
    fn test_inherited_members_nearest_declaration_wins() {
        let store = MemoryStore::with_entities([
            category("Animal", &["Thing"], &["HasName", "HasAge"]),
            category("Thing", &["Animal"], &["HasId"]),
            category("Dog", &["Animal"], &["HasName", "HasCollar"]),
        ]);
        let state = EffectiveState::canonical(&store);

        let inherited = state.inherited_members("Dog").unwrap();
        assert_eq!(inherited.ancestors, vec!["Animal", "Thing"]);
        assert_eq!(inherited.properties["HasName"], "Dog");
        assert_eq!(inherited.properties["HasAge"], "Animal");
        assert_eq!(inherited.properties["HasId"], "Thing");
    }

    #[test]
    fn test_inherited_members_unknown_category() {
        let store = MemoryStore::new();
        let state = EffectiveState::canonical(&store);
        assert!(matches!(
            state.inherited_members("Nope").unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
