//! Draft lifecycle and staging.
//!
//! A draft holds at most one change per entity. Every staging operation reads
//! the existing change and the canonical record, folds the new edit into a
//! single CREATE, UPDATE or DELETE, and writes it back as one upsert. An edit
//! that brings an entity back to its canonical state removes the change.

use super::{Output, json_string, open_storage, status_marker};
use crate::models::{
    ChangeStatus, ChangeType, Changeset, ChangesetEntry, Draft, DraftChange, DraftStatus,
    EffectiveEntity, EntityRef, EntityType, OverlayAnomaly,
};
use crate::overlay::{
    EffectiveState, apply_patch, compose_update, diff_patch, enforce_add_semantics,
};
use crate::storage::{DraftStore, EntityStore, Storage};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Fetch a draft and make sure it still accepts edits.
pub fn require_open_draft(storage: &Storage, id_or_token: &str) -> Result<Draft> {
    let draft = storage.get_draft(id_or_token)?;
    if !draft.is_open() {
        return Err(Error::DraftClosed(format!("{} is {}", draft.id, draft.status)));
    }
    Ok(draft)
}

fn require_object(doc: &Value) -> Result<()> {
    if doc.is_object() {
        Ok(())
    } else {
        Err(Error::InvalidInput("entity document must be a JSON object".to_string()))
    }
}

fn require_patch(patch: &Value) -> Result<()> {
    if patch.is_array() {
        Ok(())
    } else {
        Err(Error::InvalidInput(
            "patch must be a JSON array of RFC 6902 operations".to_string(),
        ))
    }
}

/// Parse a JSON argument given on the command line.
fn parse_json_arg(what: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::InvalidInput(format!("invalid {}: {}", what, e)))
}

/// Store `change`, or drop the entity's change when there is none.
fn write_change(
    storage: &mut Storage,
    draft_id: &str,
    entity_type: EntityType,
    entity_key: &str,
    change: Option<DraftChange>,
) -> Result<Option<DraftChange>> {
    match &change {
        Some(change) => storage.upsert_draft_change(change)?,
        None => {
            storage.delete_draft_change(draft_id, entity_type, entity_key)?;
        }
    }
    Ok(change)
}

/// Stage a new entity.
///
/// Rejected when the entity exists canonically, unless this draft deletes
/// it: then the delete becomes an UPDATE to the new document. A second
/// CREATE for the same key amends the first.
pub fn stage_create(
    storage: &mut Storage,
    draft_id: &str,
    entity_type: EntityType,
    entity_key: &str,
    doc: Value,
) -> Result<Option<DraftChange>> {
    require_object(&doc)?;
    let existing = storage.get_draft_change(draft_id, entity_type, entity_key)?;
    let canonical = storage.get_entity(entity_type, entity_key)?;

    let change = match (canonical, existing.map(|c| c.change_type)) {
        (Some(entity), Some(ChangeType::Delete)) => {
            diff_patch(entity_type, &entity.canonical_json, &doc)?
                .map(|patch| DraftChange::update(draft_id, entity_type, entity_key, patch))
        }
        (Some(_), _) => {
            return Err(Error::InvalidInput(format!(
                "{} already exists; use update or replace",
                EntityRef::new(entity_type, entity_key)
            )));
        }
        (None, _) => Some(DraftChange::create(draft_id, entity_type, entity_key, doc)),
    };
    write_change(storage, draft_id, entity_type, entity_key, change)
}

/// Stage an RFC 6902 patch against the entity's effective document.
///
/// Patches fold into an existing UPDATE (re-diffed against canonical) or
/// into the document of an existing CREATE. `replace` on a path the document
/// lacks is rewritten to `add`.
pub fn stage_update(
    storage: &mut Storage,
    draft_id: &str,
    entity_type: EntityType,
    entity_key: &str,
    patch: &Value,
) -> Result<Option<DraftChange>> {
    require_patch(patch)?;
    let entity_ref = EntityRef::new(entity_type, entity_key);
    let existing = storage.get_draft_change(draft_id, entity_type, entity_key)?;

    let change = match existing {
        Some(DraftChange {
            change_type: ChangeType::Create,
            replacement_json,
            ..
        }) => {
            let doc = replacement_json.unwrap_or_else(|| Value::Object(Default::default()));
            let patch = enforce_add_semantics(&doc, patch);
            let doc = apply_patch(&doc, &patch)
                .map_err(|e| Error::InvalidInput(format!("patch cannot be applied: {}", e)))?;
            require_object(&doc)?;
            Some(DraftChange::create(draft_id, entity_type, entity_key, doc))
        }
        Some(DraftChange {
            change_type: ChangeType::Delete,
            ..
        }) => {
            return Err(Error::InvalidInput(format!(
                "{} is deleted in this draft; revert it first",
                entity_ref
            )));
        }
        existing => {
            let entity = storage
                .get_entity(entity_type, entity_key)?
                .ok_or_else(|| Error::NotFound(entity_ref.to_string()))?;
            let existing_patch = existing.as_ref().and_then(|c| c.patch.as_ref());
            compose_update(entity_type, &entity.canonical_json, existing_patch, patch)?
                .map(|patch| DraftChange::update(draft_id, entity_type, entity_key, patch))
        }
    };
    write_change(storage, draft_id, entity_type, entity_key, change)
}

/// Stage a whole new document for an entity.
///
/// Against a canonical entity this records the difference as an UPDATE;
/// against a draft-created one it amends the CREATE. A draft-deleted entity
/// must be reverted first.
pub fn stage_replace(
    storage: &mut Storage,
    draft_id: &str,
    entity_type: EntityType,
    entity_key: &str,
    doc: Value,
) -> Result<Option<DraftChange>> {
    require_object(&doc)?;
    let entity_ref = EntityRef::new(entity_type, entity_key);
    let existing = storage.get_draft_change(draft_id, entity_type, entity_key)?;
    match existing.map(|c| c.change_type) {
        Some(ChangeType::Create) => {
            let change = DraftChange::create(draft_id, entity_type, entity_key, doc);
            return write_change(storage, draft_id, entity_type, entity_key, Some(change));
        }
        Some(ChangeType::Delete) => {
            return Err(Error::InvalidInput(format!(
                "{} is deleted in this draft; revert it first",
                entity_ref
            )));
        }
        Some(ChangeType::Update) | None => {}
    }

    let entity = storage
        .get_entity(entity_type, entity_key)?
        .ok_or_else(|| Error::NotFound(entity_ref.to_string()))?;
    let change = diff_patch(entity_type, &entity.canonical_json, &doc)?
        .map(|patch| DraftChange::update(draft_id, entity_type, entity_key, patch));
    write_change(storage, draft_id, entity_type, entity_key, change)
}

/// Stage a deletion. Deleting a draft-created entity just drops its CREATE.
pub fn stage_delete(
    storage: &mut Storage,
    draft_id: &str,
    entity_type: EntityType,
    entity_key: &str,
) -> Result<Option<DraftChange>> {
    let existing = storage.get_draft_change(draft_id, entity_type, entity_key)?;
    if existing.is_some_and(|c| c.change_type == ChangeType::Create) {
        return write_change(storage, draft_id, entity_type, entity_key, None);
    }
    if storage.get_entity(entity_type, entity_key)?.is_none() {
        return Err(Error::NotFound(EntityRef::new(entity_type, entity_key).to_string()));
    }
    let change = DraftChange::delete(draft_id, entity_type, entity_key);
    write_change(storage, draft_id, entity_type, entity_key, Some(change))
}

/// Build the changeset a draft would produce.
///
/// Fails if any change cannot be applied.
pub fn build_changeset(storage: &Storage, draft: &Draft) -> Result<Changeset> {
    let state = EffectiveState::new(storage, Some(&draft.id))?;
    let mut entries = Vec::new();
    let mut failures = Vec::new();

    for change in state.changes() {
        let effective = state.get_effective_entity(change.entity_type, &change.entity_key)?;
        if let Some(error) = &effective.patch_error {
            failures.push(format!("{}: {}", change.entity_ref(), error));
            continue;
        }
        let content = match change.change_type {
            ChangeType::Delete => None,
            ChangeType::Create | ChangeType::Update => Some(effective.effective_json),
        };
        entries.push(ChangesetEntry {
            path: format!("{}/{}.json", change.entity_type.dir_name(), change.entity_key),
            entity_type: change.entity_type,
            entity_key: change.entity_key.clone(),
            action: change.change_type,
            content,
        });
    }

    if !failures.is_empty() {
        return Err(Error::InvalidInput(format!(
            "draft {} has changes that cannot be applied: {}",
            draft.id,
            failures.join("; ")
        )));
    }

    Ok(Changeset {
        draft_id: draft.id.clone(),
        title: draft.title.clone(),
        entries,
    })
}

// === Output types ===

/// Result of `oh draft create`.
#[derive(Serialize)]
pub struct DraftCreated {
    #[serde(flatten)]
    pub draft: Draft,
}

impl Output for DraftCreated {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Created draft {} \"{}\"\nToken: {}",
            self.draft.id, self.draft.title, self.draft.token
        )
    }
}

/// Result of `oh draft list`.
#[derive(Serialize)]
pub struct DraftList {
    pub drafts: Vec<Draft>,
    pub count: usize,
}

impl Output for DraftList {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.drafts.is_empty() {
            return "No drafts.".to_string();
        }
        let mut lines = vec![format!("{} draft(s):", self.count)];
        for draft in &self.drafts {
            lines.push(format!("  {} [{}] {}", draft.id, draft.status, draft.title));
        }
        lines.join("\n")
    }
}

/// One pending change with its effective outcome.
#[derive(Serialize)]
pub struct ChangeView {
    #[serde(flatten)]
    pub entity: EntityRef,
    pub change_type: ChangeType,
    pub change_status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<OverlayAnomaly>,
}

/// Result of `oh draft show`.
#[derive(Serialize)]
pub struct DraftShown {
    pub draft: Draft,
    pub changes: Vec<ChangeView>,
}

impl Output for DraftShown {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("{} [{}] {}", self.draft.id, self.draft.status, self.draft.title),
            format!("Updated: {}", self.draft.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ];
        if self.changes.is_empty() {
            lines.push("No changes.".to_string());
        } else {
            lines.push(format!("Changes ({}):", self.changes.len()));
        }
        for change in &self.changes {
            let mut line = format!(
                "  {} {} {}",
                status_marker(change.change_status),
                change.change_type,
                change.entity
            );
            if let Some(error) = &change.patch_error {
                line.push_str(&format!(" [patch error: {}]", error));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Result of `oh draft discard`.
#[derive(Serialize)]
pub struct DraftDiscarded {
    pub id: String,
    pub removed_changes: usize,
}

impl Output for DraftDiscarded {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Discarded draft {} ({} change(s) removed)",
            self.id, self.removed_changes
        )
    }
}

/// Result of `oh draft submit`.
#[derive(Serialize)]
pub struct DraftSubmitted {
    #[serde(flatten)]
    pub changeset: Changeset,
}

impl Output for DraftSubmitted {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Submitted draft {} \"{}\" ({} file(s))",
            self.changeset.draft_id,
            self.changeset.title,
            self.changeset.entries.len()
        )];
        for entry in &self.changeset.entries {
            let verb = match entry.action {
                ChangeType::Create => "create",
                ChangeType::Update => "update",
                ChangeType::Delete => "delete",
            };
            lines.push(format!("  {:<6} {}", verb, entry.path));
        }
        lines.join("\n")
    }
}

/// Result of a staging command.
#[derive(Serialize)]
pub struct Staged {
    pub draft_id: String,
    #[serde(flatten)]
    pub entity: EntityRef,
    /// Change now recorded for the entity, `None` when the edit cancelled out
    pub change: Option<DraftChange>,
    /// Effective state after the edit, `None` when nothing is left to show
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective: Option<EffectiveEntity>,
}

impl Output for Staged {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        match (&self.change, &self.effective) {
            (Some(change), Some(effective)) => format!(
                "Staged {} {} in {} ({})",
                change.change_type, self.entity, self.draft_id, effective.change_status
            ),
            (Some(change), None) => format!(
                "Staged {} {} in {}",
                change.change_type, self.entity, self.draft_id
            ),
            (None, _) => format!("No pending change for {} in {}", self.entity, self.draft_id),
        }
    }
}

/// Result of `oh draft revert`.
#[derive(Serialize)]
pub struct Reverted {
    pub draft_id: String,
    #[serde(flatten)]
    pub entity: EntityRef,
}

impl Output for Reverted {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Reverted {} in {}", self.entity, self.draft_id)
    }
}

// === Commands ===

pub fn draft_create(repo_path: &Path, title: &str) -> Result<DraftCreated> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("draft title cannot be empty".to_string()));
    }
    let mut storage = open_storage(repo_path)?;
    Ok(DraftCreated {
        draft: storage.create_draft(title)?,
    })
}

pub fn draft_list(repo_path: &Path, status: Option<DraftStatus>) -> Result<DraftList> {
    let storage = open_storage(repo_path)?;
    let drafts = storage.list_drafts(status)?;
    Ok(DraftList {
        count: drafts.len(),
        drafts,
    })
}

pub fn draft_show(repo_path: &Path, draft: &str) -> Result<DraftShown> {
    let storage = open_storage(repo_path)?;
    let draft = storage.get_draft(draft)?;
    let state = EffectiveState::new(&storage, Some(&draft.id))?;

    let mut changes = Vec::new();
    for change in state.changes() {
        let effective = state.get_effective_entity(change.entity_type, &change.entity_key)?;
        changes.push(ChangeView {
            entity: change.entity_ref(),
            change_type: change.change_type,
            change_status: effective.change_status,
            patch: change.patch.clone(),
            replacement_json: change.replacement_json.clone(),
            patch_error: effective.patch_error,
            anomaly: effective.anomaly,
        });
    }
    Ok(DraftShown { draft, changes })
}

pub fn draft_discard(repo_path: &Path, draft: &str) -> Result<DraftDiscarded> {
    let mut storage = open_storage(repo_path)?;
    let draft = require_open_draft(&storage, draft)?;
    let removed_changes = storage.clear_draft_changes(&draft.id)?;
    storage.set_draft_status(&draft.id, DraftStatus::Discarded)?;
    tracing::info!(draft = %draft.id, removed_changes, "draft discarded");
    Ok(DraftDiscarded {
        id: draft.id,
        removed_changes,
    })
}

/// Turn a draft into a changeset and close it.
pub fn draft_submit(repo_path: &Path, draft: &str) -> Result<DraftSubmitted> {
    let mut storage = open_storage(repo_path)?;
    let draft = require_open_draft(&storage, draft)?;
    let changeset = build_changeset(&storage, &draft)?;
    storage.clear_draft_changes(&draft.id)?;
    storage.set_draft_status(&draft.id, DraftStatus::Submitted)?;
    tracing::info!(draft = %draft.id, files = changeset.entries.len(), "draft submitted");
    Ok(DraftSubmitted { changeset })
}

/// Run one staging edit and report the outcome.
fn stage_with<F>(
    repo_path: &Path,
    draft: &str,
    entity_type: EntityType,
    entity_key: &str,
    edit: F,
) -> Result<Staged>
where
    F: FnOnce(&mut Storage, &str) -> Result<Option<DraftChange>>,
{
    let mut storage = open_storage(repo_path)?;
    let draft = require_open_draft(&storage, draft)?;
    let change = edit(&mut storage, &draft.id)?;

    let state = EffectiveState::new(&storage, Some(&draft.id))?;
    let effective = match state.get_effective_entity(entity_type, entity_key) {
        Ok(effective) => Some(effective),
        Err(Error::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    Ok(Staged {
        draft_id: draft.id,
        entity: EntityRef::new(entity_type, entity_key),
        change,
        effective,
    })
}

/// `oh draft new`
pub fn draft_new(
    repo_path: &Path,
    draft: &str,
    entity_type: EntityType,
    entity_key: &str,
    json: &str,
) -> Result<Staged> {
    let doc = parse_json_arg("document", json)?;
    stage_with(repo_path, draft, entity_type, entity_key, |storage, id| {
        stage_create(storage, id, entity_type, entity_key, doc)
    })
}

/// `oh draft update`
pub fn draft_update(
    repo_path: &Path,
    draft: &str,
    entity_type: EntityType,
    entity_key: &str,
    patch: &str,
) -> Result<Staged> {
    let patch = parse_json_arg("patch", patch)?;
    stage_with(repo_path, draft, entity_type, entity_key, |storage, id| {
        stage_update(storage, id, entity_type, entity_key, &patch)
    })
}

/// `oh draft replace`
pub fn draft_replace(
    repo_path: &Path,
    draft: &str,
    entity_type: EntityType,
    entity_key: &str,
    json: &str,
) -> Result<Staged> {
    let doc = parse_json_arg("document", json)?;
    stage_with(repo_path, draft, entity_type, entity_key, |storage, id| {
        stage_replace(storage, id, entity_type, entity_key, doc)
    })
}

/// `oh draft delete`
pub fn draft_delete(
    repo_path: &Path,
    draft: &str,
    entity_type: EntityType,
    entity_key: &str,
) -> Result<Staged> {
    stage_with(repo_path, draft, entity_type, entity_key, |storage, id| {
        stage_delete(storage, id, entity_type, entity_key)
    })
}

/// `oh draft revert`
pub fn draft_revert(
    repo_path: &Path,
    draft: &str,
    entity_type: EntityType,
    entity_key: &str,
) -> Result<Reverted> {
    let mut storage = open_storage(repo_path)?;
    let draft = require_open_draft(&storage, draft)?;
    let entity = EntityRef::new(entity_type, entity_key);
    if !storage.delete_draft_change(&draft.id, entity_type, entity_key)? {
        return Err(Error::NotFound(format!("no change for {} in {}", entity, draft.id)));
    }
    Ok(Reverted {
        draft_id: draft.id,
        entity,
    })
}
