//! Storage layer for ontohub data.
//!
//! This module persists canonical entities, drafts and draft changes.
//!
//! Data lives outside the ontology repository at
//! `~/.local/share/ontohub/<repo-hash>/` (or under `$OH_DATA_DIR`):
//!
//! - `ontohub.db` - SQLite database with canonical entities, structural
//!   indexes (category parents/members, resource categories), drafts and the
//!   draft change log
//! - `config.kdl` - optional session-level configuration
//! - `action.log` - JSONL audit trail of CLI invocations
//!
//! Canonical rows are only written by [`Storage::replace_canonical`] (sync).
//! Drafts never touch them: pending edits live in `draft_changes`, one row per
//! `(draft_id, entity_type, entity_key)`, written by single-statement upserts.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{DraftStore, EntityStore};

use crate::models::ontology::CategoryView;
use crate::models::{
    CategoryMembers, ChangeType, Draft, DraftChange, DraftStatus, Entity, EntityType,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the base data directory.
pub const DATA_DIR_ENV: &str = "OH_DATA_DIR";

const DB_FILE: &str = "ontohub.db";

/// Storage manager for a single ontology repository.
pub struct Storage {
    /// Root directory for this repository's data
    pub root: PathBuf,
    /// SQLite connection
    conn: Connection,
}

impl Storage {
    /// Open existing storage for the given repository path.
    pub fn open(repo_path: &Path) -> Result<Self> {
        Self::open_at(get_storage_dir(repo_path)?)
    }

    /// Initialize storage for a repository.
    pub fn init(repo_path: &Path) -> Result<Self> {
        Self::init_at(get_storage_dir(repo_path)?)
    }

    /// Check if storage exists for the given repository.
    pub fn exists(repo_path: &Path) -> Result<bool> {
        let root = get_storage_dir(repo_path)?;
        Ok(root.join(DB_FILE).exists())
    }

    /// Open storage rooted under an explicit data directory.
    pub fn open_with_data_dir(repo_path: &Path, data_dir: &Path) -> Result<Self> {
        Self::open_at(storage_dir_in(data_dir, repo_path)?)
    }

    /// Initialize storage rooted under an explicit data directory.
    pub fn init_with_data_dir(repo_path: &Path, data_dir: &Path) -> Result<Self> {
        Self::init_at(storage_dir_in(data_dir, repo_path)?)
    }

    fn open_at(root: PathBuf) -> Result<Self> {
        let db_path = root.join(DB_FILE);
        if !db_path.exists() {
            return Err(Error::NotInitialized);
        }
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self { root, conn })
    }

    fn init_at(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        let conn = Connection::open(root.join(DB_FILE))?;
        Self::init_schema(&conn)?;
        tracing::debug!(root = %root.display(), "storage initialized");
        Ok(Self { root, conn })
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                entity_key TEXT NOT NULL,
                canonical_json TEXT NOT NULL,
                label TEXT,
                category_key TEXT,
                synced_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_key)
            );

            CREATE TABLE IF NOT EXISTS category_parents (
                category_key TEXT NOT NULL,
                parent_key TEXT NOT NULL,
                PRIMARY KEY (category_key, parent_key)
            );

            CREATE TABLE IF NOT EXISTS category_members (
                category_key TEXT NOT NULL,
                member_type TEXT NOT NULL,
                member_key TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (category_key, member_type, member_key)
            );

            CREATE TABLE IF NOT EXISTS drafts (
                id TEXT PRIMARY KEY,
                token TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS draft_changes (
                draft_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_key TEXT NOT NULL,
                change_type TEXT NOT NULL,
                patch TEXT,
                replacement_json TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (draft_id, entity_type, entity_key)
            );

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_category ON entities(category_key);
            CREATE INDEX IF NOT EXISTS idx_category_parents_parent ON category_parents(parent_key);
            CREATE INDEX IF NOT EXISTS idx_drafts_status ON drafts(status);
            "#,
        )?;
        Ok(())
    }

    /// Get the storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the session-level KDL config file.
    pub fn session_config_path(&self) -> PathBuf {
        self.root.join("config.kdl")
    }

    // === Canonical Entity Operations ===

    /// Insert or supersede a single canonical entity.
    pub fn put_entity(&mut self, entity: &Entity) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_entity(&tx, entity)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace the whole canonical state in one transaction.
    ///
    /// Drafts and their changes are untouched.
    pub fn replace_canonical(&mut self, entities: &[Entity]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM entities; DELETE FROM category_parents; DELETE FROM category_members;",
        )?;
        for entity in entities {
            write_entity(&tx, entity)?;
        }
        tx.commit()?;
        tracing::debug!(count = entities.len(), "canonical state replaced");
        Ok(entities.len())
    }

    /// Number of canonical entities per type.
    pub fn count_entities(&self) -> Result<BTreeMap<EntityType, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entity_type, COUNT(*) FROM entities GROUP BY entity_type")?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        let mut counts: BTreeMap<EntityType, usize> =
            EntityType::all().iter().map(|t| (*t, 0)).collect();
        for (entity_type, count) in rows {
            let entity_type: EntityType = entity_type.parse().map_err(Error::Other)?;
            counts.insert(entity_type, count as usize);
        }
        Ok(counts)
    }

    fn query_entities(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<(String, String, String, String)> = stmt
            .query_map(args, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        rows.into_iter()
            .map(|(entity_type, key, json, synced_at)| {
                Ok(Entity::with_synced_at(
                    entity_type.parse().map_err(Error::Other)?,
                    key,
                    serde_json::from_str(&json)?,
                    parse_timestamp(&synced_at)?,
                ))
            })
            .collect()
    }

    // === Draft Operations ===

    /// Create a new open draft.
    pub fn create_draft(&mut self, title: &str) -> Result<Draft> {
        let mut id = generate_id("dr", title);
        while self.find_draft(&id)?.is_some() {
            id = generate_id("dr", &format!("{}{}", title, id));
        }

        let draft = Draft::new(id, title.to_string());
        self.conn.execute(
            "INSERT INTO drafts (id, token, title, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                draft.id,
                draft.token,
                draft.title,
                draft.status.to_string(),
                draft.created_at.to_rfc3339(),
                draft.updated_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(draft = %draft.id, "draft created");
        Ok(draft)
    }

    /// Get a draft by id or token.
    pub fn get_draft(&self, id_or_token: &str) -> Result<Draft> {
        self.find_draft(id_or_token)?
            .ok_or_else(|| Error::NotFound(format!("draft {}", id_or_token)))
    }

    fn find_draft(&self, id_or_token: &str) -> Result<Option<Draft>> {
        let row: Option<DraftRow> = self
            .conn
            .query_row(
                "SELECT id, token, title, status, created_at, updated_at
                 FROM drafts WHERE id = ?1 OR token = ?1",
                [id_or_token],
                draft_row,
            )
            .optional()?;
        row.map(draft_from_row).transpose()
    }

    /// List drafts, newest first, optionally filtered by status.
    pub fn list_drafts(&self, status: Option<DraftStatus>) -> Result<Vec<Draft>> {
        let mut sql = String::from(
            "SELECT id, token, title, status, created_at, updated_at FROM drafts",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = status {
            sql.push_str(" WHERE status = ?1");
            args.push(status.to_string());
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows: Vec<DraftRow> = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), draft_row)?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(draft_from_row).collect()
    }

    /// Move a draft to a new lifecycle status.
    pub fn set_draft_status(&mut self, draft_id: &str, status: DraftStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE drafts SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![draft_id, status.to_string(), Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("draft {}", draft_id)));
        }
        Ok(())
    }

    // === Draft Change Operations ===

    /// Insert or amend the single change for a draft/entity pair.
    pub fn upsert_draft_change(&mut self, change: &DraftChange) -> Result<()> {
        let patch = change.patch.as_ref().map(serde_json::to_string).transpose()?;
        let replacement = change
            .replacement_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = change.updated_at.to_rfc3339();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO draft_changes
                (draft_id, entity_type, entity_key, change_type, patch, replacement_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (draft_id, entity_type, entity_key) DO UPDATE SET
                change_type = excluded.change_type,
                patch = excluded.patch,
                replacement_json = excluded.replacement_json,
                updated_at = excluded.updated_at",
            params![
                change.draft_id,
                change.entity_type.as_str(),
                change.entity_key,
                change.change_type.to_string(),
                patch,
                replacement,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE drafts SET updated_at = ?2 WHERE id = ?1",
            params![change.draft_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a change. Returns whether one existed.
    pub fn delete_draft_change(
        &mut self,
        draft_id: &str,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM draft_changes WHERE draft_id = ?1 AND entity_type = ?2 AND entity_key = ?3",
            params![draft_id, entity_type.as_str(), entity_key],
        )?;
        Ok(deleted > 0)
    }

    /// Remove every change of a draft.
    pub fn clear_draft_changes(&mut self, draft_id: &str) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM draft_changes WHERE draft_id = ?1", [draft_id])?)
    }

    fn query_changes(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<DraftChange>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<ChangeRow> = stmt
            .query_map(args, |row| {
                Ok(ChangeRow {
                    draft_id: row.get(0)?,
                    entity_type: row.get(1)?,
                    entity_key: row.get(2)?,
                    change_type: row.get(3)?,
                    patch: row.get(4)?,
                    replacement_json: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    // === Config Operations ===

    /// Get a configuration value.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Set a configuration value.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// List all configuration values.
    pub fn list_configs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM config ORDER BY key")?;
        let configs: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(configs)
    }
}

impl EntityStore for Storage {
    fn get_entity(&self, entity_type: EntityType, entity_key: &str) -> Result<Option<Entity>> {
        let mut found = self.query_entities(
            "SELECT entity_type, entity_key, canonical_json, synced_at FROM entities
             WHERE entity_type = ?1 AND entity_key = ?2",
            params![entity_type.as_str(), entity_key],
        )?;
        Ok(found.pop())
    }

    fn list_entities_by_type(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        self.query_entities(
            "SELECT entity_type, entity_key, canonical_json, synced_at FROM entities
             WHERE entity_type = ?1 ORDER BY entity_key",
            params![entity_type.as_str()],
        )
    }

    fn list_resources_by_category(&self, category_key: &str) -> Result<Vec<Entity>> {
        self.query_entities(
            "SELECT entity_type, entity_key, canonical_json, synced_at FROM entities
             WHERE entity_type = 'resource' AND category_key = ?1 ORDER BY entity_key",
            params![category_key],
        )
    }

    fn get_category_members(&self, category_key: &str) -> Result<CategoryMembers> {
        let mut stmt = self.conn.prepare(
            "SELECT member_type, member_key FROM category_members
             WHERE category_key = ?1 ORDER BY position",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map([category_key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        let mut members = CategoryMembers::default();
        for (member_type, member_key) in rows {
            match member_type.as_str() {
                "property" => members.properties.push(member_key),
                "subobject" => members.subobjects.push(member_key),
                _ => {}
            }
        }
        Ok(members)
    }
}

impl DraftStore for Storage {
    fn get_draft_change(
        &self,
        draft_id: &str,
        entity_type: EntityType,
        entity_key: &str,
    ) -> Result<Option<DraftChange>> {
        let mut found = self.query_changes(
            "SELECT draft_id, entity_type, entity_key, change_type, patch, replacement_json, updated_at
             FROM draft_changes WHERE draft_id = ?1 AND entity_type = ?2 AND entity_key = ?3",
            params![draft_id, entity_type.as_str(), entity_key],
        )?;
        Ok(found.pop())
    }

    fn list_draft_changes(&self, draft_id: &str) -> Result<Vec<DraftChange>> {
        self.query_changes(
            "SELECT draft_id, entity_type, entity_key, change_type, patch, replacement_json, updated_at
             FROM draft_changes WHERE draft_id = ?1 ORDER BY entity_type, entity_key",
            params![draft_id],
        )
    }
}

/// Write an entity row and its structural index rows.
fn write_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    let entity_type = entity.entity_type.as_str();
    let label = entity.canonical_json.get("label").and_then(Value::as_str);

    conn.execute(
        "INSERT OR REPLACE INTO entities
            (entity_type, entity_key, canonical_json, label, category_key, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entity_type,
            entity.entity_key,
            serde_json::to_string(&entity.canonical_json)?,
            label,
            entity.category_key,
            entity.synced_at.to_rfc3339(),
        ],
    )?;

    if entity.entity_type != EntityType::Category {
        return Ok(());
    }

    conn.execute(
        "DELETE FROM category_parents WHERE category_key = ?1",
        [&entity.entity_key],
    )?;
    conn.execute(
        "DELETE FROM category_members WHERE category_key = ?1",
        [&entity.entity_key],
    )?;
    for parent in &entity.parent_keys {
        conn.execute(
            "INSERT OR IGNORE INTO category_parents (category_key, parent_key) VALUES (?1, ?2)",
            params![entity.entity_key, parent],
        )?;
    }

    let view = CategoryView::from_json(&entity.canonical_json);
    let members = view
        .properties
        .iter()
        .map(|p| ("property", p))
        .chain(view.subobjects.iter().map(|s| ("subobject", s)));
    for (position, (member_type, member_key)) in members.enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO category_members
                (category_key, member_type, member_key, position)
             VALUES (?1, ?2, ?3, ?4)",
            params![entity.entity_key, member_type, member_key, position as i64],
        )?;
    }
    Ok(())
}

type DraftRow = (String, String, String, String, String, String);

fn draft_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DraftRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn draft_from_row(row: DraftRow) -> Result<Draft> {
    let (id, token, title, status, created_at, updated_at) = row;
    Ok(Draft {
        id,
        token,
        title,
        status: status.parse().map_err(Error::Other)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

struct ChangeRow {
    draft_id: String,
    entity_type: String,
    entity_key: String,
    change_type: String,
    patch: Option<String>,
    replacement_json: Option<String>,
    updated_at: String,
}

impl ChangeRow {
    fn into_change(self) -> Result<DraftChange> {
        let change_type: ChangeType = self.change_type.parse().map_err(Error::Other)?;
        Ok(DraftChange {
            draft_id: self.draft_id,
            entity_type: self.entity_type.parse().map_err(Error::Other)?,
            entity_key: self.entity_key,
            change_type,
            patch: self.patch.as_deref().map(serde_json::from_str).transpose()?,
            replacement_json: self
                .replacement_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Canonical entities read from an ontology repository checkout.
#[derive(Debug, Default)]
pub struct LoadedOntology {
    pub entities: Vec<Entity>,
    /// Files that could not be read, as `path: reason`
    pub skipped: Vec<String>,
}

/// Read every entity document below `source`.
///
/// Each entity type has its own directory (`categories/`, `properties/`, ...)
/// holding `*.json` files, possibly nested. The key is the document's `id`
/// field or, failing that, the file stem.
pub fn load_ontology_dir(source: &Path) -> Result<LoadedOntology> {
    if !source.is_dir() {
        return Err(Error::NotFound(format!(
            "ontology directory {}",
            source.display()
        )));
    }

    let synced_at = Utc::now();
    let mut loaded = LoadedOntology::default();

    for entity_type in EntityType::all() {
        let dir = source.join(entity_type.dir_name());
        if !dir.is_dir() {
            continue;
        }

        let mut files = Vec::new();
        collect_json_files(&dir, &mut files)?;
        files.sort();

        let mut by_key: BTreeMap<String, Entity> = BTreeMap::new();
        for path in files {
            let doc: Value = match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|text| Ok(serde_json::from_str::<Value>(&text)?))
            {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable entity file: {}", e);
                    loaded.skipped.push(format!("{}: {}", path.display(), e));
                    continue;
                }
            };

            let key = doc
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    path.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                });
            let Some(key) = key else {
                loaded.skipped.push(format!("{}: no entity key", path.display()));
                continue;
            };

            if by_key.contains_key(&key) {
                tracing::warn!(
                    entity_type = %entity_type,
                    key = %key,
                    path = %path.display(),
                    "duplicate entity key; later file wins"
                );
            }
            by_key.insert(
                key.clone(),
                Entity::with_synced_at(*entity_type, key, doc, synced_at),
            );
        }
        loaded.entities.extend(by_key.into_values());
    }

    Ok(loaded)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Get the storage directory for a repository.
///
/// Uses a hash of the repository path to create a unique directory under
/// `$OH_DATA_DIR` if set, else `~/.local/share/ontohub/`.
pub fn get_storage_dir(repo_path: &Path) -> Result<PathBuf> {
    let base = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?
            .join("ontohub"),
    };
    storage_dir_in(&base, repo_path)
}

fn storage_dir_in(base: &Path, repo_path: &Path) -> Result<PathBuf> {
    let repo_canonical = repo_path
        .canonicalize()
        .map_err(|e| Error::Other(format!("Could not canonicalize repo path: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(repo_canonical.to_string_lossy().as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());

    Ok(base.join(&hash_hex[..12]))
}

/// Generate a short unique ID.
///
/// Format: `<prefix>-<4 hex chars>` (drafts use "dr")
pub fn generate_id(prefix: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    let hash_hex = format!("{:x}", hasher.finalize());
    format!("{}-{}", prefix, &hash_hex[..4])
}
