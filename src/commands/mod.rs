//! Command implementations for the ontohub CLI.
//!
//! Every command opens storage for the repository path, does its work through
//! the library, and returns a result implementing [`Output`]. Commands are
//! grouped by area:
//! - `system` / `sync` - storage setup and canonical ingestion (this module)
//! - `entity` - effective entity queries (this module)
//! - [`draft`] - draft lifecycle and staging
//! - [`graph`] - module derivation and graph queries
//! - `config` / `log` - settings and the action log (this module)

pub mod draft;
pub mod graph;

pub use draft::*;
pub use graph::*;

use crate::action_log::{self, ActionRecord};
use crate::config::{
    CONFIG_KEYS, ConfigOverrides, OntohubConfig, resolve_config, system_config_path,
};
use crate::models::{ChangeStatus, DraftStatus, EffectiveEntity, EntityType};
use crate::overlay::{EffectiveState, EffectiveStateProvider, InheritedMembers};
use crate::query;
use crate::storage::{Storage, load_ontology_dir};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Compact JSON for any serializable result.
pub(crate) fn json_string<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Open storage, failing with `NotInitialized` before `oh system init`.
pub(crate) fn open_storage(repo_path: &Path) -> Result<Storage> {
    Storage::open(repo_path)
}

/// Resolve an optional draft id or token to the draft's id.
pub(crate) fn resolve_draft_id(storage: &Storage, draft: Option<&str>) -> Result<Option<String>> {
    draft
        .map(|d| storage.get_draft(d).map(|draft| draft.id))
        .transpose()
}

pub(crate) fn status_marker(status: ChangeStatus) -> &'static str {
    match status {
        ChangeStatus::Added => "+",
        ChangeStatus::Modified => "~",
        ChangeStatus::Deleted => "-",
        ChangeStatus::Unchanged => " ",
    }
}

// === System Commands ===

/// Result of `oh system init`.
#[derive(Serialize)]
pub struct InitResult {
    pub initialized: bool,
    pub storage_path: String,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.initialized {
            format!("Initialized ontohub storage at {}", self.storage_path)
        } else {
            format!("Already initialized at {}", self.storage_path)
        }
    }
}

/// Create storage for the repository. Idempotent.
pub fn system_init(repo_path: &Path) -> Result<InitResult> {
    let already = Storage::exists(repo_path)?;
    let storage = Storage::init(repo_path)?;
    Ok(InitResult {
        initialized: !already,
        storage_path: storage.root().display().to_string(),
    })
}

/// Build-time information injected by build.rs.
#[derive(Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_commit: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build_timestamp: env!("OH_BUILD_TIMESTAMP"),
            git_commit: env!("OH_GIT_COMMIT"),
        }
    }
}

/// Result of `oh system status`.
#[derive(Serialize)]
pub struct StatusResult {
    pub storage_path: String,
    pub entities: BTreeMap<String, usize>,
    pub total_entities: usize,
    pub open_drafts: usize,
    pub build: BuildInfo,
}

impl Output for StatusResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!(
                "ontohub {} ({}, built {})",
                self.build.version, self.build.git_commit, self.build.build_timestamp
            ),
            format!("Storage: {}", self.storage_path),
            format!("Entities: {}", self.total_entities),
        ];
        for (entity_type, count) in &self.entities {
            lines.push(format!("  {:<10} {}", entity_type, count));
        }
        lines.push(format!("Open drafts: {}", self.open_drafts));
        lines.join("\n")
    }
}

pub fn system_status(repo_path: &Path) -> Result<StatusResult> {
    let storage = open_storage(repo_path)?;
    let entities: BTreeMap<String, usize> = storage
        .count_entities()?
        .into_iter()
        .map(|(entity_type, count)| (entity_type.to_string(), count))
        .collect();
    Ok(StatusResult {
        storage_path: storage.root().display().to_string(),
        total_entities: entities.values().sum(),
        entities,
        open_drafts: storage.list_drafts(Some(DraftStatus::Open))?.len(),
        build: BuildInfo::current(),
    })
}

/// Result of `oh sync`.
#[derive(Serialize)]
pub struct SyncResult {
    pub source: String,
    pub synced: usize,
    pub entities: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl Output for SyncResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Synced {} entities from {}", self.synced, self.source)];
        for (entity_type, count) in self.entities.iter().filter(|(_, n)| **n > 0) {
            lines.push(format!("  {:<10} {}", entity_type, count));
        }
        if !self.skipped.is_empty() {
            lines.push(format!("Skipped {} file(s):", self.skipped.len()));
            lines.extend(self.skipped.iter().map(|s| format!("  {}", s)));
        }
        lines.join("\n")
    }
}

/// Replace canonical state with the ontology checkout at `source`
/// (the repository itself when not given).
pub fn sync(repo_path: &Path, source: Option<PathBuf>) -> Result<SyncResult> {
    let mut storage = open_storage(repo_path)?;
    let source = source.unwrap_or_else(|| repo_path.to_path_buf());
    let loaded = load_ontology_dir(&source)?;

    let mut entities: BTreeMap<String, usize> = EntityType::all()
        .iter()
        .map(|t| (t.to_string(), 0))
        .collect();
    for entity in &loaded.entities {
        *entities.entry(entity.entity_type.to_string()).or_default() += 1;
    }

    let synced = storage.replace_canonical(&loaded.entities)?;
    tracing::info!(source = %source.display(), synced, "canonical state synced");
    Ok(SyncResult {
        source: source.display().to_string(),
        synced,
        entities,
        skipped: loaded.skipped,
    })
}

// === Entity Commands ===

/// Result of `oh entity show`.
#[derive(Serialize)]
pub struct EntityShown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(flatten)]
    pub entity: EffectiveEntity,
}

impl Output for EntityShown {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let entity = &self.entity;
        let mut lines = vec![format!(
            "{} {} [{}]",
            status_marker(entity.change_status),
            entity.entity_ref(),
            entity.change_status
        )];
        if let Some(label) = entity.label() {
            lines.push(format!("Label: {}", label));
        }
        if let Some(error) = &entity.patch_error {
            lines.push(format!("Patch error: {}", error));
        }
        if let Some(anomaly) = entity.anomaly {
            lines.push(format!("Anomaly: {}", json_string(&anomaly).trim_matches('"')));
        }
        lines.push(
            serde_json::to_string_pretty(&entity.effective_json).unwrap_or_default(),
        );
        lines.join("\n")
    }
}

pub fn entity_show(
    repo_path: &Path,
    draft: Option<&str>,
    entity_type: EntityType,
    entity_key: &str,
) -> Result<EntityShown> {
    let storage = open_storage(repo_path)?;
    let draft_id = resolve_draft_id(&storage, draft)?;
    let entity = query::get_effective_entity(&storage, draft_id.as_deref(), entity_type, entity_key)?;
    Ok(EntityShown { draft_id, entity })
}

/// One row of `oh entity list`.
#[derive(Serialize)]
pub struct EntitySummary {
    pub entity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub change_status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_error: Option<String>,
}

/// Result of `oh entity list`.
#[derive(Serialize)]
pub struct EntityList {
    pub entity_type: EntityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    pub entities: Vec<EntitySummary>,
    pub count: usize,
}

impl Output for EntityList {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.entities.is_empty() {
            return format!("No {} entities.", self.entity_type);
        }
        let mut lines = vec![format!("{} {} entities:", self.count, self.entity_type)];
        for entity in &self.entities {
            let mut line = format!("{} {}", status_marker(entity.change_status), entity.entity_key);
            if let Some(label) = &entity.label {
                if label != &entity.entity_key {
                    line.push_str(&format!(" ({})", label));
                }
            }
            if entity.patch_error.is_some() {
                line.push_str(" [patch error]");
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

pub fn entity_list(
    repo_path: &Path,
    draft: Option<&str>,
    entity_type: EntityType,
) -> Result<EntityList> {
    let storage = open_storage(repo_path)?;
    let draft_id = resolve_draft_id(&storage, draft)?;
    let entities: Vec<EntitySummary> =
        query::list_effective_entities(&storage, draft_id.as_deref(), entity_type)?
            .into_iter()
            .map(|e| EntitySummary {
                label: e.label().map(str::to_string),
                entity_key: e.entity_key,
                change_status: e.change_status,
                patch_error: e.patch_error,
            })
            .collect();
    Ok(EntityList {
        entity_type,
        draft_id,
        count: entities.len(),
        entities,
    })
}

/// Result of `oh entity members`.
#[derive(Serialize)]
pub struct MembersResult {
    pub inherited: bool,
    #[serde(flatten)]
    pub members: InheritedMembers,
}

impl Output for MembersResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let members = &self.members;
        let mut lines = vec![format!("Category {}", members.category)];
        if self.inherited && !members.ancestors.is_empty() {
            lines.push(format!("Ancestors: {}", members.ancestors.join(", ")));
        }
        for (title, set) in [("Properties", &members.properties), ("Subobjects", &members.subobjects)] {
            lines.push(format!("{} ({}):", title, set.len()));
            for (key, from) in set {
                if from == &members.category {
                    lines.push(format!("  {}", key));
                } else {
                    lines.push(format!("  {} (from {})", key, from));
                }
            }
        }
        lines.join("\n")
    }
}

/// Member properties and subobjects of a category, optionally with those
/// inherited from its ancestors.
pub fn entity_members(
    repo_path: &Path,
    draft: Option<&str>,
    category_key: &str,
    inherited: bool,
) -> Result<MembersResult> {
    let storage = open_storage(repo_path)?;
    let draft_id = resolve_draft_id(&storage, draft)?;
    let state = EffectiveState::new(&storage, draft_id.as_deref())?;

    let members = if inherited {
        state.inherited_members(category_key)?
    } else {
        if state.get_effective_json(EntityType::Category, category_key)?.is_none() {
            return Err(Error::NotFound(format!("category:{}", category_key)));
        }
        let direct = state.category_members(category_key)?;
        let own = |keys: Vec<String>| {
            keys.into_iter()
                .map(|k| (k, category_key.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        InheritedMembers {
            category: category_key.to_string(),
            ancestors: Vec::new(),
            properties: own(direct.properties),
            subobjects: own(direct.subobjects),
        }
    };
    Ok(MembersResult { inherited, members })
}

// === Config Commands ===

/// Where a `config set` value was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    /// `config` table in the repository database
    Store,
    /// Session config.kdl
    Session,
    /// System config.kdl
    System,
}

/// Result of `oh config get`.
#[derive(Serialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Output for ConfigValue {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        match (&self.value, &self.source) {
            (Some(value), Some(source)) => format!("{} = {} ({})", self.key, value, source),
            (Some(value), None) => format!("{} = {}", self.key, value),
            (None, _) => format!("{} is not set", self.key),
        }
    }
}

/// Result of `oh config set`.
#[derive(Serialize)]
pub struct ConfigSet {
    pub key: String,
    pub value: String,
    pub scope: ConfigScope,
}

impl Output for ConfigSet {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {}", self.key, self.value)
    }
}

/// Result of `oh config list`.
#[derive(Serialize)]
pub struct ConfigList {
    pub configs: BTreeMap<String, String>,
}

impl Output for ConfigList {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.configs.is_empty() {
            return "No configuration values set.".to_string();
        }
        self.configs
            .iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One resolved setting in `oh config show`.
#[derive(Serialize)]
pub struct ResolvedSetting {
    pub key: String,
    pub value: String,
    pub source: String,
}

/// Result of `oh config show`.
#[derive(Serialize)]
pub struct ConfigShow {
    pub settings: Vec<ResolvedSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_path: Option<String>,
    pub session_path: String,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines: Vec<String> = self
            .settings
            .iter()
            .map(|s| format!("{:<24} {:<8} ({})", s.key, s.value, s.source))
            .collect();
        if let Some(path) = &self.system_path {
            lines.push(format!("System config:  {}", path));
        }
        lines.push(format!("Session config: {}", self.session_path));
        lines.join("\n")
    }
}

/// Read a setting. KDL preference keys report their resolved value;
/// anything else is read from the store's config table.
pub fn config_get(repo_path: &Path, key: &str) -> Result<ConfigValue> {
    let storage = open_storage(repo_path)?;
    if CONFIG_KEYS.contains(&key) {
        let resolved = resolve_config(&storage, &ConfigOverrides::default())?;
        let (value, source) = resolved
            .entries()
            .into_iter()
            .find(|(k, _, _)| *k == key)
            .map(|(_, value, source)| (value, source))
            .ok_or_else(|| Error::InvalidInput(format!("Unknown config key: {}", key)))?;
        return Ok(ConfigValue {
            key: key.to_string(),
            value: Some(value),
            source: Some(source),
        });
    }
    Ok(ConfigValue {
        key: key.to_string(),
        value: storage.get_config(key)?,
        source: None,
    })
}

/// Write a setting. KDL preference keys go to the session config.kdl
/// (or the system one with `system`); other keys go to the config table.
pub fn config_set(repo_path: &Path, key: &str, value: &str, system: bool) -> Result<ConfigSet> {
    let mut storage = open_storage(repo_path)?;

    if !CONFIG_KEYS.contains(&key) {
        if system {
            return Err(Error::InvalidInput(format!(
                "{} is a store setting; --system applies only to {}",
                key,
                CONFIG_KEYS.join(", ")
            )));
        }
        storage.set_config(key, value)?;
        return Ok(ConfigSet {
            key: key.to_string(),
            value: value.to_string(),
            scope: ConfigScope::Store,
        });
    }

    let (path, scope) = if system {
        let path = system_config_path().ok_or_else(|| {
            Error::Other("Could not determine system config directory".to_string())
        })?;
        (path, ConfigScope::System)
    } else {
        (storage.session_config_path(), ConfigScope::Session)
    };

    let mut config = OntohubConfig::load(&path)?;
    config.set(key, value)?;
    config.save(&path)?;
    Ok(ConfigSet {
        key: key.to_string(),
        value: value.to_string(),
        scope,
    })
}

pub fn config_list(repo_path: &Path) -> Result<ConfigList> {
    let storage = open_storage(repo_path)?;
    Ok(ConfigList {
        configs: storage.list_configs()?.into_iter().collect(),
    })
}

/// Every preference with its resolved value and where it came from.
pub fn config_show(repo_path: &Path, overrides: &ConfigOverrides) -> Result<ConfigShow> {
    let storage = open_storage(repo_path)?;
    let resolved = resolve_config(&storage, overrides)?;
    Ok(ConfigShow {
        settings: resolved
            .entries()
            .into_iter()
            .map(|(key, value, source)| ResolvedSetting {
                key: key.to_string(),
                value,
                source,
            })
            .collect(),
        system_path: system_config_path().map(|p| p.display().to_string()),
        session_path: storage.session_config_path().display().to_string(),
    })
}

// === Action Log ===

/// Result of `oh log`.
#[derive(Serialize)]
pub struct LogEntries {
    pub path: String,
    pub entries: Vec<ActionRecord>,
}

impl Output for LogEntries {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No logged actions.".to_string();
        }
        self.entries
            .iter()
            .map(|e| {
                let mut line = format!(
                    "{} {} {} ({} ms)",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    if e.success { "ok  " } else { "FAIL" },
                    e.command,
                    e.duration_ms
                );
                if let Some(draft) = &e.draft {
                    line.push_str(&format!(" [{}]", draft));
                }
                if let Some(error) = &e.error {
                    line.push_str(&format!(": {}", error));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The most recent `limit` action log entries, oldest first.
pub fn log_show(repo_path: &Path, limit: usize) -> Result<LogEntries> {
    let storage = open_storage(repo_path)?;
    Ok(LogEntries {
        path: action_log::log_path(&storage).display().to_string(),
        entries: action_log::read_recent(&storage, limit)?,
    })
}
