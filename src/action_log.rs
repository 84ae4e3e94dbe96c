//! Audit trail of `oh` invocations.
//!
//! Each command appends one JSON line to `<storage dir>/action.log`. The
//! config-table keys `action_log_path` and `action_log_enabled` move the file
//! or switch recording off. Nothing is recorded before `oh system init`.

use crate::Result;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Config key toggling the action log.
pub const ENABLED_KEY: &str = "action_log_enabled";

/// Config key overriding the action log location.
pub const PATH_KEY: &str = "action_log_path";

const DEFAULT_FILE_NAME: &str = "action.log";

/// Argument names whose values never reach the log.
const SENSITIVE_MARKERS: &[&str] = &["password", "token", "secret"];

/// Longer arrays are logged as a count.
const MAX_LOGGED_ITEMS: usize = 10;

/// Longer strings (usually inline JSON documents or patches) are cut.
const MAX_LOGGED_CHARS: usize = 100;

/// One recorded invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,

    /// `oh` subcommand path, e.g. "draft update"
    pub command: String,

    /// Draft the command addressed, when it took one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,

    /// Arguments after redaction
    pub args: Value,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
    pub user: String,
    pub repo_path: String,
}

/// Record one invocation.
///
/// Recording problems are reported through `tracing` and never fail the command.
pub fn log_action(
    repo_path: &Path,
    command: &str,
    args: Value,
    success: bool,
    error: Option<String>,
    duration_ms: u64,
) {
    let storage = match Storage::open(repo_path) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::debug!(error = %e, "action log skipped");
            return;
        }
    };
    if !recording_enabled(&storage) {
        return;
    }

    let record = ActionRecord {
        timestamp: Utc::now(),
        command: command.to_string(),
        draft: args.get("draft").and_then(Value::as_str).map(str::to_string),
        args: redact_args(&args),
        success,
        error,
        duration_ms,
        user: current_user(),
        repo_path: repo_path.display().to_string(),
    };

    let path = log_path(&storage);
    if let Err(e) = append_record(&path, &record) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write action log");
    }
}

/// The last `limit` records, oldest first. Unreadable lines are skipped.
pub fn read_recent(storage: &Storage, limit: usize) -> Result<Vec<ActionRecord>> {
    let path = log_path(storage);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for line in BufReader::new(fs::File::open(&path)?).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::debug!(error = %e, "skipping unreadable action log line"),
        }
    }

    let skip = records.len().saturating_sub(limit);
    Ok(records.split_off(skip))
}

/// Where records go: `action_log_path` if set, else next to the database.
pub fn log_path(storage: &Storage) -> PathBuf {
    match storage.get_config(PATH_KEY).ok().flatten() {
        Some(configured) => expand_tilde(&configured),
        None => storage.root().join(DEFAULT_FILE_NAME),
    }
}

fn recording_enabled(storage: &Storage) -> bool {
    // An unreadable setting leaves recording on.
    match storage.get_config(ENABLED_KEY) {
        Ok(Some(value)) => is_truthy(&value),
        _ => true,
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn expand_tilde(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn append_record(path: &Path, record: &ActionRecord) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let line = serde_json::to_string(record)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Drop sensitive values and shrink bulky ones.
fn redact_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let lowered = key.to_lowercase();
                    let value = if SENSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
                        Value::String("[REDACTED]".to_string())
                    } else {
                        redact_args(value)
                    };
                    (key.clone(), value)
                })
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) if items.len() > MAX_LOGGED_ITEMS => {
            Value::String(format!("[{} items]", items.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_args).collect()),
        Value::String(text) => {
            let count = text.chars().count();
            if count <= MAX_LOGGED_CHARS {
                return args.clone();
            }
            let head: String = text.chars().take(MAX_LOGGED_CHARS - 3).collect();
            Value::String(format!("{}... ({} chars)", head, count))
        }
        _ => args.clone(),
    }
}

fn current_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "unknown".to_string())
}
