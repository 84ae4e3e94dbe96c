//! Configuration for ontohub.
//!
//! ## config.kdl - User preferences
//!
//! Located at:
//! - System: `~/.config/ontohub/config.kdl` (or `$OH_CONFIG_DIR/config.kdl`)
//! - Session: `~/.local/share/ontohub/<repo-hash>/config.kdl`
//!
//! Contains:
//! - `output-format` - "json" or "human"
//! - `max-depth` - Module derivation round limit (1-64)
//! - `max-visited-categories` - Module derivation category limit
//! - `graph-depth` - Default neighborhood radius (1-5)
//!
//! ## Precedence
//!
//! CLI flag > environment (`OH_MAX_DEPTH`) > session config > system config > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, MAX_DEPTH_ENV, Resolved, ResolvedConfig, ValueSource, resolve_config,
};
pub use schema::{CONFIG_KEYS, OntohubConfig, OutputFormat};

use std::path::PathBuf;

/// Environment variable overriding the system config directory.
pub const CONFIG_DIR_ENV: &str = "OH_CONFIG_DIR";

/// Location of the system-level config.kdl, if one can be determined.
pub fn system_config_path() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir).join("config.kdl")),
        _ => dirs::config_dir().map(|dir| dir.join("ontohub").join("config.kdl")),
    }
}
