//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment (`OH_MAX_DEPTH`)
//! 3. Session config.kdl (`~/.local/share/ontohub/<repo-hash>/config.kdl`)
//! 4. System config.kdl (`~/.config/ontohub/config.kdl`)
//! 5. Built-in defaults

use crate::Result;
use crate::config::schema::MAX_DEPTH_RANGE;
use crate::config::{OntohubConfig, OutputFormat, system_config_path};
use crate::derivation::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_VISITED_CATEGORIES, DerivationOptions};
use crate::storage::Storage;

/// Environment variable overriding the derivation round limit.
pub const MAX_DEPTH_ENV: &str = "OH_MAX_DEPTH";

/// Default neighborhood radius.
pub const DEFAULT_GRAPH_DEPTH: usize = 2;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from session-level config
    Session,
    /// Value from system-level config
    System,
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Session => write!(f, "session"),
            ValueSource::System => write!(f, "system"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub output_format: Resolved<OutputFormat>,
    pub max_depth: Resolved<usize>,
    pub max_visited_categories: Resolved<usize>,
    pub graph_depth: Resolved<usize>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
            max_depth: Resolved::new(DEFAULT_MAX_DEPTH, ValueSource::Default),
            max_visited_categories: Resolved::new(
                DEFAULT_MAX_VISITED_CATEGORIES,
                ValueSource::Default,
            ),
            graph_depth: Resolved::new(DEFAULT_GRAPH_DEPTH, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    /// Derivation bounds from the resolved limits.
    pub fn derivation_options(&self) -> DerivationOptions {
        DerivationOptions {
            max_depth: self.max_depth.value,
            max_visited_categories: self.max_visited_categories.value,
            track_provenance: false,
        }
    }

    /// `(key, value, source)` rows for display.
    pub fn entries(&self) -> Vec<(&'static str, String, String)> {
        vec![
            (
                "output-format",
                self.output_format.value.to_string(),
                self.output_format.source.to_string(),
            ),
            (
                "max-depth",
                self.max_depth.value.to_string(),
                self.max_depth.source.to_string(),
            ),
            (
                "max-visited-categories",
                self.max_visited_categories.value.to_string(),
                self.max_visited_categories.source.to_string(),
            ),
            (
                "graph-depth",
                self.graph_depth.value.to_string(),
                self.graph_depth.source.to_string(),
            ),
        ]
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub max_depth: Option<usize>,
    pub graph_depth: Option<usize>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_graph_depth(mut self, depth: usize) -> Self {
        self.graph_depth = Some(depth);
        self
    }
}

/// First of `cli`, `session`, `system` that is set, else `default`.
fn layered<T: Clone>(cli: Option<T>, session: Option<T>, system: Option<T>, default: T) -> Resolved<T> {
    if let Some(v) = cli {
        Resolved::new(v, ValueSource::CliFlag)
    } else if let Some(v) = session {
        Resolved::new(v, ValueSource::Session)
    } else if let Some(v) = system {
        Resolved::new(v, ValueSource::System)
    } else {
        Resolved::new(default, ValueSource::Default)
    }
}

fn env_max_depth() -> Option<usize> {
    let raw = std::env::var(MAX_DEPTH_ENV).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(depth) if MAX_DEPTH_RANGE.contains(&depth) => Some(depth),
        _ => {
            tracing::warn!(value = %raw, "ignoring invalid {}", MAX_DEPTH_ENV);
            None
        }
    }
}

/// Resolve from already-loaded layers.
pub fn resolve_layers(
    system: &OntohubConfig,
    session: &OntohubConfig,
    env_max_depth: Option<usize>,
    overrides: &ConfigOverrides,
) -> ResolvedConfig {
    let mut max_depth = layered(
        overrides.max_depth,
        session.max_depth,
        system.max_depth,
        DEFAULT_MAX_DEPTH,
    );
    if overrides.max_depth.is_none() {
        if let Some(depth) = env_max_depth {
            max_depth = Resolved::new(depth, ValueSource::EnvVar(MAX_DEPTH_ENV.to_string()));
        }
    }

    ResolvedConfig {
        output_format: layered(
            overrides.output_format,
            session.output_format,
            system.output_format,
            OutputFormat::Json,
        ),
        max_depth,
        max_visited_categories: layered(
            None,
            session.max_visited_categories,
            system.max_visited_categories,
            DEFAULT_MAX_VISITED_CATEGORIES,
        ),
        graph_depth: layered(
            overrides.graph_depth,
            session.graph_depth,
            system.graph_depth,
            DEFAULT_GRAPH_DEPTH,
        ),
    }
}

/// Resolve configuration with the full precedence chain.
pub fn resolve_config(storage: &Storage, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = match system_config_path() {
        Some(path) => OntohubConfig::load(&path)?,
        None => OntohubConfig::new(),
    };
    let session = OntohubConfig::load(&storage.session_config_path())?;
    Ok(resolve_layers(&system, &session, env_max_depth(), overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_DIR_ENV;
    use crate::test_utils::TestEnv;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_value_source_display() {
        assert_eq!(
            format!("{}", ValueSource::EnvVar("FOO".to_string())),
            "env:FOO"
        );
        assert_eq!(format!("{}", ValueSource::Session), "session");
        assert_eq!(format!("{}", ValueSource::System), "system");
        assert_eq!(format!("{}", ValueSource::CliFlag), "cli");
        assert_eq!(format!("{}", ValueSource::Default), "default");
    }

    #[test]
    fn test_resolve_defaults() {
        let config = resolve_layers(
            &OntohubConfig::new(),
            &OntohubConfig::new(),
            None,
            &ConfigOverrides::default(),
        );
        assert_eq!(config.output_format(), OutputFormat::Json);
        assert_eq!(config.max_depth.value, DEFAULT_MAX_DEPTH);
        assert_eq!(config.max_depth.source, ValueSource::Default);
        assert_eq!(config.graph_depth.value, DEFAULT_GRAPH_DEPTH);
        assert_eq!(config.derivation_options(), DerivationOptions::default());
    }

    #[test]
    fn test_session_overrides_system() {
        let system = OntohubConfig {
            output_format: Some(OutputFormat::Human),
            max_depth: Some(4),
            ..Default::default()
        };
        let session = OntohubConfig {
            max_depth: Some(6),
            ..Default::default()
        };
        let config = resolve_layers(&system, &session, None, &ConfigOverrides::default());
        assert_eq!(config.max_depth.value, 6);
        assert_eq!(config.max_depth.source, ValueSource::Session);
        assert_eq!(config.output_format(), OutputFormat::Human);
        assert_eq!(config.output_format.source, ValueSource::System);
    }

    #[test]
    fn test_env_sits_between_cli_and_session() {
        let session = OntohubConfig {
            max_depth: Some(6),
            ..Default::default()
        };
        let config = resolve_layers(&OntohubConfig::new(), &session, Some(3), &ConfigOverrides::default());
        assert_eq!(config.max_depth.value, 3);
        assert_eq!(
            config.max_depth.source,
            ValueSource::EnvVar(MAX_DEPTH_ENV.to_string())
        );

        let overrides = ConfigOverrides::new().with_max_depth(20);
        let config = resolve_layers(&OntohubConfig::new(), &session, Some(3), &overrides);
        assert_eq!(config.max_depth.value, 20);
        assert_eq!(config.max_depth.source, ValueSource::CliFlag);
    }

    #[test]
    #[serial]
    fn test_resolve_config_reads_files_and_env() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let system_dir = TempDir::new().unwrap();

        // SAFETY: serialized test; no other thread reads these variables.
        unsafe {
            std::env::set_var(CONFIG_DIR_ENV, system_dir.path());
            std::env::set_var(MAX_DEPTH_ENV, "7");
        }

        OntohubConfig {
            graph_depth: Some(4),
            max_visited_categories: Some(50),
            ..Default::default()
        }
        .save(&system_dir.path().join("config.kdl"))
        .unwrap();
        OntohubConfig {
            graph_depth: Some(3),
            ..Default::default()
        }
        .save(&storage.session_config_path())
        .unwrap();

        let config = resolve_config(&storage, &ConfigOverrides::default()).unwrap();

        unsafe {
            std::env::remove_var(CONFIG_DIR_ENV);
            std::env::remove_var(MAX_DEPTH_ENV);
        }

        assert_eq!(config.graph_depth.value, 3);
        assert_eq!(config.graph_depth.source, ValueSource::Session);
        assert_eq!(config.max_visited_categories.value, 50);
        assert_eq!(config.max_visited_categories.source, ValueSource::System);
        assert_eq!(config.max_depth.value, 7);
    }

    #[test]
    #[serial]
    fn test_invalid_env_depth_is_ignored() {
        unsafe { std::env::set_var(MAX_DEPTH_ENV, "deep") };
        let depth = env_max_depth();
        unsafe { std::env::remove_var(MAX_DEPTH_ENV) };
        assert!(depth.is_none());
    }
}
