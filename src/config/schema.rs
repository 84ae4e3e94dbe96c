//! KDL schema for config.kdl.
//!
//! ```kdl
//! // ontohub preferences
//! output-format "human"   // or "json"
//! max-depth 10            // derivation rounds, 1-64
//! max-visited-categories 10000
//! graph-depth 2           // neighborhood radius, 1-5
//! ```
//!
//! Unknown nodes are ignored. Values with the wrong type or out of range are
//! dropped on read and rejected by [`OntohubConfig::validate`] on write.

use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Allowed range for `max-depth`.
pub const MAX_DEPTH_RANGE: std::ops::RangeInclusive<usize> = 1..=64;

/// Allowed range for `graph-depth`.
pub const GRAPH_DEPTH_RANGE: std::ops::RangeInclusive<usize> = 1..=crate::query::MAX_GRAPH_DEPTH;

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User preferences stored in config.kdl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntohubConfig {
    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,

    /// Module derivation round limit
    pub max_depth: Option<usize>,

    /// Module derivation visited-category limit
    pub max_visited_categories: Option<usize>,

    /// Default neighborhood radius for graph queries
    pub graph_depth: Option<usize>,
}

fn first_string<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a str> {
    doc.get(name)?.entries().first()?.value().as_string()
}

fn first_usize(doc: &KdlDocument, name: &str) -> Option<usize> {
    let value = doc.get(name)?.entries().first()?.value().as_integer()?;
    usize::try_from(value).ok()
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}

impl OntohubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(depth) = self.max_depth {
            if !MAX_DEPTH_RANGE.contains(&depth) {
                return Err(format!("max-depth must be 1-64, got {}", depth));
            }
        }
        if self.max_visited_categories == Some(0) {
            return Err("max-visited-categories must be at least 1".to_string());
        }
        if let Some(depth) = self.graph_depth {
            if !GRAPH_DEPTH_RANGE.contains(&depth) {
                return Err(format!(
                    "graph-depth must be 1-{}, got {}",
                    GRAPH_DEPTH_RANGE.end(),
                    depth
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            output_format: first_string(doc, "output-format").and_then(OutputFormat::parse),
            max_depth: first_usize(doc, "max-depth").filter(|d| MAX_DEPTH_RANGE.contains(d)),
            max_visited_categories: first_usize(doc, "max-visited-categories").filter(|n| *n > 0),
            graph_depth: first_usize(doc, "graph-depth").filter(|d| GRAPH_DEPTH_RANGE.contains(d)),
        }
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(format) = self.output_format {
            push_node(&mut doc, "output-format", KdlValue::String(format.as_str().to_string()));
        }
        if let Some(depth) = self.max_depth {
            push_node(&mut doc, "max-depth", KdlValue::Integer(depth as i128));
        }
        if let Some(n) = self.max_visited_categories {
            push_node(&mut doc, "max-visited-categories", KdlValue::Integer(n as i128));
        }
        if let Some(depth) = self.graph_depth {
            push_node(&mut doc, "graph-depth", KdlValue::Integer(depth as i128));
        }
        doc.autoformat();
        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &OntohubConfig) {
        if other.output_format.is_some() {
            self.output_format = other.output_format;
        }
        if other.max_depth.is_some() {
            self.max_depth = other.max_depth;
        }
        if other.max_visited_categories.is_some() {
            self.max_visited_categories = other.max_visited_categories;
        }
        if other.graph_depth.is_some() {
            self.graph_depth = other.graph_depth;
        }
    }

    /// Set one value by its KDL node name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let number = || {
            value
                .parse::<usize>()
                .map_err(|_| Error::InvalidInput(format!("{} expects a number, got '{}'", key, value)))
        };
        match key {
            "output-format" => {
                self.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                    Error::InvalidInput(format!("output-format must be json or human, got '{}'", value))
                })?)
            }
            "max-depth" => self.max_depth = Some(number()?),
            "max-visited-categories" => self.max_visited_categories = Some(number()?),
            "graph-depth" => self.graph_depth = Some(number()?),
            _ => return Err(Error::InvalidInput(format!("Unknown config key: {}", key))),
        }
        self.validate().map_err(Error::InvalidInput)
    }

    /// Read a config file; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse()?;
        Ok(Self::from_kdl(&doc))
    }

    /// Write a config file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate().map_err(Error::InvalidInput)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }
}

/// Config keys accepted by `oh config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "output-format",
    "max-depth",
    "max-visited-categories",
    "graph-depth",
];
