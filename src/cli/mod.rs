//! CLI argument definitions for ontohub.

use crate::models::{DraftStatus, EntityType};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ontohub - draft and derive ontology changes before they become pull requests.
///
/// Start with `oh system init` and `oh sync`, then `oh draft create` to stage edits.
#[derive(Parser, Debug)]
#[command(name = "oh")]
#[command(author, version, about = "Draft overlay and module derivation for an ontology repository", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if oh was started in <path> instead of the current directory.
    /// The path must exist. Can also be set via OH_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "OH_REPO")]
    pub repo_path: Option<PathBuf>,

    /// Emit diagnostics on stderr as JSON lines
    #[arg(long = "log-json", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// System administration commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },

    /// Load the ontology repository into canonical storage
    ///
    /// Replaces all canonical entities. Drafts are kept.
    Sync {
        /// Ontology checkout to read (defaults to the repository path)
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Inspect entities as seen through an optional draft
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },

    /// Draft management and staging
    Draft {
        #[command(subcommand)]
        command: DraftCommands,
    },

    /// Module derivation
    Module {
        #[command(subcommand)]
        command: ModuleCommands,
    },

    /// Graph queries over effective state
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show recent entries of the action log
    Log {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

/// System subcommands
#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Initialize ontohub storage for this repository
    Init,

    /// Show storage contents and build information
    Status,
}

/// Entity subcommands
#[derive(Subcommand, Debug)]
pub enum EntityCommands {
    /// Show one entity's effective document
    Show {
        /// Entity type (category, property, subobject, template, module, bundle, dashboard, resource)
        entity_type: EntityType,
        /// Entity key
        key: String,
        /// View through this draft (id or token)
        #[arg(short, long)]
        draft: Option<String>,
    },

    /// List entities of a type
    List {
        /// Entity type
        entity_type: EntityType,
        /// View through this draft (id or token)
        #[arg(short, long)]
        draft: Option<String>,
    },

    /// Show the member properties and subobjects of a category
    Members {
        /// Category key
        category: String,
        /// Include members inherited from parent categories
        #[arg(long)]
        inherited: bool,
        /// View through this draft (id or token)
        #[arg(short, long)]
        draft: Option<String>,
    },
}

/// Draft subcommands
#[derive(Subcommand, Debug)]
pub enum DraftCommands {
    /// Create a new draft
    Create {
        /// Draft title
        title: String,
    },

    /// List drafts
    List {
        /// Filter by status (open, submitted, discarded)
        #[arg(long)]
        status: Option<DraftStatus>,
    },

    /// Show a draft and its pending changes
    Show {
        /// Draft id or token
        draft: String,
    },

    /// Drop all changes and close the draft
    Discard {
        /// Draft id or token
        draft: String,
    },

    /// Produce the draft's changeset and close it
    Submit {
        /// Draft id or token
        draft: String,
    },

    /// Stage a new entity
    New {
        /// Draft id or token
        draft: String,
        /// Entity type
        entity_type: EntityType,
        /// Entity key
        key: String,
        /// Entity document as JSON
        json: String,
    },

    /// Stage an RFC 6902 patch against an entity
    Update {
        /// Draft id or token
        draft: String,
        /// Entity type
        entity_type: EntityType,
        /// Entity key
        key: String,
        /// JSON Patch array
        patch: String,
    },

    /// Stage a full replacement document for an entity
    Replace {
        /// Draft id or token
        draft: String,
        /// Entity type
        entity_type: EntityType,
        /// Entity key
        key: String,
        /// Entity document as JSON
        json: String,
    },

    /// Stage the deletion of an entity
    Delete {
        /// Draft id or token
        draft: String,
        /// Entity type
        entity_type: EntityType,
        /// Entity key
        key: String,
    },

    /// Remove the pending change for an entity
    Revert {
        /// Draft id or token
        draft: String,
        /// Entity type
        entity_type: EntityType,
        /// Entity key
        key: String,
    },
}

/// Module subcommands
#[derive(Subcommand, Debug)]
pub enum ModuleCommands {
    /// Compute the entities a module pulls in
    Derive {
        /// Module key
        module: String,
        /// Derive through this draft (id or token)
        #[arg(short, long)]
        draft: Option<String>,
        /// Expansion round limit (1-64)
        #[arg(long)]
        max_depth: Option<usize>,
        /// Record why each entity was included
        #[arg(long)]
        provenance: bool,
    },

    /// Derive a module through a draft and stage its derived arrays
    Stage {
        /// Draft id or token
        draft: String,
        /// Module key
        module: String,
        /// Expansion round limit (1-64)
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

/// Graph subcommands
#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// Entities within a few hops of one entity
    Neighborhood {
        /// Entity type
        entity_type: EntityType,
        /// Entity key
        key: String,
        /// Radius in hops (1-5)
        #[arg(long)]
        depth: Option<usize>,
        /// View through this draft (id or token)
        #[arg(short, long)]
        draft: Option<String>,
    },

    /// Entities a draft edits and everything that references them
    Affected {
        /// Draft id or token
        draft: String,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
        /// Write preference keys to the system config.kdl instead of the session one
        #[arg(long)]
        system: bool,
    },

    /// List values in the store's config table
    List,

    /// Show resolved preferences and where each comes from
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // This will panic if the CLI is misconfigured
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_entity_type_argument() {
        let cli = Cli::try_parse_from(["oh", "entity", "show", "categories", "Person"]).unwrap();
        match cli.command {
            Commands::Entity {
                command: EntityCommands::Show { entity_type, key, draft },
            } => {
                assert_eq!(entity_type, EntityType::Category);
                assert_eq!(key, "Person");
                assert!(draft.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["oh", "entity", "show", "widget", "X"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["oh", "draft", "list", "-H", "--log-json"]).unwrap();
        assert!(cli.human_readable);
        assert!(cli.log_json);
    }
}
