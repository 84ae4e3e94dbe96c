//! ontohub - draft overlay and module derivation for an ontology authoring hub.
//!
//! This library provides the core functionality for the `oh` CLI tool:
//! canonical entity storage, draft change logs, the effective (draft-overlaid)
//! view of the ontology, and transitive module derivation over that view.

pub mod action_log;
pub mod cli;
pub mod commands;
pub mod config;
pub mod derivation;
pub mod models;
pub mod overlay;
pub mod query;
pub mod storage;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;
    use std::sync::OnceLock;
    use tempfile::TempDir;

    use crate::models::{DraftChange, Entity, EntityType};
    use crate::storage::{DATA_DIR_ENV, Storage};
    use serde_json::{Value, json};

    /// Shared data directory for tests that go through the command layer.
    static TEST_DATA_DIR: OnceLock<TempDir> = OnceLock::new();

    /// Point `OH_DATA_DIR` at a process-wide temporary directory, once.
    ///
    /// Command functions resolve storage from the repository path alone, so
    /// they cannot take an injected data directory. Every `TestEnv` has its own
    /// repository directory, which keeps their storage apart under the shared base.
    pub fn init_test_env_var() {
        TEST_DATA_DIR.get_or_init(|| {
            let dir = TempDir::new().unwrap();
            // SAFETY: runs exactly once, before any command-layer test reads
            // the variable; integration tests set it per subprocess instead.
            unsafe {
                std::env::set_var(DATA_DIR_ENV, dir.path());
            }
            dir
        });
    }

    /// Test environment with isolated storage.
    ///
    /// Storage tests use `TestEnv::new()` with `init_storage()`; command tests
    /// use `TestEnv::new_with_env()`.
    pub struct TestEnv {
        /// Simulated ontology repository directory
        pub repo_dir: TempDir,
        /// Isolated data storage directory
        pub data_dir: TempDir,
    }

    impl TestEnv {
        /// Create a new test environment with isolated directories.
        pub fn new() -> Self {
            Self {
                repo_dir: TempDir::new().unwrap(),
                data_dir: TempDir::new().unwrap(),
            }
        }

        /// Create a test environment whose storage is found through `OH_DATA_DIR`.
        pub fn new_with_env() -> Self {
            init_test_env_var();
            Self::new()
        }

        /// Get the path to the simulated repository.
        pub fn path(&self) -> &Path {
            self.repo_dir.path()
        }

        /// Get the path to the isolated data directory.
        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        /// Initialize storage for this test environment.
        pub fn init_storage(&self) -> Storage {
            Storage::init_with_data_dir(self.path(), self.data_path()).unwrap()
        }

        /// Open storage for this test environment.
        pub fn open_storage(&self) -> Storage {
            Storage::open_with_data_dir(self.path(), self.data_path()).unwrap()
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    pub fn category(key: &str, parents: &[&str], properties: &[&str]) -> Entity {
        Entity::new(
            EntityType::Category,
            key,
            json!({ "id": key, "label": key, "parents": parents, "properties": properties }),
        )
    }

    /// A property whose values come from `target` via the flat reference field.
    pub fn property_ref(key: &str, target: &str) -> Entity {
        Entity::new(
            EntityType::Property,
            key,
            json!({ "id": key, "Allows_value_from_category": target }),
        )
    }

    pub fn property(key: &str) -> Entity {
        Entity::new(EntityType::Property, key, json!({ "id": key }))
    }

    pub fn resource(key: &str, category: &str) -> Entity {
        Entity::new(
            EntityType::Resource,
            key,
            json!({ "id": key, "category": category }),
        )
    }

    pub fn module(key: &str, categories: &[&str]) -> Entity {
        Entity::new(
            EntityType::Module,
            key,
            json!({ "id": key, "categories": categories }),
        )
    }

    pub fn update(draft: &str, entity_type: EntityType, key: &str, patch: Value) -> DraftChange {
        DraftChange::update(draft, entity_type, key, patch)
    }

    pub fn create(draft: &str, entity_type: EntityType, key: &str, doc: Value) -> DraftChange {
        DraftChange::create(draft, entity_type, key, doc)
    }

    pub fn delete(draft: &str, entity_type: EntityType, key: &str) -> DraftChange {
        DraftChange::delete(draft, entity_type, key)
    }
}

/// Library-level error type for ontohub operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("Not initialized: run `oh system init` first")]
    NotInitialized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid seed category: {0}")]
    InvalidSeed(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Draft is not open: {0}")]
    DraftClosed(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for ontohub operations.
pub type Result<T> = std::result::Result<T, Error>;
