//! Common test utilities for ontohub integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/ontohub/` or `~/.config/ontohub/` directories.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
pub use tempfile::TempDir;

/// A test environment with isolated data storage.
///
/// Each `TestEnv` creates three temporary directories:
/// - `repo_dir`: Acts as the ontology repository checkout
/// - `data_dir`: Holds ontohub's data (via `OH_DATA_DIR` env var)
/// - `config_dir`: Holds the system config.kdl (via `OH_CONFIG_DIR`)
///
/// The `oh()` method returns a `Command` that sets these per-invocation,
/// making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and initialize ontohub.
    pub fn init() -> Self {
        let env = Self::new();
        env.oh().args(["system", "init"]).assert().success();
        env
    }

    /// Create an initialized environment synced from the pets fixture.
    pub fn with_pets() -> Self {
        let env = Self::init();
        env.write_pets_fixture();
        env.oh().arg("sync").assert().success();
        env
    }

    /// Get a Command for the oh binary with isolated directories.
    pub fn oh(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_oh"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("OH_DATA_DIR", self.data_dir.path());
        cmd.env("OH_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("OH_REPO");
        cmd.env_remove("OH_MAX_DEPTH");
        cmd.env_remove("OH_LOG");
        cmd
    }

    /// Run `oh` with `args`, assert success and parse stdout as JSON.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.oh().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap()
    }

    /// Get the path to the repo directory.
    pub fn path(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    /// Write an entity document into the ontology checkout.
    pub fn write_entity(&self, dir: &str, key: &str, doc: Value) {
        let dir = self.repo_dir.path().join(dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{}.json", key)),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();
    }

    /// A small ontology:
    ///
    /// ```text
    /// Animal <- Pet --HasOwner--> Person
    ///            |                  ^
    ///            +-- rex (resource) |
    /// Pets module = [Pet]           Person has Has_name
    /// ```
    pub fn write_pets_fixture(&self) {
        use serde_json::json;
        self.write_entity(
            "categories",
            "Animal",
            json!({ "id": "Animal", "label": "Animal", "properties": ["Has_species"] }),
        );
        self.write_entity(
            "categories",
            "Pet",
            json!({ "id": "Pet", "label": "Pet", "parents": ["Animal"], "properties": ["HasOwner"] }),
        );
        self.write_entity(
            "categories",
            "Person",
            json!({ "id": "Person", "label": "Person", "properties": ["Has_name"] }),
        );
        self.write_entity(
            "properties",
            "HasOwner",
            json!({ "id": "HasOwner", "Allows_value_from_category": "Person", "has_display_template": "OwnerCard" }),
        );
        self.write_entity("properties", "Has_name", json!({ "id": "Has_name" }));
        self.write_entity("properties", "Has_species", json!({ "id": "Has_species" }));
        self.write_entity("templates", "OwnerCard", json!({ "id": "OwnerCard" }));
        self.write_entity("resources", "rex", json!({ "id": "rex", "category": "Pet" }));
        self.write_entity(
            "modules",
            "Pets",
            json!({ "id": "Pets", "label": "Pets", "categories": ["Pet"] }),
        );
    }

    /// Create a draft and return its id.
    pub fn create_draft(&self, title: &str) -> String {
        let draft = self.json(&["draft", "create", title]);
        draft["id"].as_str().unwrap().to_string()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
