//! Integration tests for `oh system` and `oh sync`.

mod common;

use common::TestEnv;
use predicates::prelude::*;
use serde_json::json;

#[test]
fn test_system_init_new_repo() {
    let env = TestEnv::new();
    env.oh()
        .args(["system", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"initialized\":true"));
}

#[test]
fn test_system_init_twice() {
    let env = TestEnv::init();
    env.oh()
        .args(["system", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"initialized\":false"));
}

#[test]
fn test_commands_before_init_fail_with_json_error() {
    let env = TestEnv::new();
    env.oh()
        .args(["system", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("\"error\""))
        .stderr(predicate::str::contains("oh system init"));
}

#[test]
fn test_human_error_output() {
    let env = TestEnv::new();
    env.oh()
        .args(["system", "status", "-H"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_status_reports_counts_and_build() {
    let env = TestEnv::with_pets();
    let status = env.json(&["system", "status"]);
    assert_eq!(status["entities"]["category"], 3);
    assert_eq!(status["entities"]["property"], 3);
    assert_eq!(status["entities"]["resource"], 1);
    assert_eq!(status["total_entities"], 9);
    assert_eq!(status["open_drafts"], 0);
    assert!(status["build"]["version"].is_string());
    assert!(status["build"]["git_commit"].is_string());
}

#[test]
fn test_status_human() {
    let env = TestEnv::with_pets();
    env.oh()
        .args(["system", "status", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entities: 9"))
        .stdout(predicate::str::contains("Open drafts: 0"));
}

#[test]
fn test_sync_from_explicit_source() {
    let env = TestEnv::init();
    let source = tempfile::TempDir::new().unwrap();
    let dir = source.path().join("categories").join("nested");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("Thing.json"), r#"{"label": "Thing"}"#).unwrap();
    std::fs::write(source.path().join("categories").join("broken.json"), "{").unwrap();

    let result = env.json(&["sync", "--source", source.path().to_str().unwrap()]);
    assert_eq!(result["synced"], 1);
    assert_eq!(result["entities"]["category"], 1);
    assert_eq!(result["skipped"].as_array().unwrap().len(), 1);

    // Key falls back to the file stem when the document has no id.
    let shown = env.json(&["entity", "show", "category", "Thing"]);
    assert_eq!(shown["effective_json"], json!({ "label": "Thing" }));
}

#[test]
fn test_resync_keeps_drafts() {
    let env = TestEnv::with_pets();
    let draft = env.create_draft("Keep me");
    env.oh().arg("sync").assert().success();
    let shown = env.json(&["draft", "show", &draft]);
    assert_eq!(shown["draft"]["status"], "open");
}

#[test]
fn test_sync_missing_source() {
    let env = TestEnv::init();
    env.oh()
        .args(["sync", "--source", "/definitely/not/here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found: ontology directory"));
}

#[test]
fn test_repo_flag_must_exist() {
    let env = TestEnv::new();
    env.oh()
        .args(["-C", "/definitely/not/here", "system", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_repo_flag_targets_other_directory() {
    let env = TestEnv::with_pets();
    let elsewhere = tempfile::TempDir::new().unwrap();
    env.oh()
        .current_dir(elsewhere.path())
        .args(["-C", env.path().to_str().unwrap(), "entity", "list", "category"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\":3"));
}
