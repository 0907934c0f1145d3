//! Binary-level smoke tests for the command surface.

use assert_cmd::Command;
use predicates::prelude::*;

fn huskycat() -> Command {
    let mut cmd = Command::cargo_bin("huskycat").unwrap();
    // Keep every run hermetic: no user cache, no inherited tool PATH.
    cmd.env("HUSKYCAT_LOG", "error");
    cmd
}

#[test]
fn bare_invocation_shows_help() {
    huskycat()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn validate_empty_dir_in_cli_mode_reports_nothing_to_validate() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .args(["validate", "--mode", "cli", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to validate."));
}

#[test]
fn pipeline_mode_emits_parseable_json_with_model_fields() {
    let dir = tempfile::tempdir().unwrap();
    let output = huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .args(["validate", "--mode", "pipeline", "."])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let run: serde_json::Value = serde_json::from_slice(&output).unwrap();
    for field in [
        "run-id",
        "started-at",
        "finished-at",
        "mode",
        "targets",
        "selected",
        "results",
        "summary",
        "success",
    ] {
        assert!(run.get(field).is_some(), "missing field {field}");
    }
    assert_eq!(run["success"], true);

    // Re-serializing the parsed value round-trips the record.
    let reparsed: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&run).unwrap()).unwrap();
    assert_eq!(run, reparsed);
}

#[test]
fn missing_tools_surface_unavailable_and_exit_2() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();

    let assert = huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        // An empty PATH leaves every tool without an execution strategy.
        .env("PATH", dir.path().join("no-bins").display().to_string())
        .args(["validate", "--mode", "pipeline", "."])
        .assert()
        .code(2);

    let run: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let results = run["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(
        results
            .iter()
            .all(|r| r["status"] == "unavailable"),
        "{results:?}"
    );
    // Unavailability alone never flips success to false.
    assert_eq!(run["success"], true);
}

#[test]
fn validate_persists_run_store_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .args(["validate", "--mode", "pipeline", "."])
        .assert()
        .success();

    let runs = dir.path().join(".huskycat").join("runs");
    assert!(runs.join("last_run.json").exists());
    let pointer: serde_json::Value =
        serde_json::from_slice(&std::fs::read(runs.join("last_run.json")).unwrap()).unwrap();
    let run_id = pointer["run-id"].as_str().unwrap();
    assert!(runs.join(format!("{run_id}.json")).exists());
}

#[test]
fn status_lists_mode_and_tools() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .arg("status")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("mode:")
                .and(predicate::str::contains("ruff-check"))
                .and(predicate::str::contains("run store:")),
        );
}

#[test]
fn clean_prunes_the_store() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("pruned"));

    huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .args(["clean", "--all"])
        .assert()
        .success();
}

#[test]
fn setup_hooks_requires_a_git_repo() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .arg("setup-hooks")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not a git repository"));
}

#[test]
fn setup_hooks_installs_shims_in_a_git_repo() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    huskycat()
        .current_dir(dir.path())
        .arg("setup-hooks")
        .assert()
        .success()
        .stdout(predicate::str::contains("pre-commit"));

    let shim = std::fs::read_to_string(dir.path().join(".git/hooks/pre-commit")).unwrap();
    assert!(shim.contains("validate --staged"));
    let push_shim = std::fs::read_to_string(dir.path().join(".git/hooks/pre-push")).unwrap();
    assert!(push_shim.contains("validate --all"));
}

#[test]
fn ci_validate_rejects_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .env("XDG_CACHE_HOME", dir.path().join("cache"))
        .args(["ci-validate", "ghost.yml"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn unrecognized_mode_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    huskycat()
        .current_dir(dir.path())
        .env("HUSKYCAT_MODE", "warp-speed")
        .args(["validate", "."])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized mode"));
}
