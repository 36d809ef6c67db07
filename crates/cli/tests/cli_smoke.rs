//! CLI smoke tests for reposerver.
//!
//! These run the binary against local directories only; nothing here needs
//! network access or the templating tools.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

fn reposerver_cmd() -> Command {
  cargo_bin_cmd!("reposerver")
}

/// Create a temp directory holding `files` (relative path, content).
fn temp_tree(files: &[(&str, &str)]) -> TempDir {
  let temp = TempDir::new().unwrap();
  for (rel, content) in files {
    let path = temp.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }
  temp
}

const CONFIG_MAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  key: value\n";

const TWO_DOCS: &str = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n---\napiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: web\n";

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  reposerver_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  reposerver_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("reposerver"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &[
    "generate",
    "render",
    "detect",
    "ls-apps",
    "app-details",
    "revision-metadata",
  ] {
    reposerver_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// detect
// =============================================================================

#[test]
fn detect_kustomize_case_variants() {
  for name in ["kustomization.yaml", "kustomization.yml", "Kustomization"] {
    let temp = temp_tree(&[(name, "resources: []\n")]);
    reposerver_cmd()
      .arg("detect")
      .arg(temp.path())
      .assert()
      .success()
      .stdout(predicate::str::diff("Kustomize\n"));
  }
}

#[test]
fn detect_helm_chart_as_json() {
  let temp = temp_tree(&[("Chart.yaml", "name: guestbook\n")]);
  reposerver_cmd()
    .args(["--format", "json", "detect"])
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"type\": \"Helm\""));
}

#[test]
fn detect_plain_directory() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP)]);
  reposerver_cmd()
    .arg("detect")
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::diff("Directory\n"));
}

#[test]
fn detect_missing_directory_fails() {
  reposerver_cmd()
    .arg("detect")
    .arg("/nonexistent/app")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to detect"));
}

// =============================================================================
// render
// =============================================================================

#[test]
fn render_directory_as_yaml() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP), ("svc.yaml", TWO_DOCS)]);
  reposerver_cmd()
    .arg("render")
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("kind: ConfigMap"))
    .stdout(predicate::str::contains("kind: ServiceAccount"))
    .stderr(predicate::str::contains("3 manifest(s)"));
}

#[test]
fn render_json_reports_namespace() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP)]);
  let output = reposerver_cmd()
    .args(["--format", "json", "render", "--namespace", "staging"])
    .arg(temp.path())
    .output()
    .unwrap();
  assert!(output.status.success());

  let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(response["namespace"], "staging");
  assert_eq!(response["sourceType"], "Directory");
  assert_eq!(response["manifests"].as_array().unwrap().len(), 1);
}

#[test]
fn render_recurse_includes_nested_files() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP), ("nested/svc.yaml", TWO_DOCS)]);

  reposerver_cmd()
    .arg("render")
    .arg(temp.path())
    .assert()
    .success()
    .stderr(predicate::str::contains("1 manifest(s)"));

  reposerver_cmd()
    .args(["render", "--recurse"])
    .arg(temp.path())
    .assert()
    .success()
    .stderr(predicate::str::contains("3 manifest(s)"));
}

#[test]
fn render_malformed_file_fails() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP), ("bad.yaml", "kind: [unclosed\n")]);
  reposerver_cmd()
    .arg("render")
    .arg(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("bad.yaml"));
}

#[test]
fn render_rejects_files() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP)]);
  reposerver_cmd()
    .arg("render")
    .arg(temp.path().join("cm.yaml"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Not a directory"));
}

// =============================================================================
// configuration
// =============================================================================

#[test]
#[serial]
fn invalid_env_duration_fails() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP)]);
  reposerver_cmd()
    .arg("detect")
    .arg(temp.path())
    .env("REPOSERVER_CACHE_TTL", "soon")
    .assert()
    .failure()
    .stderr(predicate::str::contains("REPOSERVER_CACHE_TTL"));
}

#[test]
fn missing_config_file_fails() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP)]);
  reposerver_cmd()
    .arg("--config")
    .arg(temp.path().join("missing.yaml"))
    .arg("detect")
    .arg(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load configuration"));
}

#[cfg(unix)]
#[test]
fn render_with_registered_plugin() {
  let temp = temp_tree(&[(
    "reposerver.yaml",
    "plugins:\n- name: echo\n  generate:\n    command: [/bin/sh, -c]\n    args: [\"printf 'kind: ConfigMap\\nmetadata:\\n  name: from-plugin\\n'\"]\n",
  )]);
  let app = temp.path().join("app");
  std::fs::create_dir_all(&app).unwrap();

  reposerver_cmd()
    .arg("--config")
    .arg(temp.path().join("reposerver.yaml"))
    .args(["render", "--plugin", "echo"])
    .arg(&app)
    .assert()
    .success()
    .stdout(predicate::str::contains("name: from-plugin"));
}

#[test]
fn render_unknown_plugin_fails() {
  let temp = temp_tree(&[("cm.yaml", CONFIG_MAP)]);
  reposerver_cmd()
    .args(["render", "--plugin", "missing"])
    .arg(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("plugin 'missing' is not registered"));
}
