//! Test utilities for reposerver-lib.
//!
//! Fixture builders for checked-out application directories and shell helpers
//! for plugin commands.

use std::path::Path;

/// Write `files` (relative path, content) under `root`, creating parent directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (rel, content) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }
}

/// Returns the plugin command that runs a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (Vec<String>, Vec<String>) {
  (vec!["/bin/sh".to_string(), "-c".to_string()], vec![script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (Vec<String>, Vec<String>) {
  (vec!["cmd.exe".to_string(), "/C".to_string()], vec![script.to_string()])
}

/// A single-document ConfigMap manifest with the given name.
pub fn config_map(name: &str) -> String {
  format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\ndata:\n  key: value\n")
}
