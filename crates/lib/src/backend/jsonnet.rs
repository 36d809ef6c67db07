//! Jsonnet evaluation.
//!
//! Evaluation sits behind [`JsonnetEvaluator`] so the engine can be swapped.
//! The stock implementation drives the `jsonnet` binary.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::exec::{CmdSpec, CommandRunner, ExecError};
use crate::source::{JsonnetSource, JsonnetVar};

#[derive(Debug, Error)]
pub enum JsonnetError {
  #[error(transparent)]
  Exec(#[from] ExecError),

  #[error("output is not valid JSON: {0}")]
  Output(#[source] serde_json::Error),
}

#[async_trait]
pub trait JsonnetEvaluator: Send + Sync {
  /// Evaluate the program in `file` with `cwd` as working directory.
  ///
  /// String variables are injected as string literals, code variables are
  /// injected verbatim as Jsonnet expressions.
  async fn evaluate(&self, file: &Path, cwd: &Path, vars: &JsonnetSource) -> Result<Value, JsonnetError>;
}

pub struct JsonnetCli {
  binary: String,
  runner: Arc<dyn CommandRunner>,
}

impl JsonnetCli {
  pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
    Self {
      binary: binary.into(),
      runner,
    }
  }

  fn command(&self, file: &Path, cwd: &Path, vars: &JsonnetSource) -> CmdSpec {
    let mut spec = CmdSpec::new(self.binary.clone(), cwd);
    for lib in &vars.libs {
      spec = spec.arg("-J").arg(lib.clone());
    }
    for var in &vars.ext_vars {
      spec = spec.arg(flag("--ext", var)).arg(assignment(var));
    }
    for var in &vars.tlas {
      spec = spec.arg(flag("--tla", var)).arg(assignment(var));
    }
    spec.arg(file.to_string_lossy())
  }
}

fn flag(prefix: &str, var: &JsonnetVar) -> String {
  if var.code {
    format!("{prefix}-code")
  } else {
    format!("{prefix}-str")
  }
}

fn assignment(var: &JsonnetVar) -> String {
  format!("{}={}", var.name, var.value)
}

#[async_trait]
impl JsonnetEvaluator for JsonnetCli {
  async fn evaluate(&self, file: &Path, cwd: &Path, vars: &JsonnetSource) -> Result<Value, JsonnetError> {
    let output = self.runner.run(&self.command(file, cwd, vars)).await?;
    serde_json::from_str(&output.stdout).map_err(JsonnetError::Output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::RecordingRunner;
  use serde_json::json;

  #[tokio::test]
  async fn passes_string_and_code_variables() {
    let runner = Arc::new(RecordingRunner::with_responses([r#"{"kind": "ConfigMap"}"#]));
    let cli = JsonnetCli::new("jsonnet", runner.clone());
    let vars = JsonnetSource {
      ext_vars: vec![JsonnetVar::string("env", "prod"), JsonnetVar::code("replicas", "1 + 2")],
      tlas: vec![JsonnetVar::string("name", "guestbook")],
      libs: vec!["vendor".to_string()],
    };

    let value = cli
      .evaluate(Path::new("main.jsonnet"), Path::new("/app"), &vars)
      .await
      .unwrap();

    assert_eq!(value, json!({"kind": "ConfigMap"}));
    assert_eq!(
      runner.command_lines(),
      vec![
        "jsonnet -J vendor --ext-str env=prod --ext-code replicas=1 + 2 --tla-str name=guestbook main.jsonnet"
      ]
    );
  }

  #[tokio::test]
  async fn invalid_output_is_error() {
    let runner = Arc::new(RecordingRunner::with_responses(["not json"]));
    let cli = JsonnetCli::new("jsonnet", runner);
    let result = cli
      .evaluate(Path::new("main.jsonnet"), Path::new("/app"), &JsonnetSource::default())
      .await;
    assert!(matches!(result, Err(JsonnetError::Output(_))));
  }
}
