//! External process invocation.
//!
//! Backends never spawn processes directly. They describe the invocation as a
//! [`CmdSpec`] and hand it to a [`CommandRunner`], so tests can substitute a
//! recording fake for the real templating binaries.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecError {
  #[error("failed to spawn '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("'{program}' exited with code {code:?}: {stderr}")]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to write stdin of '{program}': {source}")]
  Stdin {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("empty command")]
  EmptyCommand,
}

/// A single process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  /// Variables added on top of the inherited environment.
  pub env: BTreeMap<String, String>,
  /// Written to the child's stdin. Never included in [`CmdSpec::display`].
  pub stdin: Option<String>,
}

impl CmdSpec {
  pub fn new(program: impl Into<String>, cwd: &Path) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: cwd.to_path_buf(),
      env: BTreeMap::new(),
      stdin: None,
    }
  }

  /// Build a spec from a `command` vector (program followed by leading args) and extra `args`.
  pub fn from_parts(command: &[String], args: &[String], cwd: &Path) -> Result<Self, ExecError> {
    let (program, leading) = command.split_first().ok_or(ExecError::EmptyCommand)?;
    let mut spec = Self::new(program.clone(), cwd);
    spec.args.extend(leading.iter().cloned());
    spec.args.extend(args.iter().cloned());
    Ok(spec)
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn stdin(mut self, input: impl Into<String>) -> Self {
    self.stdin = Some(input.into());
    self
  }

  /// Program and arguments joined for log output.
  pub fn display(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
  pub stdout: String,
  pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
  /// Run `spec` to completion.
  ///
  /// A non-zero exit is reported as [`ExecError::Failed`] carrying the
  /// captured stderr.
  async fn run(&self, spec: &CmdSpec) -> Result<CmdOutput, ExecError>;
}

/// Runs commands as child processes of the server.
///
/// Children inherit the server environment and are killed when the future
/// driving them is dropped, so a request timeout never leaves them behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
  async fn run(&self, spec: &CmdSpec) -> Result<CmdOutput, ExecError> {
    debug!(cmd = %spec.display(), cwd = %spec.cwd.display(), "running command");

    let mut command = Command::new(&spec.program);
    command
      .args(&spec.args)
      .current_dir(&spec.cwd)
      .envs(&spec.env)
      .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
      program: spec.program.clone(),
      source,
    })?;
    if let (Some(input), Some(mut stdin)) = (spec.stdin.as_deref(), child.stdin.take())
      && let Err(source) = stdin.write_all(input.as_bytes()).await
      && source.kind() != io::ErrorKind::BrokenPipe
    {
      return Err(ExecError::Stdin {
        program: spec.program.clone(),
        source,
      });
    }

    let output = child.wait_with_output().await.map_err(|source| ExecError::Spawn {
      program: spec.program.clone(),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
      if !stderr.is_empty() {
        debug!(stderr = %stderr, "command stderr");
      }
      return Err(ExecError::Failed {
        program: spec.program.clone(),
        code: output.status.code(),
        stderr: stderr.trim().to_string(),
      });
    }

    Ok(CmdOutput { stdout, stderr })
  }
}
