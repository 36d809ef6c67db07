mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use output::OutputFormat;

/// reposerver - generate Kubernetes manifests from git repositories
#[derive(Parser)]
#[command(name = "reposerver")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Configuration file (YAML)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  format: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Generate the manifests of an application in a git repository
  Generate {
    /// Repository URL
    repo: String,

    /// Branch, tag or commit (default: HEAD)
    #[arg(short, long, default_value = "")]
    revision: String,

    /// Application path inside the repository
    #[arg(short, long, default_value = "")]
    path: String,

    /// Target namespace
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Ignore cached responses
    #[arg(long)]
    no_cache: bool,

    /// Additional helm value files, in order
    #[arg(long = "helm-values")]
    helm_values: Vec<String>,

    /// Recurse into subdirectories of a plain directory app
    #[arg(long)]
    recurse: bool,

    /// Use a registered config management plugin
    #[arg(long)]
    plugin: Option<String>,

    /// Set the app instance label to this value
    #[arg(long)]
    app_name: Option<String>,
  },

  /// Generate the manifests of a local directory without git
  Render {
    /// Application directory
    dir: PathBuf,

    /// Target namespace
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Recurse into subdirectories of a plain directory app
    #[arg(long)]
    recurse: bool,

    /// Use a registered config management plugin
    #[arg(long)]
    plugin: Option<String>,
  },

  /// Print the detected source type of a local directory
  Detect {
    /// Application directory
    dir: PathBuf,
  },

  /// List the applications in a git repository
  LsApps {
    /// Repository URL
    repo: String,

    /// Branch, tag or commit (default: HEAD)
    #[arg(short, long, default_value = "")]
    revision: String,
  },

  /// Show type-specific details of an application
  AppDetails {
    /// Repository URL
    repo: String,

    /// Branch, tag or commit (default: HEAD)
    #[arg(short, long, default_value = "")]
    revision: String,

    /// Application path inside the repository
    #[arg(short, long)]
    path: String,

    /// Helm value files to merge into the reported values
    #[arg(long = "helm-values")]
    helm_values: Vec<String>,
  },

  /// Show author, message and tags of a revision
  RevisionMetadata {
    /// Repository URL
    repo: String,

    /// Branch, tag or commit (default: HEAD)
    #[arg(short, long, default_value = "")]
    revision: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let ctx = cmd::Context::load(cli.config.as_deref(), cli.format)?;

  match cli.command {
    Commands::Generate {
      repo,
      revision,
      path,
      namespace,
      no_cache,
      helm_values,
      recurse,
      plugin,
      app_name,
    } => cmd::cmd_generate(
      &ctx,
      cmd::GenerateArgs {
        repo,
        revision,
        path,
        namespace,
        no_cache,
        helm_values,
        recurse,
        plugin,
        app_name,
      },
    ),
    Commands::Render {
      dir,
      namespace,
      recurse,
      plugin,
    } => cmd::cmd_render(&ctx, &dir, &namespace, recurse, plugin),
    Commands::Detect { dir } => cmd::cmd_detect(&ctx, &dir),
    Commands::LsApps { repo, revision } => cmd::cmd_ls_apps(&ctx, &repo, &revision),
    Commands::AppDetails {
      repo,
      revision,
      path,
      helm_values,
    } => cmd::cmd_app_details(&ctx, &repo, &revision, &path, helm_values),
    Commands::RevisionMetadata { repo, revision } => cmd::cmd_revision_metadata(&ctx, &repo, &revision),
  }
}
