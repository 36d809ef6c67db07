//! Implementation of the `reposerver app-details` command.

use anyhow::{Context as _, Result};

use reposerver_lib::service::{AppDetailsQuery, HelmAppDetailsQuery};
use reposerver_lib::source::{AppDetails, Repository};

use super::{Context, runtime};
use crate::output::{self, print_json, print_stat};

pub fn cmd_app_details(ctx: &Context, repo: &str, revision: &str, path: &str, helm_values: Vec<String>) -> Result<()> {
  let query = AppDetailsQuery {
    repo: Repository::new(repo),
    revision: revision.to_string(),
    path: path.to_string(),
    helm: (!helm_values.is_empty()).then_some(HelmAppDetailsQuery {
      value_files: helm_values,
    }),
    ..Default::default()
  };
  let service = ctx.service();
  let details = runtime()?
    .block_on(service.get_app_details(&query))
    .with_context(|| format!("Failed to read details of '{path}'"))?;
  service.shutdown().context("Failed to flush cache")?;

  if ctx.format.is_json() {
    return print_json(&details);
  }

  print_stat("Type", details.source_type().as_str());
  match &details {
    AppDetails::Helm(helm) => {
      print_stat("Chart", &helm.name);
      print_stat("Value files", &helm.value_files.join(", "));
      println!();
      println!("Parameters:");
      for param in &helm.parameters {
        println!("  {} {}={}", output::symbols::INFO, param.name, param.value);
      }
    }
    AppDetails::Kustomize(kustomize) => {
      println!();
      println!("Images:");
      for image in &kustomize.images {
        println!("  {} {}", output::symbols::INFO, image);
      }
    }
    AppDetails::Ksonnet(ksonnet) => {
      print_stat("Name", &ksonnet.name);
      println!();
      println!("Environments:");
      for (name, env) in &ksonnet.environments {
        println!(
          "  {} {} {} {}/{}",
          output::symbols::INFO,
          name,
          output::symbols::ARROW,
          env.destination.server,
          env.destination.namespace
        );
      }
      println!();
      println!("Parameters:");
      for param in &ksonnet.parameters {
        println!("  {} {}.{}={}", output::symbols::INFO, param.component, param.name, param.value);
      }
    }
    AppDetails::Plugin(plugin) => print_stat("Plugin", &plugin.name),
    AppDetails::Directory(_) => {}
  }
  Ok(())
}
