//! reposerver-lib: manifest generation for a GitOps repository server.
//!
//! Given a repository, a revision and an application source, the crate
//! produces the application's Kubernetes manifests:
//! - `source`: application source types and source type detection
//! - `backend`: Helm, Kustomize, Ksonnet, Directory and Plugin generators
//! - `manifest`: normalization of generator output into single objects
//! - `repo`: the version-control collaborator (git via gix)
//! - `lock` / `cache`: per-repository serialization and response caching
//! - `service`: the orchestrator tying the pieces together

pub mod backend;
pub mod cache;
pub mod config;
pub mod consts;
pub mod exec;
pub mod lock;
pub mod manifest;
pub mod paths;
pub mod repo;
pub mod service;
pub mod source;
pub mod util;
