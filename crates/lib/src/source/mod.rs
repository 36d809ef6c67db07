//! Application sources and source type detection.
//!
//! - [`types`] - Application source, backend configuration and app details types
//! - [`detect`] - Source type detection from a directory listing

pub mod detect;
mod types;

pub use detect::{DetectError, DirListing, detect_from_listing, detect_implicit, detect_source_type};
pub use types::*;
