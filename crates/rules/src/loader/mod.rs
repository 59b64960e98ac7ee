//! Filesystem loader for per-community policy documents.
//!
//! Each `*.yml` / `*.yaml` file under the policy directory describes one
//! community. Documents may inherit from another community's document via
//! `metadata.extends`; inheritance is resolved on the raw YAML before the
//! settings are deserialized and validated.

mod core;
mod document;
mod error;
mod extends;


pub use self::core::PolicyLoader;
pub use self::document::{PolicyDocument, PolicyMetadata, API_VERSION, KIND};
pub use self::error::{LoadResult, LoadStatus, PolicyError, Result};
pub use self::extends::{deep_merge, resolve_extends};
