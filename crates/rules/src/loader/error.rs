//! Error types and load result structures for the policy loader.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Document parsed but is unusable (bad envelope, invalid settings,
    /// broken template, duplicate community).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("extends error: {0}")]
    Extends(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Outcome of loading a single policy file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug)]
pub enum LoadStatus {
    Loaded { community: String },
    /// Dotfile or non-YAML file.
    Skipped { reason: String },
    Failed { error: String },
}

impl LoadResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, LoadStatus::Failed { .. })
    }
}
