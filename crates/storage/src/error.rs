use postwarden_core::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot version {0}")]
    Version(u32),

    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(e) => LedgerError::Io(e.to_string()),
            StorageError::Json(e) => LedgerError::Serialization(e.to_string()),
            other => LedgerError::Backend(other.to_string()),
        }
    }
}
