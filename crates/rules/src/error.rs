use postwarden_core::{CoreError, LedgerError, PlatformError};
use postwarden_notify::NotifyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("platform: {0}")]
    Platform(#[from] PlatformError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("template: {0}")]
    Template(#[from] NotifyError),

    /// A ledger record references something that is not there.
    #[error("data consistency: {0}")]
    DataConsistency(String),

    #[error("policy: {0}")]
    Policy(String),
}

impl EngineError {
    /// Worth retrying on a later pass without changing anything.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Platform(e) => e.is_transient(),
            EngineError::Ledger(LedgerError::Io(_)) | EngineError::Ledger(LedgerError::Backend(_)) => {
                true
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::from(PlatformError::Transient("503".into())).is_transient());
        assert!(!EngineError::from(PlatformError::Forbidden("no".into())).is_transient());
        assert!(EngineError::from(LedgerError::Io("disk".into())).is_transient());
        assert!(!EngineError::DataConsistency("gone".into()).is_transient());
    }
}
