//! Ledger storage backends.

pub mod error;
pub mod memory;

use postwarden_core::config::StorageConfig;

pub use error::StorageError;
pub use memory::MemoryLedger;

/// Open the snapshot-backed ledger described by `config`.
pub fn open_ledger(config: &StorageConfig) -> Result<MemoryLedger, StorageError> {
    std::fs::create_dir_all(&config.data_dir)?;
    MemoryLedger::open(config.ledger_path())
}
