//! Posting-frequency enforcement engine.
//!
//! This crate provides:
//! - YAML policy documents per community, with `extends` inheritance
//! - Submission classification against exemption rules
//! - Detection of authors over their community's post limit
//! - Grace-period and hall-pass arbitration, enforcement and escalation
//! - Removal and comment sweeps driven by the ledger
//! - A fixed-interval pass scheduler and a dry-run platform

pub mod action_log;
pub mod arbiter;
pub mod budget;
pub mod classifier;
pub mod detector;
pub mod dry_run;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod ingest;
pub mod loader;
pub mod policy_cache;
pub mod scheduler;
mod sweeps;

pub use action_log::{ActionEntry, ActionKind, ActionLog, ActionQuery, LogLevel};
pub use dry_run::{CallKind, DryRunPlatform, PlatformCall};
pub use engine::{EnforcementEngine, PassReport};
pub use error::{EngineError, Result};
pub use ingest::{IngestReport, NewSubmission};
pub use loader::{PolicyDocument, PolicyLoader};
pub use policy_cache::PolicyCache;
pub use scheduler::PassScheduler;
