//! Outbound text and advisory delivery for enforcement actions.
//!
//! This crate provides:
//! - Minijinja template rendering for moderator-written messages, with
//!   rewriting of legacy single-brace tags
//! - `MessageComposer` for every comment, message and report reason
//! - `AdvisoryDispatcher`, which delivers modmail, author messages and
//!   reports without ever failing the caller

pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod templating;

pub use dispatcher::{AdvisoryChannel, AdvisoryDispatcher, AdvisoryResult, Notification};
pub use error::NotifyError;
pub use messages::MessageComposer;
pub use templating::{MessageContext, TemplateRenderer};
