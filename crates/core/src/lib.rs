pub mod author;
pub mod batch;
pub mod config;
pub mod error;
pub mod interval;
pub mod ledger;
pub mod platform;
pub mod policy;
pub mod submission;

pub use author::AuthorCommunityState;
pub use batch::{BatchId, BatchState, EvaluationBatch};
pub use config::Config;
pub use error::*;
pub use ledger::{Disposition, Ledger, LedgerError, LedgerResult, SubmissionQuery};
pub use platform::{
    BanDuration, CommentHandle, CommunityInfo, Platform, PlatformError, PlatformResult, PostLookup,
    ReplyOptions,
};
pub use policy::{
    ActiveStatus, BanAbility, CommunityPolicy, EnforcementAction, KeywordList, NotifyTemplate,
    PolicySettings,
};
pub use submission::{CountedStatus, PostedStatus, Submission, SubmissionId};
