//! The seam between the engine and the social platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::ActiveStatus;
use crate::submission::{PostedStatus, Submission};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The bot lacks the privilege for this call.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Rate limits, timeouts and server errors; worth retrying later.
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl PlatformError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PlatformError::Forbidden(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Live state of a submission as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostLookup {
    pub posted_status: PostedStatus,
    /// Author flair text with the CSS class appended.
    pub author_flair: Option<String>,
    pub link_flair: Option<String>,
}

impl PostLookup {
    pub fn status(posted_status: PostedStatus) -> Self {
        Self {
            posted_status,
            author_flair: None,
            link_flair: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    pub distinguish: bool,
    pub approve: bool,
    pub lock_thread: bool,
    pub sticky: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanDuration {
    Days(u32),
    Permanent,
}

/// What the platform reports about a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityInfo {
    pub name: String,
    pub subscribers: u64,
    pub moderators: Vec<String>,
    pub active_status: ActiveStatus,
    #[serde(default)]
    pub is_nsfw: bool,
}

/// Every platform operation the engine performs. Each call may fail with a
/// permission or transient error; callers decide which failures matter.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Adapter name for logging.
    fn platform_name(&self) -> &str;

    async fn get_posted_status(&self, submission: &Submission) -> PlatformResult<PostLookup>;

    /// Remove a submission. `Ok(false)` means the platform declined.
    async fn mod_remove(&self, submission: &Submission) -> PlatformResult<bool>;

    async fn reply(
        &self,
        submission: &Submission,
        text: &str,
        options: ReplyOptions,
    ) -> PlatformResult<Option<CommentHandle>>;

    async fn send_modmail(
        &self,
        community: &str,
        subject: &str,
        body: &str,
        use_same_thread: bool,
    ) -> PlatformResult<()>;

    async fn ban(
        &self,
        community: &str,
        author: &str,
        duration: BanDuration,
        reason: &str,
        message: &str,
    ) -> PlatformResult<()>;

    async fn message(&self, author: &str, subject: &str, body: &str) -> PlatformResult<()>;

    async fn report(&self, submission: &Submission, reason: &str) -> PlatformResult<()>;

    /// `Ok(None)` when the community does not exist.
    async fn get_subreddit_info(&self, community: &str) -> PlatformResult<Option<CommunityInfo>>;
}
