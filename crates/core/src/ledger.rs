//! Persistence seam: submissions, community policies, author state and
//! evaluation batches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::author::AuthorCommunityState;
use crate::batch::{BatchId, EvaluationBatch};
use crate::policy::CommunityPolicy;
use crate::submission::Submission;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Coarse `counted_status` classes a query can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pending or `Counts`.
    Countable,
    ConfirmedViolation,
    PendingRemoval,
}

impl Disposition {
    pub fn includes(&self, s: &Submission) -> bool {
        let status = s.counted_status;
        match self {
            Disposition::Countable => status.is_countable(),
            Disposition::ConfirmedViolation => status.is_confirmed_violation(),
            Disposition::PendingRemoval => status.is_pending_removal(),
        }
    }
}

/// Submission filter. Every set field must match; results are ordered by
/// `created_at` then id.
#[derive(Debug, Clone, Default)]
pub struct SubmissionQuery {
    pub community: Option<String>,
    pub author: Option<String>,
    /// Exclusive lower bound on `created_at`.
    pub posted_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub posted_before: Option<DateTime<Utc>>,
    pub reviewed: Option<bool>,
    pub disposition: Option<Disposition>,
    /// Only submissions with a staged enforcement comment.
    pub staged_comment: bool,
    pub limit: Option<usize>,
}

impl SubmissionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn community(mut self, community: &str) -> Self {
        self.community = Some(community.to_lowercase());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn posted_after(mut self, at: DateTime<Utc>) -> Self {
        self.posted_after = Some(at);
        self
    }

    pub fn posted_before(mut self, at: DateTime<Utc>) -> Self {
        self.posted_before = Some(at);
        self
    }

    pub fn reviewed(mut self, reviewed: bool) -> Self {
        self.reviewed = Some(reviewed);
        self
    }

    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = Some(disposition);
        self
    }

    pub fn with_staged_comment(mut self) -> Self {
        self.staged_comment = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, s: &Submission) -> bool {
        if let Some(c) = &self.community {
            if &s.community != c {
                return false;
            }
        }
        if let Some(a) = &self.author {
            if &s.author != a {
                return false;
            }
        }
        if self.posted_after.is_some_and(|t| s.created_at <= t) {
            return false;
        }
        if self.posted_before.is_some_and(|t| s.created_at >= t) {
            return false;
        }
        if self.reviewed.is_some_and(|r| s.reviewed != r) {
            return false;
        }
        if self.disposition.is_some_and(|d| !d.includes(s)) {
            return false;
        }
        if self.staged_comment && s.reply_comment.is_none() {
            return false;
        }
        true
    }
}

/// Durable storage used by the engine. Writes may be buffered until
/// [`Ledger::commit`].
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_submission(&self, id: &str) -> LedgerResult<Option<Submission>>;
    async fn upsert_submission(&self, submission: &Submission) -> LedgerResult<()>;
    async fn query_submissions(&self, query: &SubmissionQuery) -> LedgerResult<Vec<Submission>>;

    async fn get_policy(&self, community: &str) -> LedgerResult<Option<CommunityPolicy>>;
    async fn upsert_policy(&self, policy: &CommunityPolicy) -> LedgerResult<()>;
    async fn list_policies(&self) -> LedgerResult<Vec<CommunityPolicy>>;

    async fn get_author_state(
        &self,
        community: &str,
        author: &str,
    ) -> LedgerResult<Option<AuthorCommunityState>>;
    async fn upsert_author_state(&self, state: &AuthorCommunityState) -> LedgerResult<()>;
    /// Author states whose `next_eligible` is later than `after`.
    async fn lockouts_after(&self, after: DateTime<Utc>) -> LedgerResult<Vec<AuthorCommunityState>>;

    async fn get_batch(&self, id: &BatchId) -> LedgerResult<Option<EvaluationBatch>>;
    async fn upsert_batch(&self, batch: &EvaluationBatch) -> LedgerResult<()>;
    /// Open batches for one (community, author) pair, or all when `None`.
    async fn open_batches(
        &self,
        pair: Option<(&str, &str)>,
    ) -> LedgerResult<Vec<EvaluationBatch>>;

    async fn commit(&self) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::submission::CountedStatus;

    #[test]
    fn query_bounds_are_exclusive() {
        let now = Utc::now();
        let s = Submission::new("x", "a", "c", now, "t");
        assert!(!SubmissionQuery::new().posted_after(now).matches(&s));
        assert!(!SubmissionQuery::new().posted_before(now).matches(&s));
        assert!(SubmissionQuery::new()
            .posted_after(now - Duration::seconds(1))
            .posted_before(now + Duration::seconds(1))
            .matches(&s));
    }

    #[test]
    fn disposition_filters() {
        let mut s = Submission::new("x", "a", "C", Utc::now(), "t");
        let countable = SubmissionQuery::new().community("c").disposition(Disposition::Countable);
        assert!(countable.matches(&s));
        s.set_counted_status(CountedStatus::NeedRemove).unwrap();
        assert!(!countable.matches(&s));
        assert!(SubmissionQuery::new()
            .disposition(Disposition::ConfirmedViolation)
            .matches(&s));
        assert!(SubmissionQuery::new()
            .disposition(Disposition::PendingRemoval)
            .matches(&s));
        assert!(!SubmissionQuery::new().with_staged_comment().matches(&s));
    }
}
