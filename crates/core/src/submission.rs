//! Submission records and their two status lifecycles.
//!
//! `PostedStatus` mirrors what the platform currently shows for a post;
//! `CountedStatus` is the engine's own disposition. Both only move along the
//! edges allowed by their transition tables.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::BatchId;
use crate::error::CoreError;

/// Platform-assigned submission identifier.
pub type SubmissionId = String;

// ── Posted status ───────────────────────────────────────────────────

/// Live visibility of a submission on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostedStatus {
    Unknown,
    Up,
    SelfDeleted,
    ModRemoved,
    AutoModRemoved,
    BotRemoved,
    FlairHelperRemoved,
    SpamFiltered,
    Unavailable,
}

impl PostedStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PostedStatus::Unknown => "Unknown status",
            PostedStatus::Up => "up",
            PostedStatus::SelfDeleted => "self-deleted",
            PostedStatus::ModRemoved => "mod-removed",
            PostedStatus::AutoModRemoved => "AutoMod-removed",
            PostedStatus::BotRemoved => "Bot-removed",
            PostedStatus::FlairHelperRemoved => "Flair_Helper removed",
            PostedStatus::SpamFiltered => "Spam-filtered",
            PostedStatus::Unavailable => "Unavailable",
        }
    }


    /// Allowed posted-status edges.
    ///
    /// Nothing returns to `Unknown`. Self-deletion and unavailability are
    /// final apart from a self-deleted post later becoming unavailable.
    /// Removals can be reversed (a moderator approves the post).
    pub fn can_transition_to(self, next: PostedStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (_, PostedStatus::Unknown) => false,
            (PostedStatus::Unknown, _) => true,
            (PostedStatus::SelfDeleted, PostedStatus::Unavailable) => true,
            (PostedStatus::SelfDeleted, _) | (PostedStatus::Unavailable, _) => false,
            _ => true,
        }
    }
}

impl fmt::Display for PostedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Counted status ──────────────────────────────────────────────────

/// The engine's disposition for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountedStatus {
    // Pending: classification still has to run.
    NotChecked,
    PrevExempt,
    Exempted,
    NeedsUpdate,

    // Counts against the author's limit; re-checked while its group is open.
    Counts,

    // Exemptions, in classifier priority order.
    SpamFiltered,
    AutoModRemoved,
    FlairHelperRemoved,
    ModRemoved,
    OcExempt,
    SelfExempt,
    LinkExempt,
    ModPostExempt,
    FlairExempt,
    FlairNotExempt,
    TitleKeywordExempt,
    TitleCriteriaNotMet,

    // Violation handling.
    HallPass,
    Flagged,
    NeedRemove,
    Removed,
    RemoveFailed,
    BlacklistNeedRemove,
    Blacklisted,
    BlacklistRemoveFailed,
    AgedOut,
}

impl CountedStatus {
    /// Classification has not produced a usable answer yet.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            CountedStatus::NotChecked
                | CountedStatus::PrevExempt
                | CountedStatus::Exempted
                | CountedStatus::NeedsUpdate
        )
    }

    /// Eligible to be counted by the detector.
    pub fn is_countable(&self) -> bool {
        self.is_pending() || *self == CountedStatus::Counts
    }

    /// Terminal for the classifier: returned as-is without a platform call.
    pub fn is_settled(&self) -> bool {
        !self.is_countable()
    }


    /// A confirmed frequency violation, counted towards ban escalation.
    pub fn is_confirmed_violation(&self) -> bool {
        matches!(
            self,
            CountedStatus::Flagged
                | CountedStatus::NeedRemove
                | CountedStatus::Removed
                | CountedStatus::RemoveFailed
        )
    }

    /// Waiting for the removal sweep.
    pub fn is_pending_removal(&self) -> bool {
        matches!(self, CountedStatus::NeedRemove | CountedStatus::BlacklistNeedRemove)
    }

    /// Allowed counted-status edges.
    ///
    /// Pending and `Counts` may move anywhere. Everything else is terminal and
    /// only leaves through `NeedsUpdate` (explicit re-evaluation), except the
    /// two removal-pending states which resolve into their sweep outcomes.
    pub fn can_transition_to(self, next: CountedStatus) -> bool {
        use CountedStatus::*;

        if self == next || next == NeedsUpdate {
            return true;
        }
        if self.is_countable() {
            return true;
        }
        match self {
            NeedRemove => matches!(next, Removed | RemoveFailed | AgedOut),
            BlacklistNeedRemove => matches!(next, Blacklisted | BlacklistRemoveFailed | AgedOut),
            _ => false,
        }
    }
}

impl fmt::Display for CountedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ── Submission ──────────────────────────────────────────────────────

/// One observed platform post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub author: String,
    /// Lowercased community name.
    pub community: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub is_self: bool,
    pub is_oc: bool,
    /// Author flair text with its CSS class appended, as last seen.
    #[serde(default)]
    pub author_flair: Option<String>,
    #[serde(default)]
    pub link_flair: Option<String>,

    pub posted_status: PostedStatus,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    pub counted_status: CountedStatus,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub flagged_duplicate: bool,
    #[serde(default)]
    pub pre_duplicate: bool,

    /// Evaluation batch this submission was the latest member of.
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    #[serde(default)]
    pub next_eligible: Option<DateTime<Utc>>,
    /// Enforcement comment staged for the comment sweep.
    #[serde(default)]
    pub reply_comment: Option<String>,
    #[serde(default)]
    pub bot_comment_id: Option<String>,
    #[serde(default)]
    pub removal_attempts: u32,
    pub added_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        community: &str,
        created_at: DateTime<Utc>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            community: community.to_lowercase(),
            created_at,
            title: title.into(),
            is_self: false,
            is_oc: false,
            author_flair: None,
            link_flair: None,
            posted_status: PostedStatus::Unknown,
            last_checked: None,
            counted_status: CountedStatus::NotChecked,
            reviewed: false,
            flagged_duplicate: false,
            pre_duplicate: false,
            batch_id: None,
            next_eligible: None,
            reply_comment: None,
            bot_comment_id: None,
            removal_attempts: 0,
            added_at: Utc::now(),
        }
    }

    /// Move `counted_status`, rejecting edges outside the transition table.
    pub fn set_counted_status(&mut self, next: CountedStatus) -> Result<(), CoreError> {
        if !self.counted_status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                kind: "counted status",
                from: self.counted_status.to_string(),
                to: next.to_string(),
            });
        }
        self.counted_status = next;
        Ok(())
    }

    /// Record a freshly observed posted status. Returns `false` (and keeps the
    /// current value) when the platform reports an impossible edge.
    pub fn observe_posted_status(&mut self, next: PostedStatus, at: DateTime<Utc>) -> bool {
        self.last_checked = Some(at);
        if !self.posted_status.can_transition_to(next) {
            return false;
        }
        self.posted_status = next;
        true
    }

    /// Posted status is unknown or older than `freshness`.
    pub fn needs_status_refresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        if self.posted_status == PostedStatus::Unknown {
            return true;
        }
        match self.last_checked {
            Some(checked) => checked < now - freshness,
            None => true,
        }
    }

    /// Short link to the submission under `link_base` (e.g. `https://redd.it`).
    pub fn link(&self, link_base: &str) -> String {
        format!("{}/{}", link_base.trim_end_matches('/'), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Submission {
        Submission::new("abc", "someone", "Pics", Utc::now(), "A title")
    }

    #[test]
    fn new_submission_is_unchecked_and_lowercased() {
        let s = sample();
        assert_eq!(s.community, "pics");
        assert_eq!(s.counted_status, CountedStatus::NotChecked);
        assert_eq!(s.posted_status, PostedStatus::Unknown);
        assert!(!s.reviewed);
    }

    #[test]
    fn settled_statuses_only_leave_through_needs_update() {
        let mut s = sample();
        s.set_counted_status(CountedStatus::SelfExempt).unwrap();
        assert!(s.set_counted_status(CountedStatus::Counts).is_err());
        assert_eq!(s.counted_status, CountedStatus::SelfExempt);
        s.set_counted_status(CountedStatus::NeedsUpdate).unwrap();
        s.set_counted_status(CountedStatus::Counts).unwrap();
    }

    #[test]
    fn removal_pending_resolves_to_sweep_outcomes() {
        assert!(CountedStatus::NeedRemove.can_transition_to(CountedStatus::Removed));
        assert!(CountedStatus::NeedRemove.can_transition_to(CountedStatus::AgedOut));
        assert!(!CountedStatus::NeedRemove.can_transition_to(CountedStatus::Blacklisted));
        assert!(CountedStatus::BlacklistNeedRemove.can_transition_to(CountedStatus::Blacklisted));
        assert!(!CountedStatus::Removed.can_transition_to(CountedStatus::Flagged));
    }

    #[test]
    fn violation_classes() {
        assert!(CountedStatus::Flagged.is_confirmed_violation());
        assert!(CountedStatus::Removed.is_confirmed_violation());
        assert!(!CountedStatus::HallPass.is_confirmed_violation());
        assert!(!CountedStatus::Blacklisted.is_confirmed_violation());
        assert!(CountedStatus::Counts.is_countable());
        assert!(!CountedStatus::Counts.is_settled());
        assert!(CountedStatus::Flagged.is_settled());
    }

    #[test]
    fn posted_status_rejects_impossible_edges() {
        let mut s = sample();
        let now = Utc::now();
        assert!(s.observe_posted_status(PostedStatus::SelfDeleted, now));
        assert!(!s.observe_posted_status(PostedStatus::Up, now));
        assert_eq!(s.posted_status, PostedStatus::SelfDeleted);
        assert_eq!(s.last_checked, Some(now));
        assert!(PostedStatus::ModRemoved.can_transition_to(PostedStatus::Up));
        assert!(!PostedStatus::Up.can_transition_to(PostedStatus::Unknown));
    }

    #[test]
    fn refresh_needed_when_unknown_or_stale() {
        let now = Utc::now();
        let mut s = sample();
        assert!(s.needs_status_refresh(now, Duration::hours(3)));
        s.observe_posted_status(PostedStatus::Up, now - Duration::hours(1));
        assert!(!s.needs_status_refresh(now, Duration::hours(3)));
        s.last_checked = Some(now - Duration::hours(4));
        assert!(s.needs_status_refresh(now, Duration::hours(3)));
    }

    #[test]
    fn link_joins_base_and_id() {
        assert_eq!(sample().link("https://redd.it/"), "https://redd.it/abc");
    }
}
