//! A [`Platform`] that performs nothing and records everything.
//!
//! Backs the worker's dry-run mode and the engine tests. Posted statuses
//! default to `Up` and unknown communities to an active, accessible
//! community; both can be overridden per id, and any call kind can be made
//! to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use postwarden_core::{
    ActiveStatus, BanDuration, CommentHandle, CommunityInfo, Platform, PlatformError,
    PlatformResult, PostLookup, PostedStatus, ReplyOptions, Submission,
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    GetPostedStatus,
    ModRemove,
    Reply,
    SendModmail,
    Ban,
    Message,
    Report,
    GetSubredditInfo,
}

/// One recorded platform call.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformCall {
    pub kind: CallKind,
    /// Submission id, community or author the call addressed.
    pub target: String,
    /// Text payload (comment, message body, reason), if any.
    pub detail: String,
}

#[derive(Default)]
pub struct DryRunPlatform {
    lookups: RwLock<HashMap<String, PostLookup>>,
    communities: RwLock<HashMap<String, CommunityInfo>>,
    missing_communities: RwLock<HashSet<String>>,
    failures: RwLock<HashMap<CallKind, PlatformError>>,
    calls: RwLock<Vec<PlatformCall>>,
    comment_seq: AtomicU64,
}

impl DryRunPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, id: &str, status: PostedStatus) {
        self.set_lookup(id, PostLookup::status(status));
    }

    pub fn set_lookup(&self, id: &str, lookup: PostLookup) {
        self.lookups
            .write()
            .expect("dry-run lock poisoned")
            .insert(id.to_string(), lookup);
    }

    pub fn set_community(&self, info: CommunityInfo) {
        self.communities
            .write()
            .expect("dry-run lock poisoned")
            .insert(info.name.to_lowercase(), info);
    }

    /// Make the platform report `community` as nonexistent.
    pub fn remove_community(&self, community: &str) {
        self.missing_communities
            .write()
            .expect("dry-run lock poisoned")
            .insert(community.to_lowercase());
    }

    /// Fail every call of `kind` with `error` until cleared.
    pub fn fail(&self, kind: CallKind, error: PlatformError) {
        self.failures
            .write()
            .expect("dry-run lock poisoned")
            .insert(kind, error);
    }

    pub fn clear_failure(&self, kind: CallKind) {
        self.failures.write().expect("dry-run lock poisoned").remove(&kind);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.read().expect("dry-run lock poisoned").clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<PlatformCall> {
        self.calls
            .read()
            .expect("dry-run lock poisoned")
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, kind: CallKind) -> usize {
        self.calls
            .read()
            .expect("dry-run lock poisoned")
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    /// Record the call, then return the injected failure for its kind.
    fn record(&self, kind: CallKind, target: &str, detail: impl Into<String>) -> PlatformResult<()> {
        let call = PlatformCall {
            kind,
            target: target.to_string(),
            detail: detail.into(),
        };
        info!(platform = "dry-run", kind = ?call.kind, target = %call.target, "platform call");
        self.calls.write().expect("dry-run lock poisoned").push(call);
        match self.failures.read().expect("dry-run lock poisoned").get(&kind) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Platform for DryRunPlatform {
    fn platform_name(&self) -> &str {
        "dry-run"
    }

    async fn get_posted_status(&self, submission: &Submission) -> PlatformResult<PostLookup> {
        self.record(CallKind::GetPostedStatus, &submission.id, "")?;
        Ok(self
            .lookups
            .read()
            .expect("dry-run lock poisoned")
            .get(&submission.id)
            .cloned()
            .unwrap_or_else(|| PostLookup::status(PostedStatus::Up)))
    }

    async fn mod_remove(&self, submission: &Submission) -> PlatformResult<bool> {
        self.record(CallKind::ModRemove, &submission.id, "")?;
        Ok(true)
    }

    async fn reply(
        &self,
        submission: &Submission,
        text: &str,
        options: ReplyOptions,
    ) -> PlatformResult<Option<CommentHandle>> {
        self.record(CallKind::Reply, &submission.id, text)?;
        let seq = self.comment_seq.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            distinguish = options.distinguish,
            sticky = options.sticky,
            lock = options.lock_thread,
            "dry-run reply"
        );
        Ok(Some(CommentHandle {
            id: format!("c{seq}"),
        }))
    }

    async fn send_modmail(
        &self,
        community: &str,
        subject: &str,
        body: &str,
        _use_same_thread: bool,
    ) -> PlatformResult<()> {
        self.record(CallKind::SendModmail, community, format!("{subject}\n{body}"))
    }

    async fn ban(
        &self,
        community: &str,
        author: &str,
        duration: BanDuration,
        reason: &str,
        message: &str,
    ) -> PlatformResult<()> {
        let days = match duration {
            BanDuration::Days(d) => d.to_string(),
            BanDuration::Permanent => "permanent".to_string(),
        };
        self.record(
            CallKind::Ban,
            &format!("{community}/{author}"),
            format!("{days}|{reason}|{message}"),
        )
    }

    async fn message(&self, author: &str, subject: &str, body: &str) -> PlatformResult<()> {
        self.record(CallKind::Message, author, format!("{subject}\n{body}"))
    }

    async fn report(&self, submission: &Submission, reason: &str) -> PlatformResult<()> {
        self.record(CallKind::Report, &submission.id, reason)
    }

    async fn get_subreddit_info(&self, community: &str) -> PlatformResult<Option<CommunityInfo>> {
        self.record(CallKind::GetSubredditInfo, community, "")?;
        let key = community.to_lowercase();
        if self.missing_communities.read().expect("dry-run lock poisoned").contains(&key) {
            return Ok(None);
        }
        let known = self
            .communities
            .read()
            .expect("dry-run lock poisoned")
            .get(&key)
            .cloned();
        Ok(Some(known.unwrap_or(CommunityInfo {
            name: key,
            subscribers: 1_000,
            moderators: Vec::new(),
            active_status: ActiveStatus::Active,
            is_nsfw: false,
        })))
    }
}
