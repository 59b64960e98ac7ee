//! Per-pass view of community policies.
//!
//! Entries live for `cache_ttl`. Expired entries are refreshed from the
//! platform only at the start of a pass, so a policy never changes under a
//! pass that is using it, except through [`PolicyCache::update`] when the
//! engine itself records a permission change.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use postwarden_core::{
    ActiveStatus, CommunityInfo, CommunityPolicy, Ledger, Platform, PlatformError, PolicySettings,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;

struct CachedPolicy {
    policy: CommunityPolicy,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
    pub added: usize,
}

pub struct PolicyCache {
    entries: HashMap<String, CachedPolicy>,
    /// Settings of enabled policy documents, keyed by community.
    documents: HashMap<String, PolicySettings>,
    documents_changed: bool,
    ttl: Duration,
    min_subscribers: u64,
}

impl PolicyCache {
    pub fn new(ttl: Duration, min_subscribers: u64) -> Self {
        Self {
            entries: HashMap::new(),
            documents: HashMap::new(),
            documents_changed: false,
            ttl,
            min_subscribers,
        }
    }

    /// Replace the document settings. Cached policies pick them up at the
    /// next [`begin_pass`](Self::begin_pass).
    pub fn set_documents(&mut self, documents: HashMap<String, PolicySettings>) {
        if documents != self.documents {
            self.documents = documents;
            self.documents_changed = true;
        }
    }

    pub fn has_document(&self, community: &str) -> bool {
        self.documents.contains_key(community)
    }

    /// Refresh expired entries and pull in communities that gained a
    /// document. Called once at the start of every pass.
    pub async fn begin_pass(
        &mut self,
        platform: &dyn Platform,
        ledger: &dyn Ledger,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();
        let force = std::mem::take(&mut self.documents_changed);

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| force || now - e.fetched_at >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for community in expired {
            let Some(mut policy) = self.entries.get(&community).map(|e| e.policy.clone()) else {
                continue;
            };
            match platform.get_subreddit_info(&community).await {
                Ok(info) => {
                    self.apply(&mut policy, info.as_ref());
                    report.refreshed += 1;
                }
                Err(e) => {
                    // Keep the stale copy; capability data is retried next pass.
                    warn!(community = %community, error = %e, "policy refresh failed");
                    self.apply_document(&mut policy);
                    report.failed += 1;
                }
            }
            policy.loaded_at = now;
            ledger.upsert_policy(&policy).await?;
            self.entries.insert(
                community,
                CachedPolicy {
                    policy,
                    fetched_at: now,
                },
            );
        }

        let missing: Vec<String> = self
            .documents
            .keys()
            .filter(|c| !self.entries.contains_key(*c))
            .cloned()
            .collect();
        for community in missing {
            match self.get(&community, platform, ledger, now).await {
                Ok(Some(_)) => report.added += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(community = %community, error = %e, "could not load configured community");
                    report.failed += 1;
                }
            }
        }

        debug!(
            refreshed = report.refreshed,
            added = report.added,
            failed = report.failed,
            "policy cache refreshed"
        );
        Ok(report)
    }

    /// The policy for `community`, creating it on first sight.
    ///
    /// Returns `None` when the platform does not know the community or it is
    /// below the subscriber floor.
    pub async fn get(
        &mut self,
        community: &str,
        platform: &dyn Platform,
        ledger: &dyn Ledger,
        now: DateTime<Utc>,
    ) -> Result<Option<CommunityPolicy>> {
        let key = community.to_lowercase();
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Some(entry.policy.clone()));
        }

        if let Some(mut stored) = ledger.get_policy(&key).await? {
            self.apply_document(&mut stored);
            // Stored policies carry their own fetch time; let the TTL decide
            // when they are refreshed.
            let fetched_at = stored.loaded_at;
            self.entries.insert(
                key,
                CachedPolicy {
                    policy: stored.clone(),
                    fetched_at,
                },
            );
            return Ok(Some(stored));
        }

        let info = match platform.get_subreddit_info(&key).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                debug!(community = %key, "community unknown to the platform");
                return Ok(None);
            }
            Err(PlatformError::Forbidden(reason)) | Err(PlatformError::NotFound(reason)) => {
                debug!(community = %key, reason = %reason, "community not accessible");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if info.subscribers < self.min_subscribers {
            debug!(
                community = %key,
                subscribers = info.subscribers,
                min = self.min_subscribers,
                "community below subscriber floor"
            );
            return Ok(None);
        }

        let mut policy = CommunityPolicy::new(&key, PolicySettings::default());
        self.apply(&mut policy, Some(&info));
        policy.loaded_at = now;
        ledger.upsert_policy(&policy).await?;
        info!(
            community = %key,
            status = %policy.active_status,
            subscribers = policy.subscribers,
            "policy created"
        );
        self.entries.insert(
            key,
            CachedPolicy {
                policy: policy.clone(),
                fetched_at: now,
            },
        );
        Ok(Some(policy))
    }

    /// Persist an engine-made change (ban ability, permission status) and
    /// make it visible to the rest of the pass.
    pub async fn update(&mut self, policy: CommunityPolicy, ledger: &dyn Ledger) -> Result<()> {
        ledger.upsert_policy(&policy).await?;
        let fetched_at = self
            .entries
            .get(&policy.community)
            .map(|e| e.fetched_at)
            .unwrap_or(policy.loaded_at);
        self.entries.insert(
            policy.community.clone(),
            CachedPolicy { policy, fetched_at },
        );
        Ok(())
    }

    /// Cached policies that currently run detection and enforcement.
    pub fn enforcing(&self) -> Vec<&CommunityPolicy> {
        let mut out: Vec<&CommunityPolicy> = self
            .entries
            .values()
            .map(|e| &e.policy)
            .filter(|p| p.is_enforcing())
            .collect();
        out.sort_by(|a, b| a.community.cmp(&b.community));
        out
    }

    pub fn cached(&self, community: &str) -> Option<&CommunityPolicy> {
        self.entries.get(&community.to_lowercase()).map(|e| &e.policy)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold platform facts and document settings into `policy`.
    fn apply(&self, policy: &mut CommunityPolicy, info: Option<&CommunityInfo>) {
        match info {
            Some(info) => {
                policy.subscribers = info.subscribers;
                policy.moderators = info.moderators.iter().cloned().collect();
                policy.active_status = info.active_status;
            }
            None => policy.active_status = ActiveStatus::Inaccessible,
        }
        self.apply_document(policy);
    }

    /// Without an enabled document there is nothing to enforce.
    fn apply_document(&self, policy: &mut CommunityPolicy) {
        match self.documents.get(&policy.community) {
            Some(settings) => policy.settings = settings.clone(),
            None => {
                if policy.active_status != ActiveStatus::Inaccessible {
                    policy.active_status = ActiveStatus::Unmonitored;
                }
            }
        }
    }
}
