//! [`EnforcementEngine`]: one enforcement pass over every monitored
//! community.
//!
//! A pass runs, in order: the blacklist sweep, detection (with recovery of
//! open batches), group processing, the removal sweep and the comment sweep.
//! The pass stops early once its wall-clock budget is spent; anything left
//! over stays in the ledger and is picked up by the next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use postwarden_core::config::{BotConfig, EngineConfig};
use postwarden_core::{
    AuthorCommunityState, CommunityPolicy, Config, CountedStatus, Disposition, EvaluationBatch,
    Ledger, Platform, PolicySettings, PostedStatus, Submission, SubmissionId, SubmissionQuery,
};
use postwarden_notify::{AdvisoryDispatcher, MessageComposer};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::action_log::{ActionKind, ActionLog, LogLevel};
use crate::arbiter::{self, Decision};
use crate::budget::PassBudget;
use crate::classifier;
use crate::detector::{self, DetectionStats};
use crate::enforcement;
use crate::error::{EngineError, Result};
use crate::escalation::{self, EscalationOutcome};
use crate::policy_cache::{PolicyCache, RefreshReport};

/// Everything a pass step needs besides the policy cache.
pub struct Services {
    pub platform: Arc<dyn Platform>,
    pub ledger: Arc<dyn Ledger>,
    pub composer: MessageComposer,
    pub dispatcher: AdvisoryDispatcher,
    pub config: EngineConfig,
    pub actions: Arc<ActionLog>,
}

/// Summary of one pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub policies: RefreshReport,
    pub detection: DetectionStats,
    pub groups_completed: usize,
    pub groups_deferred: usize,
    pub groups_abandoned: usize,
    pub groups_failed: usize,
    pub classified: usize,
    pub hall_passes: usize,
    pub violations: usize,
    pub warnings: usize,
    pub bans: usize,
    pub soft_blacklists: usize,
    /// Submissions caught by an existing lock-out.
    pub blacklisted: usize,
    pub removed: usize,
    pub remove_failed: usize,
    pub aged_out: usize,
    pub comments_posted: usize,
    pub comments_dropped: usize,
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    Completed,
    /// Left open for the next pass (budget or transient failure).
    Deferred,
    Abandoned,
}

pub struct EnforcementEngine {
    pub(crate) services: Services,
    pub(crate) policies: PolicyCache,
}

impl EnforcementEngine {
    pub fn new(
        platform: Arc<dyn Platform>,
        ledger: Arc<dyn Ledger>,
        bot: &BotConfig,
        config: EngineConfig,
        policies: PolicyCache,
    ) -> Self {
        let services = Services {
            dispatcher: AdvisoryDispatcher::new(platform.clone()),
            composer: MessageComposer::new(bot.name.clone(), bot.link_base.clone()),
            platform,
            ledger,
            config,
            actions: Arc::new(ActionLog::new()),
        };
        Self { services, policies }
    }

    pub fn from_config(platform: Arc<dyn Platform>, ledger: Arc<dyn Ledger>, config: &Config) -> Self {
        Self::new(
            platform,
            ledger,
            &config.bot,
            config.engine.clone(),
            PolicyCache::new(config.policy.cache_ttl, config.policy.min_subscribers),
        )
    }

    pub fn actions(&self) -> Arc<ActionLog> {
        self.services.actions.clone()
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.services.ledger.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Install the settings of enabled policy documents, keyed by community.
    pub fn set_policy_documents(&mut self, documents: HashMap<String, PolicySettings>) {
        self.policies.set_documents(documents);
    }

    pub async fn run_pass(&mut self) -> Result<PassReport> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass as of `now`.
    pub async fn run_pass_at(&mut self, now: DateTime<Utc>) -> Result<PassReport> {
        let mut budget = PassBudget::new(self.services.config.pass_budget, self.services.config.commit_every);
        let mut report = PassReport {
            started_at: now,
            ..Default::default()
        };
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();

        report.policies = self
            .policies
            .begin_pass(platform.as_ref(), ledger.as_ref(), now)
            .await?;

        self.sweep_blacklist(now, &mut report).await?;

        let enforcing: Vec<CommunityPolicy> = self.policies.enforcing().into_iter().cloned().collect();
        let detection = detector::detect(
            ledger.as_ref(),
            &enforcing,
            &self.services.config,
            &self.services.actions,
            now,
        )
        .await?;
        report.detection = detection.stats;

        for batch in detection.groups {
            if budget.exceeded() {
                report.budget_exhausted = true;
                break;
            }
            let (community, author, id) = (batch.community.clone(), batch.author.clone(), batch.id);
            match self.process_group(batch, &mut budget, &mut report, now).await {
                Ok(GroupOutcome::Completed) => report.groups_completed += 1,
                Ok(GroupOutcome::Deferred) => report.groups_deferred += 1,
                Ok(GroupOutcome::Abandoned) => report.groups_abandoned += 1,
                Err(e) => {
                    // The batch stays open and is retried next pass.
                    error!(community = %community, author = %author, batch = %id, error = %e, "group processing failed");
                    self.services.actions.log(
                        &community,
                        LogLevel::Error,
                        ActionKind::Recovery,
                        None,
                        format!("group for {author} failed: {e}"),
                    );
                    report.groups_failed += 1;
                    ledger.commit().await?;
                }
            }
        }

        self.sweep_removals(now, &mut budget, &mut report).await?;
        self.sweep_comments(now, &mut budget, &mut report).await?;
        if budget.exceeded() {
            report.budget_exhausted = true;
        }

        ledger.commit().await?;
        report.duration_ms = budget.elapsed_ms();
        info!(
            groups = report.groups_completed,
            deferred = report.groups_deferred,
            violations = report.violations,
            removed = report.removed,
            comments = report.comments_posted,
            budget_exhausted = report.budget_exhausted,
            duration_ms = report.duration_ms,
            "pass complete"
        );
        Ok(report)
    }

    // ── Group processing ────────────────────────────────────────────

    async fn process_group(
        &mut self,
        mut batch: EvaluationBatch,
        budget: &mut PassBudget,
        report: &mut PassReport,
        now: DateTime<Utc>,
    ) -> Result<GroupOutcome> {
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();

        let policy = self
            .policies
            .get(&batch.community, platform.as_ref(), ledger.as_ref(), now)
            .await?;
        let Some(mut policy) = policy.filter(|p| p.is_enforcing()) else {
            batch.abandon("community is not enforcing");
            ledger.upsert_batch(&batch).await?;
            return Ok(GroupOutcome::Abandoned);
        };

        let mut ws = Workspace::default();
        for id in &batch.member_ids {
            match ledger.get_submission(id).await? {
                Some(s) => ws.insert(s),
                None => {
                    let err = EngineError::DataConsistency(format!(
                        "batch {} references missing submission {id}",
                        batch.id
                    ));
                    warn!(community = %batch.community, author = %batch.author, error = %err, "abandoning batch");
                    self.services.actions.log(
                        &batch.community,
                        LogLevel::Error,
                        ActionKind::Recovery,
                        Some(id),
                        err.to_string(),
                    );
                    batch.abandon(err.to_string());
                    ledger.upsert_batch(&batch).await?;
                    return Ok(GroupOutcome::Abandoned);
                }
            }
        }

        let mut author_state = ledger.get_author_state(&batch.community, &batch.author).await?;
        let mut deferred = false;
        let mut to_verify: Vec<SubmissionId> = Vec::new();

        // Lock-outs and classification of every unreviewed member.
        for id in &batch.member_ids {
            if budget.exceeded() {
                deferred = true;
                break;
            }
            let mut s = ws.get(id).clone();
            if s.reviewed {
                continue;
            }
            if let Some(state) = author_state.as_ref().filter(|st| st.blocks(s.created_at)) {
                if s.counted_status.is_countable() {
                    self.apply_lockout(&policy, &mut s, state).await?;
                    report.blacklisted += 1;
                    ws.put(s);
                    continue;
                }
            }
            if self.classify_into(&policy, &mut s, now, report).await? {
                if s.counted_status == CountedStatus::Counts {
                    to_verify.push(s.id.clone());
                }
            } else {
                deferred = true;
            }
            ws.put(s);
            if budget.record_item() {
                ws.flush(ledger.as_ref()).await?;
                ledger.commit().await?;
            }
        }
        ws.flush(ledger.as_ref()).await?;

        // Candidate priors: every counting post that could fall inside the
        // window of the earliest submission being verified.
        let mut candidates: Vec<SubmissionId> = Vec::new();
        if let (Some(first), Some(last)) = (to_verify.first(), to_verify.last()) {
            let first_at = ws.get(first).created_at;
            let last_at = ws.get(last).created_at;
            let rows = ledger
                .query_submissions(
                    &SubmissionQuery::new()
                        .community(&batch.community)
                        .author(&batch.author)
                        .posted_after(first_at - policy.interval() + policy.grace())
                        .posted_before(last_at)
                        .disposition(Disposition::Countable),
                )
                .await?;
            for row in rows {
                let id = row.id.clone();
                if !ws.contains(&id) {
                    ws.insert(row);
                }
                let mut c = ws.get(&id).clone();
                if c.counted_status.is_pending() {
                    if !self.classify_into(&policy, &mut c, now, report).await? {
                        deferred = true;
                    }
                    ws.put(c);
                }
                if ws.get(&id).counted_status == CountedStatus::Counts {
                    candidates.push(id);
                }
            }
            ws.flush(ledger.as_ref()).await?;
        }

        // An unclassified post could be evidence; verify once all are known.
        let verify: &[SubmissionId] = if deferred { &[] } else { &to_verify };
        for id in verify {
            if budget.exceeded() {
                deferred = true;
                break;
            }
            let current = ws.get(id).clone();
            if current.reviewed {
                continue;
            }
            // Priors enforced earlier in this group no longer count.
            let priors: Vec<Submission> = candidates
                .iter()
                .map(|c| ws.get(c))
                .filter(|s| s.counted_status == CountedStatus::Counts)
                .cloned()
                .collect();
            let arbitration = match arbiter::arbitrate(
                platform.as_ref(),
                &policy,
                &current,
                &priors,
                self.services.config.grace_cap,
            )
            .await
            {
                Ok(a) => a,
                Err(e) if e.is_transient() => {
                    warn!(id = %current.id, error = %e, "arbitration deferred");
                    deferred = true;
                    continue;
                }
                Err(e) => return Err(e),
            };
            for (prior_id, status) in &arbitration.observed {
                ws.observe(prior_id, *status, now);
            }

            let mut current = current;
            let hall_passes = author_state.as_ref().map_or(0, |s| s.hall_pass);
            match arbiter::decide(
                arbitration.evidence.len(),
                policy.settings.max_count_per_interval,
                hall_passes,
            ) {
                Decision::NotEnough => {
                    current.reviewed = true;
                    debug!(id = %current.id, evidence = arbitration.evidence.len(), "within limit");
                }
                Decision::HallPass => {
                    let mut state = author_state
                        .take()
                        .unwrap_or_else(|| AuthorCommunityState::new(&batch.community, &batch.author));
                    state.consume_hall_pass();
                    state.updated_at = now;
                    ledger.upsert_author_state(&state).await?;
                    author_state = Some(state);

                    current.set_counted_status(CountedStatus::HallPass)?;
                    current.reviewed = true;
                    let note = self.services.composer.hall_pass_notice(&current);
                    self.services.dispatcher.modmail(&policy.community, &note, false).await;
                    self.services.actions.log(
                        &policy.community,
                        LogLevel::Info,
                        ActionKind::HallPass,
                        Some(&current.id),
                        format!("hall pass used by {}", current.author),
                    );
                    report.hall_passes += 1;
                }
                Decision::Enforce => {
                    let evidence: Vec<Submission> =
                        arbitration.evidence.iter().map(|e| ws.get(e).clone()).collect();
                    let outcome =
                        enforcement::enforce(&self.services, &policy, &mut current, &evidence, now).await?;
                    if outcome.locked_until.is_some() {
                        report.soft_blacklists += 1;
                    }
                    for e in &arbitration.evidence {
                        ws.get_mut(e).pre_duplicate = true;
                        ws.touch(e);
                    }
                    ws.put(current.clone());
                    ws.flush(ledger.as_ref()).await?;
                    ledger.commit().await?;
                    report.violations += 1;

                    let escalation =
                        escalation::escalate(&self.services, &mut policy, &current, &evidence, now).await?;
                    if escalation.policy_changed {
                        self.policies.update(policy.clone(), ledger.as_ref()).await?;
                    }
                    match escalation.outcome {
                        EscalationOutcome::Warned { .. } => report.warnings += 1,
                        EscalationOutcome::Banned { .. } => report.bans += 1,
                        EscalationOutcome::SoftBlacklisted { .. } => report.soft_blacklists += 1,
                        _ => {}
                    }
                    author_state = ledger.get_author_state(&batch.community, &batch.author).await?;
                    ledger.commit().await?;
                }
            }
            ws.put(current);
            if budget.record_item() {
                ws.flush(ledger.as_ref()).await?;
                ledger.commit().await?;
            }
        }
        ws.flush(ledger.as_ref()).await?;

        if deferred {
            batch.updated_at = now;
            ledger.upsert_batch(&batch).await?;
            ledger.commit().await?;
            return Ok(GroupOutcome::Deferred);
        }
        batch.complete();
        ledger.upsert_batch(&batch).await?;
        ledger.commit().await?;
        Ok(GroupOutcome::Completed)
    }

    /// Classify `s` and record the result on it. Returns `false` when a
    /// transient platform error left it for a later pass.
    async fn classify_into(
        &self,
        policy: &CommunityPolicy,
        s: &mut Submission,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<bool> {
        let classification = match classifier::classify(
            self.services.platform.as_ref(),
            self.services.ledger.as_ref(),
            policy,
            s,
            now,
            self.services.config.status_freshness,
        )
        .await
        {
            Ok(c) => c,
            Err(e) if e.is_transient() => {
                warn!(id = %s.id, error = %e, "classification deferred");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if classification.status != s.counted_status {
            s.set_counted_status(classification.status)?;
            report.classified += 1;
            self.services.actions.log(
                &policy.community,
                LogLevel::Debug,
                ActionKind::Classification,
                Some(&s.id),
                format!("{}: {}", classification.status, classification.reason),
            );
        }
        Ok(true)
    }
}

/// Working copies of the submissions a group touches. Writes are buffered
/// and flushed to the ledger in one go.
#[derive(Default)]
struct Workspace {
    rows: HashMap<SubmissionId, Submission>,
    dirty: HashSet<SubmissionId>,
}

impl Workspace {
    fn insert(&mut self, s: Submission) {
        self.rows.insert(s.id.clone(), s);
    }

    fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Callers only ask for ids they inserted.
    fn get(&self, id: &str) -> &Submission {
        &self.rows[id]
    }

    fn get_mut(&mut self, id: &str) -> &mut Submission {
        self.rows.get_mut(id).expect("workspace row present")
    }

    fn touch(&mut self, id: &str) {
        self.dirty.insert(id.to_string());
    }

    fn put(&mut self, s: Submission) {
        self.dirty.insert(s.id.clone());
        self.rows.insert(s.id.clone(), s);
    }

    fn observe(&mut self, id: &str, status: PostedStatus, at: DateTime<Utc>) {
        if let Some(row) = self.rows.get_mut(id) {
            row.observe_posted_status(status, at);
            self.dirty.insert(id.to_string());
        }
    }

    async fn flush(&mut self, ledger: &dyn Ledger) -> Result<()> {
        for id in self.dirty.drain() {
            if let Some(row) = self.rows.get(&id) {
                ledger.upsert_submission(row).await?;
            }
        }
        Ok(())
    }
}
