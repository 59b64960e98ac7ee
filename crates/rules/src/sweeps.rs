//! Ledger-driven sweeps that run around group processing: lock-outs of
//! blacklisted authors, pending removals and staged comments.

use chrono::{DateTime, Utc};
use postwarden_core::{
    ActiveStatus, AuthorCommunityState, CommunityPolicy, CountedStatus, Disposition, PlatformError,
    ReplyOptions, Submission, SubmissionQuery,
};
use tracing::{debug, info, warn};

use crate::action_log::{ActionKind, LogLevel};
use crate::budget::PassBudget;
use crate::engine::{EnforcementEngine, PassReport};
use crate::error::Result;

impl EnforcementEngine {
    // ── Blacklist ───────────────────────────────────────────────────

    /// Lock out recent, unreviewed submissions by authors serving a soft
    /// blacklist.
    pub(crate) async fn sweep_blacklist(&mut self, now: DateTime<Utc>, report: &mut PassReport) -> Result<()> {
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();
        let since = now - self.services.config.blacklist_lookback;

        for state in ledger.lockouts_after(since).await? {
            let policy = self
                .policies
                .get(&state.community, platform.as_ref(), ledger.as_ref(), now)
                .await?;
            let Some(policy) = policy.filter(|p| p.is_enforcing()) else {
                continue;
            };
            let rows = ledger
                .query_submissions(
                    &SubmissionQuery::new()
                        .community(&state.community)
                        .author(&state.author)
                        .posted_after(since)
                        .reviewed(false)
                        .disposition(Disposition::Countable),
                )
                .await?;
            for mut s in rows {
                if !state.blocks(s.created_at) {
                    continue;
                }
                self.apply_lockout(&policy, &mut s, &state).await?;
                ledger.upsert_submission(&s).await?;
                report.blacklisted += 1;
            }
        }
        ledger.commit().await?;
        Ok(())
    }

    /// Mark `s` for removal under `state`'s lock-out and stage the
    /// blacklist comment.
    pub(crate) async fn apply_lockout(
        &self,
        policy: &CommunityPolicy,
        s: &mut Submission,
        state: &AuthorCommunityState,
    ) -> Result<()> {
        let Some(until) = state.next_eligible else {
            return Ok(());
        };
        s.set_counted_status(CountedStatus::BlacklistNeedRemove)?;
        s.reviewed = true;
        s.flagged_duplicate = true;
        s.next_eligible = Some(until);

        if let Some(template) = policy.settings.comment.as_deref().filter(|c| !c.trim().is_empty()) {
            let last_valid = match &state.last_valid_post {
                Some(id) => self.services.ledger.get_submission(id).await?,
                None => None,
            };
            match self
                .services
                .composer
                .blacklist_comment(policy, template, s, last_valid.as_ref(), until)
            {
                Ok(text) => s.reply_comment = Some(text),
                Err(e) => warn!(id = %s.id, error = %e, "blacklist comment failed to render"),
            }
        }

        info!(community = %policy.community, author = %s.author, id = %s.id, until = %until, "locked-out submission");
        self.services.actions.log(
            &policy.community,
            LogLevel::Info,
            ActionKind::SoftBlacklist,
            Some(&s.id),
            format!("{} is locked out until {until}", s.author),
        );
        Ok(())
    }

    // ── Removals ────────────────────────────────────────────────────

    /// Carry out pending removals.
    pub(crate) async fn sweep_removals(
        &mut self,
        now: DateTime<Utc>,
        budget: &mut PassBudget,
        report: &mut PassReport,
    ) -> Result<()> {
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();
        let rows = ledger
            .query_submissions(&SubmissionQuery::new().disposition(Disposition::PendingRemoval))
            .await?;

        for mut s in rows {
            if budget.exceeded() {
                report.budget_exhausted = true;
                break;
            }
            let (done, failed) = if s.counted_status == CountedStatus::BlacklistNeedRemove {
                (CountedStatus::Blacklisted, CountedStatus::BlacklistRemoveFailed)
            } else {
                (CountedStatus::Removed, CountedStatus::RemoveFailed)
            };

            if s.created_at < now - self.services.config.removal_max_age {
                s.set_counted_status(CountedStatus::AgedOut)?;
                s.reply_comment = None;
                report.aged_out += 1;
                self.services.actions.log(
                    &s.community,
                    LogLevel::Warning,
                    ActionKind::Removal,
                    Some(&s.id),
                    "too old to remove".to_string(),
                );
            } else {
                match platform.mod_remove(&s).await {
                    Ok(true) => {
                        s.set_counted_status(done)?;
                        report.removed += 1;
                        self.services.actions.log(
                            &s.community,
                            LogLevel::Info,
                            ActionKind::Removal,
                            Some(&s.id),
                            format!("removed post by {}", s.author),
                        );
                    }
                    Ok(false) | Err(PlatformError::NotFound(_)) => {
                        s.set_counted_status(failed)?;
                        report.remove_failed += 1;
                        self.removal_failed(&s, "platform did not remove the post");
                    }
                    Err(PlatformError::Forbidden(reason)) => {
                        s.set_counted_status(failed)?;
                        report.remove_failed += 1;
                        self.removal_failed(&s, &reason);
                        self.lost_remove_permission(&s.community, now).await?;
                    }
                    Err(e) => {
                        s.removal_attempts += 1;
                        if s.removal_attempts >= self.services.config.max_removal_attempts {
                            s.set_counted_status(failed)?;
                            report.remove_failed += 1;
                            self.removal_failed(&s, &e.to_string());
                        } else {
                            warn!(id = %s.id, attempts = s.removal_attempts, error = %e, "removal will be retried");
                        }
                    }
                }
            }

            ledger.upsert_submission(&s).await?;
            if budget.record_item() {
                ledger.commit().await?;
            }
        }
        ledger.commit().await?;
        Ok(())
    }

    fn removal_failed(&self, s: &Submission, reason: &str) {
        warn!(community = %s.community, id = %s.id, reason = %reason, "removal failed");
        self.services.actions.log(
            &s.community,
            LogLevel::Error,
            ActionKind::Removal,
            Some(&s.id),
            format!("removal failed: {reason}"),
        );
    }

    async fn lost_remove_permission(&mut self, community: &str, now: DateTime<Utc>) -> Result<()> {
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();
        let Some(mut policy) = self
            .policies
            .get(community, platform.as_ref(), ledger.as_ref(), now)
            .await?
        else {
            return Ok(());
        };
        if policy.active_status == ActiveStatus::LackingRemovePermission {
            return Ok(());
        }
        warn!(community = %community, from = %policy.active_status, "lost remove permission");
        self.services.actions.log(
            community,
            LogLevel::Warning,
            ActionKind::PermissionChange,
            None,
            format!("{} -> {}", policy.active_status, ActiveStatus::LackingRemovePermission),
        );
        policy.active_status = ActiveStatus::LackingRemovePermission;
        self.policies.update(policy, ledger.as_ref()).await
    }

    // ── Comments ────────────────────────────────────────────────────

    /// Post staged comments on submissions whose enforcement is final.
    pub(crate) async fn sweep_comments(
        &mut self,
        now: DateTime<Utc>,
        budget: &mut PassBudget,
        report: &mut PassReport,
    ) -> Result<()> {
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();
        let rows = ledger
            .query_submissions(&SubmissionQuery::new().with_staged_comment())
            .await?;

        for mut s in rows {
            if budget.exceeded() {
                report.budget_exhausted = true;
                break;
            }
            let Some(text) = s.reply_comment.clone() else {
                continue;
            };
            match s.counted_status {
                CountedStatus::Flagged | CountedStatus::Removed | CountedStatus::Blacklisted => {
                    let options = self
                        .policies
                        .get(&s.community, platform.as_ref(), ledger.as_ref(), now)
                        .await?
                        .map(|p| ReplyOptions {
                            distinguish: p.settings.distinguish,
                            approve: p.settings.approve,
                            lock_thread: p.settings.lock_thread,
                            sticky: p.settings.comment_stickied,
                        })
                        .unwrap_or_default();
                    match platform.reply(&s, &text, options).await {
                        Ok(handle) => {
                            s.bot_comment_id = handle.map(|h| h.id);
                            s.reply_comment = None;
                            report.comments_posted += 1;
                            self.services.actions.log(
                                &s.community,
                                LogLevel::Info,
                                ActionKind::Comment,
                                Some(&s.id),
                                "enforcement comment posted".to_string(),
                            );
                        }
                        Err(PlatformError::Transient(reason)) => {
                            warn!(id = %s.id, reason = %reason, "comment will be retried");
                            continue;
                        }
                        Err(e) => {
                            s.reply_comment = None;
                            report.comments_dropped += 1;
                            warn!(id = %s.id, error = %e, "comment dropped");
                            self.services.actions.log(
                                &s.community,
                                LogLevel::Warning,
                                ActionKind::Comment,
                                Some(&s.id),
                                format!("comment dropped: {e}"),
                            );
                        }
                    }
                }
                // Removal still pending; the comment waits for it.
                CountedStatus::NeedRemove | CountedStatus::BlacklistNeedRemove => continue,
                other => {
                    debug!(id = %s.id, status = %other, "staged comment no longer applies");
                    s.reply_comment = None;
                    report.comments_dropped += 1;
                }
            }

            ledger.upsert_submission(&s).await?;
            if budget.record_item() {
                ledger.commit().await?;
            }
        }
        ledger.commit().await?;
        Ok(())
    }
}
