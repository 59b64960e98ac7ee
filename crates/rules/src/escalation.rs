//! Repeat-offender handling: warnings, bans and soft blacklists.

use chrono::{DateTime, Duration, Utc};
use postwarden_core::config::EngineConfig;
use postwarden_core::{
    ActiveStatus, AuthorCommunityState, BanAbility, BanDuration, CommunityPolicy, Disposition,
    PlatformError, Submission, SubmissionQuery,
};
use tracing::{info, warn};

use crate::action_log::{ActionKind, LogLevel};
use crate::engine::Services;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// Bans are off for the community.
    TrackingOnly,
    BelowThreshold { priors: usize },
    Warned { priors: usize },
    Banned { duration: BanDuration },
    SoftBlacklisted { until: DateTime<Utc> },
    /// The ban call failed for a reason worth retrying; nothing recorded.
    BanFailed { error: String },
}

#[derive(Debug, Clone)]
pub struct Escalation {
    pub outcome: EscalationOutcome,
    /// `policy` was modified and needs persisting.
    pub policy_changed: bool,
}

/// Ban days as configured, normalized for the platform: `0` or anything
/// above 998 is permanent, fractions round and never drop below one day.
pub fn normalize_ban_duration(days: f64) -> BanDuration {
    if days == 0.0 || days > 998.0 {
        BanDuration::Permanent
    } else if days < 1.0 {
        BanDuration::Days(1)
    } else {
        BanDuration::Days(days.round() as u32)
    }
}

/// Lock-out standing in for a ban the bot may not issue. Temporary bans
/// keep their length up to the configured cap.
pub fn blacklist_until(now: DateTime<Utc>, duration: BanDuration, config: &EngineConfig) -> DateTime<Utc> {
    match duration {
        BanDuration::Permanent => now + Duration::days(config.permanent_blacklist_days),
        BanDuration::Days(days) => {
            now + Duration::days((days as i64).min(config.no_permission_blacklist_days))
        }
    }
}

/// Escalate after `submission` was enforced on `evidence`. Counts the
/// author's confirmed violations before it and warns, bans or locks out.
pub async fn escalate(
    services: &Services,
    policy: &mut CommunityPolicy,
    submission: &Submission,
    evidence: &[Submission],
    now: DateTime<Utc>,
) -> Result<Escalation> {
    let mut policy_changed = false;

    let Some(days) = policy.settings.ban_duration_days else {
        if policy.ban_ability != BanAbility::Disabled {
            policy.ban_ability = BanAbility::Disabled;
            policy_changed = true;
        }
        return Ok(Escalation {
            outcome: EscalationOutcome::TrackingOnly,
            policy_changed,
        });
    };

    let priors = services
        .ledger
        .query_submissions(
            &SubmissionQuery::new()
                .community(&submission.community)
                .author(&submission.author)
                .posted_before(submission.created_at)
                .disposition(Disposition::ConfirmedViolation),
        )
        .await?;
    let threshold = policy.settings.ban_threshold_count as usize;

    if threshold > 1 && priors.len() == threshold - 1 {
        let next_eligible = evidence
            .first()
            .map(|e| e.created_at)
            .unwrap_or(submission.created_at)
            + policy.interval();
        let note = services.composer.warning_message(policy, submission, next_eligible);
        let result = services.dispatcher.message(&submission.author, &note).await;
        services.actions.log(
            &policy.community,
            if result.success { LogLevel::Info } else { LogLevel::Warning },
            ActionKind::Warning,
            Some(&submission.id),
            format!("{} warned at {} prior violations", submission.author, priors.len()),
        );
        return Ok(Escalation {
            outcome: EscalationOutcome::Warned { priors: priors.len() },
            policy_changed,
        });
    }
    if priors.len() < threshold {
        return Ok(Escalation {
            outcome: EscalationOutcome::BelowThreshold { priors: priors.len() },
            policy_changed,
        });
    }

    let duration = normalize_ban_duration(days);
    if policy.ban_ability == BanAbility::NoPermission {
        let until = blacklist_until(now, duration, &services.config);
        soft_blacklist(services, policy, submission, until, now).await?;
        return Ok(Escalation {
            outcome: EscalationOutcome::SoftBlacklisted { until },
            policy_changed,
        });
    }

    let message = services.composer.ban_message(policy, &priors, duration);
    let reason = services.composer.ban_reason();
    let outcome = match services
        .platform
        .ban(&policy.community, &submission.author, duration, &reason, &message)
        .await
    {
        Ok(()) => {
            if matches!(policy.ban_ability, BanAbility::Unknown | BanAbility::Disabled) {
                policy.ban_ability = BanAbility::Enabled;
                policy_changed = true;
            }
            info!(
                community = %policy.community,
                author = %submission.author,
                duration = ?duration,
                priors = priors.len(),
                "author banned"
            );
            services.actions.log(
                &policy.community,
                LogLevel::Info,
                ActionKind::Ban,
                Some(&submission.id),
                format!("{} banned ({duration:?})", submission.author),
            );
            EscalationOutcome::Banned { duration }
        }
        Err(PlatformError::Forbidden(refusal)) => {
            warn!(community = %policy.community, reason = %refusal, "ban refused, falling back to soft blacklist");
            policy.ban_ability = BanAbility::NoPermission;
            if policy.active_status == ActiveStatus::Active {
                policy.active_status = ActiveStatus::LackingBanPermission;
            }
            policy_changed = true;
            services.actions.log(
                &policy.community,
                LogLevel::Warning,
                ActionKind::PermissionChange,
                Some(&submission.id),
                format!("ban refused: {refusal}"),
            );
            if policy.settings.notify_about_spammers {
                let note = services.composer.ban_failure_modmail(&priors, submission);
                services.dispatcher.modmail(&policy.community, &note, false).await;
            }
            let until = blacklist_until(now, duration, &services.config);
            soft_blacklist(services, policy, submission, until, now).await?;
            EscalationOutcome::SoftBlacklisted { until }
        }
        Err(e) => {
            warn!(community = %policy.community, author = %submission.author, error = %e, "ban failed");
            services.actions.log(
                &policy.community,
                LogLevel::Error,
                ActionKind::Ban,
                Some(&submission.id),
                format!("ban of {} failed: {e}", submission.author),
            );
            EscalationOutcome::BanFailed { error: e.to_string() }
        }
    };

    Ok(Escalation {
        outcome,
        policy_changed,
    })
}

/// Lock `submission`'s author out of the community until `until`. The
/// lock-out only ever grows. Commits.
pub async fn soft_blacklist(
    services: &Services,
    policy: &CommunityPolicy,
    submission: &Submission,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<AuthorCommunityState> {
    let ledger = services.ledger.as_ref();
    let mut state = ledger
        .get_author_state(&policy.community, &submission.author)
        .await?
        .unwrap_or_else(|| AuthorCommunityState::new(&policy.community, &submission.author));
    let extended = state.extend_eligibility(until);
    state.last_valid_post = Some(submission.id.clone());
    state.updated_at = now;
    ledger.upsert_author_state(&state).await?;
    ledger.commit().await?;

    if extended {
        info!(
            community = %policy.community,
            author = %submission.author,
            until = %until,
            "author soft-blacklisted"
        );
        services.actions.log(
            &policy.community,
            LogLevel::Info,
            ActionKind::SoftBlacklist,
            Some(&submission.id),
            format!("{} locked out until {until}", submission.author),
        );
    }
    Ok(state)
}
