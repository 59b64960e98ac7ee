//! Applies a policy's configured response to a confirmed violation.
//!
//! Removal and the enforcement comment are staged on the submission and
//! carried out by the sweeps; advisories (modmail, report, author message)
//! go out immediately and never fail the enforcement.

use chrono::{DateTime, Utc};
use postwarden_core::{CommunityPolicy, CountedStatus, EnforcementAction, Submission};
use postwarden_notify::AdvisoryResult;
use tracing::{info, warn};

use crate::action_log::{ActionKind, LogLevel};
use crate::engine::Services;
use crate::error::Result;
use crate::escalation;

#[derive(Debug, Clone)]
pub struct EnforcementOutcome {
    pub status: CountedStatus,
    pub next_eligible: DateTime<Utc>,
    pub comment_staged: bool,
    pub advisories: Vec<AdvisoryResult>,
    /// Set when the author was locked out straight away for heavy evidence.
    pub locked_until: Option<DateTime<Utc>>,
}

/// Mark `submission` as a violation backed by `evidence` (oldest first, at
/// least one entry) and send the configured advisories.
///
/// The caller persists `submission` and flags the evidence.
pub async fn enforce(
    services: &Services,
    policy: &CommunityPolicy,
    submission: &mut Submission,
    evidence: &[Submission],
    now: DateTime<Utc>,
) -> Result<EnforcementOutcome> {
    let settings = &policy.settings;
    let composer = &services.composer;
    let dispatcher = &services.dispatcher;
    let next_eligible = evidence
        .first()
        .map(|e| e.created_at)
        .unwrap_or(submission.created_at)
        + policy.interval();
    let mut advisories = Vec::new();

    let mut comment_staged = false;
    if let Some(template) = settings.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        match composer.violation_comment(policy, template, submission, evidence, next_eligible) {
            Ok(text) => {
                submission.reply_comment = Some(text);
                comment_staged = true;
            }
            Err(e) => template_failed(services, submission, "comment", &e.to_string()),
        }
    }

    if let Some(rendered) = composer.violation_modmail(policy, submission, evidence.last()) {
        match rendered {
            Ok(note) => advisories.push(dispatcher.modmail(&policy.community, &note, true).await),
            Err(e) => template_failed(services, submission, "modmail", &e.to_string()),
        }
    }

    let status = match settings.action {
        EnforcementAction::Remove => CountedStatus::NeedRemove,
        EnforcementAction::Report => {
            match composer.report_reason(policy, submission, evidence.last()) {
                Ok(reason) => advisories.push(dispatcher.report(submission, &reason).await),
                Err(e) => template_failed(services, submission, "report_reason", &e.to_string()),
            }
            CountedStatus::Flagged
        }
        EnforcementAction::None => CountedStatus::Flagged,
    };

    if let Some(template) = settings.message.as_deref().filter(|m| !m.trim().is_empty()) {
        match composer.author_message(policy, template, submission, evidence) {
            Ok(note) => advisories.push(dispatcher.message(&submission.author, &note).await),
            Err(e) => template_failed(services, submission, "message", &e.to_string()),
        }
    }

    submission.set_counted_status(status)?;
    submission.reviewed = true;
    submission.flagged_duplicate = true;
    submission.next_eligible = Some(next_eligible);

    info!(
        community = %policy.community,
        author = %submission.author,
        id = %submission.id,
        status = %status,
        evidence = evidence.len(),
        "violation enforced"
    );
    services.actions.log_with_details(
        &policy.community,
        LogLevel::Info,
        ActionKind::Violation,
        Some(&submission.id),
        format!("{} over the limit, marked {status}", submission.author),
        Some(serde_json::json!({
            "evidence": evidence.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            "next_eligible": next_eligible,
        })),
    );
    for advisory in advisories.iter().filter(|a| !a.success) {
        services.actions.log(
            &policy.community,
            LogLevel::Warning,
            ActionKind::Advisory,
            Some(&submission.id),
            format!(
                "{} to {} failed: {}",
                advisory.channel.name(),
                advisory.target,
                advisory.error.as_deref().unwrap_or("unknown error")
            ),
        );
    }

    let mut locked_until = None;
    if settings.action == EnforcementAction::Remove
        && evidence.len() > services.config.proactive_blacklist_evidence
    {
        escalation::soft_blacklist(services, policy, submission, next_eligible, now).await?;
        locked_until = Some(next_eligible);
    }

    Ok(EnforcementOutcome {
        status,
        next_eligible,
        comment_staged,
        advisories,
        locked_until,
    })
}

fn template_failed(services: &Services, submission: &Submission, which: &str, error: &str) {
    warn!(id = %submission.id, template = which, error = %error, "template rendering failed");
    services.actions.log(
        &submission.community,
        LogLevel::Error,
        ActionKind::Advisory,
        Some(&submission.id),
        format!("{which} template failed: {error}"),
    );
}
