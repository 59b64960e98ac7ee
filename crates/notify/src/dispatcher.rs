//! Routes advisory notifications (modmail, author messages, reports) to the
//! platform.
//!
//! Advisory deliveries never fail the caller: each one produces an
//! [`AdvisoryResult`] that is logged and returned for bookkeeping.

use std::sync::Arc;

use postwarden_core::{Platform, PlatformError, Submission};
use serde::Serialize;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryChannel {
    Modmail,
    Message,
    Report,
}

impl AdvisoryChannel {
    pub fn name(&self) -> &'static str {
        match self {
            AdvisoryChannel::Modmail => "modmail",
            AdvisoryChannel::Message => "message",
            AdvisoryChannel::Report => "report",
        }
    }
}

/// Result of one advisory delivery.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryResult {
    pub channel: AdvisoryChannel,
    /// Community, author or submission id the delivery was addressed to.
    pub target: String,
    pub success: bool,
    pub error: Option<String>,
    /// Set when the failure was a permission refusal.
    pub forbidden: bool,
    pub duration_ms: u64,
}

/// Sends advisory notifications through a [`Platform`].
pub struct AdvisoryDispatcher {
    platform: Arc<dyn Platform>,
}

impl AdvisoryDispatcher {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Message the moderators of `community`.
    pub async fn modmail(
        &self,
        community: &str,
        notification: &Notification,
        use_same_thread: bool,
    ) -> AdvisoryResult {
        let start = std::time::Instant::now();
        let result = self
            .platform
            .send_modmail(community, &notification.subject, &notification.body, use_same_thread)
            .await;
        finish(AdvisoryChannel::Modmail, community, start, result)
    }

    /// Privately message an author.
    pub async fn message(&self, author: &str, notification: &Notification) -> AdvisoryResult {
        let start = std::time::Instant::now();
        let result = self
            .platform
            .message(author, &notification.subject, &notification.body)
            .await;
        finish(AdvisoryChannel::Message, author, start, result)
    }

    /// Report a submission to the moderation queue.
    pub async fn report(&self, submission: &Submission, reason: &str) -> AdvisoryResult {
        let start = std::time::Instant::now();
        let result = self.platform.report(submission, reason).await;
        finish(AdvisoryChannel::Report, &submission.id, start, result)
    }
}

fn finish(
    channel: AdvisoryChannel,
    target: &str,
    start: std::time::Instant,
    result: Result<(), PlatformError>,
) -> AdvisoryResult {
    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            tracing::info!(channel = channel.name(), target, duration_ms, "Advisory delivered");
            AdvisoryResult {
                channel,
                target: target.to_string(),
                success: true,
                error: None,
                forbidden: false,
                duration_ms,
            }
        }
        Err(e) => {
            tracing::warn!(
                channel = channel.name(),
                target,
                error = %e,
                duration_ms,
                "Advisory delivery failed"
            );
            AdvisoryResult {
                channel,
                target: target.to_string(),
                success: false,
                error: Some(e.to_string()),
                forbidden: e.is_permission_denied(),
                duration_ms,
            }
        }
    }
}
