//! Every piece of outbound text the engine sends: enforcement comments,
//! moderator notifications, author messages, ban messages and report
//! reasons.

use chrono::{DateTime, Utc};
use postwarden_core::interval::humanize_interval;
use postwarden_core::{BanDuration, CommunityPolicy, Submission};

use crate::dispatcher::Notification;
use crate::error::NotifyError;
use crate::templating::{truncate_chars, MessageContext, TemplateRenderer, TIME_FORMAT};

pub const DEFAULT_MODMAIL: &str = "Repost that violates rules: [{title}]({url}) by [{author}](/u/{author})";
pub const VIOLATION_MODMAIL_SUBJECT: &str = "[Notification] Post that violates rule frequency restriction";
pub const DEFAULT_REPORT_REASON: &str = "repeatedly exceeding posting threshold";
pub const AUTHOR_MESSAGE_SUBJECT: &str = "Regarding your post";
pub const HALL_PASS_SUBJECT: &str = "[Notification] Hall pass was used";
pub const BAN_FAILURE_SUBJECT: &str = "[Notification] Multiple post frequency violations";

/// Platform limit on report reasons.
pub const MAX_REPORT_CHARS: usize = 99;
/// Platform limit on ban messages.
pub const MAX_BAN_MESSAGE_CHARS: usize = 999;

const RESPONSE_TAIL: &str = "\n\n---\n\n";

/// Composes outbound text for one bot identity.
pub struct MessageComposer {
    renderer: TemplateRenderer,
    bot_name: String,
    link_base: String,
}

impl MessageComposer {
    pub fn new(bot_name: impl Into<String>, link_base: impl Into<String>) -> Self {
        Self {
            renderer: TemplateRenderer::new(),
            bot_name: bot_name.into(),
            link_base: link_base.into(),
        }
    }

    pub fn link(&self, submission: &Submission) -> String {
        submission.link(&self.link_base)
    }

    pub fn context(
        &self,
        policy: &CommunityPolicy,
        submission: &Submission,
        prev: Option<&Submission>,
    ) -> MessageContext {
        MessageContext::new(policy, submission, prev, &self.link_base, &self.bot_name)
    }

    // ── Comments ────────────────────────────────────────────────────

    /// Enforcement comment: the policy template followed by a footer listing
    /// the evidence, the limit and the next eligibility time.
    pub fn violation_comment(
        &self,
        policy: &CommunityPolicy,
        template: &str,
        submission: &Submission,
        evidence: &[Submission],
        next_eligible: DateTime<Utc>,
    ) -> Result<String, NotifyError> {
        let ctx = self
            .context(policy, submission, evidence.last())
            .with_next_eligible(next_eligible);
        let body = self.renderer.render(template, &ctx)?;
        let refs: Vec<&Submission> = evidence.iter().collect();
        Ok(format!(
            "{body}{RESPONSE_TAIL}{}",
            self.footer(policy, " Previous post(s):", &refs, next_eligible)
        ))
    }

    /// Comment for a post made while the author is locked out.
    pub fn blacklist_comment(
        &self,
        policy: &CommunityPolicy,
        template: &str,
        submission: &Submission,
        last_valid: Option<&Submission>,
        next_eligible: DateTime<Utc>,
    ) -> Result<String, NotifyError> {
        let ctx = self
            .context(policy, submission, last_valid)
            .with_next_eligible(next_eligible);
        let body = self.renderer.render(template, &ctx)?;
        let refs: Vec<&Submission> = last_valid.into_iter().collect();
        Ok(format!(
            "{body}{RESPONSE_TAIL}{}",
            self.footer(policy, " Temporary lock out per", &refs, next_eligible)
        ))
    }

    /// Superscripted footer line.
    fn footer(
        &self,
        policy: &CommunityPolicy,
        lead: &str,
        refs: &[&Submission],
        next_eligible: DateTime<Utc>,
    ) -> String {
        let posts = if refs.is_empty() {
            " BL".to_string()
        } else {
            refs.iter()
                .map(|s| format!(" [{}]({})", s.id, self.link(s)))
                .collect::<Vec<_>>()
                .join(",")
        };
        let line = format!(
            "{lead}{posts} | limit: {} per {} | next eligibility: {}",
            policy.settings.max_count_per_interval,
            humanize_interval(policy.settings.min_post_interval),
            next_eligible.format(TIME_FORMAT)
        );
        line.replace(' ', " ^^")
    }

    // ── Moderator notifications ─────────────────────────────────────

    /// Modmail announcing a violation; `None` when the policy has modmail off.
    pub fn violation_modmail(
        &self,
        policy: &CommunityPolicy,
        submission: &Submission,
        prev: Option<&Submission>,
    ) -> Option<Result<Notification, NotifyError>> {
        let template = policy.settings.modmail.as_ref()?.template(DEFAULT_MODMAIL)?;
        let ctx = self.context(policy, submission, prev);
        Some(
            self.renderer
                .render(template, &ctx)
                .map(|body| Notification::new(VIOLATION_MODMAIL_SUBJECT, body)),
        )
    }

    pub fn hall_pass_notice(&self, submission: &Submission) -> Notification {
        Notification::new(
            HALL_PASS_SUBJECT,
            format!("Hall pass was used by {}: {}", submission.author, self.link(submission)),
        )
    }

    /// Modmail sent when a ban is refused, listing every violation on record.
    pub fn ban_failure_modmail(&self, priors: &[Submission], current: &Submission) -> Notification {
        let mut lines = vec![
            "This person has multiple rule violations. Please adjust my privileges and ban \
             threshold if you would like me to automatically ban them."
                .to_string(),
        ];
        for post in priors.iter().chain(std::iter::once(current)) {
            lines.push(format!(
                "* {}: [{}](/u/{}) [{}]({})",
                post.created_at.format(TIME_FORMAT),
                post.author,
                post.author,
                post.title,
                self.link(post)
            ));
        }
        Notification::new(BAN_FAILURE_SUBJECT, lines.join("\n\n"))
    }

    // ── Author-facing text ──────────────────────────────────────────

    pub fn author_message(
        &self,
        policy: &CommunityPolicy,
        template: &str,
        submission: &Submission,
        evidence: &[Submission],
    ) -> Result<Notification, NotifyError> {
        let ctx = self.context(policy, submission, evidence.last());
        let body = self.renderer.render(template, &ctx)?;
        Ok(Notification::new(AUTHOR_MESSAGE_SUBJECT, body))
    }

    /// One-time warning for an author one violation short of a ban.
    pub fn warning_message(
        &self,
        policy: &CommunityPolicy,
        submission: &Submission,
        next_eligible: DateTime<Utc>,
    ) -> Notification {
        let s = &policy.settings;
        let subject = format!(
            "Beep! Boop! Please note that you are close approaching your posting limit for {}",
            policy.community
        );
        let body = format!(
            "This subreddit (/r/{}) only allows {} post(s) per {}. This {} include mod-removed posts. \
             While this post was within the post limiting rule and not removed by this bot, please do \
             not make any new posts before {}, as it may result in a ban. If you made a title mistake \
             you have STRICTLY {} to delete it and repost it. This is an automated message.",
            submission.community,
            s.max_count_per_interval,
            humanize_interval(s.min_post_interval),
            if s.ignore_moderator_removed { "does NOT" } else { "DOES" },
            next_eligible.format(TIME_FORMAT),
            humanize_interval(s.grace_period),
        );
        Notification::new(subject, body)
    }

    /// Ban message shown to the author, cut to the platform limit.
    pub fn ban_message(
        &self,
        policy: &CommunityPolicy,
        priors: &[Submission],
        duration: BanDuration,
    ) -> String {
        let s = &policy.settings;
        let prev_posts = priors
            .iter()
            .map(|p| format!(" [{}]({})", p.id, self.link(p)))
            .collect::<Vec<_>>()
            .join(",");
        let mut message = format!(
            "This subreddit (/r/{}) only allows {} post(s) per {}, and it only allows for {} \
             violation(s) of this rule. This is a rolling limit and includes self-deletions. Per our \
             records, there were {} post(s) from you that went beyond the limit:{} If you think you \
             may have been hacked, please change your passwords NOW. ",
            policy.community,
            s.max_count_per_interval,
            humanize_interval(s.min_post_interval),
            s.ban_threshold_count,
            priors.len(),
            prev_posts,
        );
        if let BanDuration::Days(days) = duration {
            message.push_str(&format!(
                "\n\nYour ban will last {days} day{} from this message. \
                 **Repeat infractions result in a permanent ban!**",
                if days > 1 { "s" } else { "" }
            ));
        }
        truncate_chars(&message, MAX_BAN_MESSAGE_CHARS)
    }

    /// Ban reason recorded in the moderation log.
    pub fn ban_reason(&self) -> String {
        format!("{}: posting too much", self.bot_name)
    }

    /// Report reason, prefixed with the bot name and cut to the platform limit.
    pub fn report_reason(
        &self,
        policy: &CommunityPolicy,
        submission: &Submission,
        prev: Option<&Submission>,
    ) -> Result<String, NotifyError> {
        let reason = match policy.settings.report_reason.as_deref() {
            Some(template) if !template.trim().is_empty() => {
                let ctx = self.context(policy, submission, prev);
                self.renderer.render(template, &ctx)?
            }
            _ => DEFAULT_REPORT_REASON.to_string(),
        };
        Ok(truncate_chars(
            &format!("{}: {}", self.bot_name, reason),
            MAX_REPORT_CHARS,
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use postwarden_core::{NotifyTemplate, PolicySettings};

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    fn policy() -> CommunityPolicy {
        CommunityPolicy::new(
            "pics",
            PolicySettings {
                min_post_interval: Duration::hours(1),
                ban_threshold_count: 3,
                ..Default::default()
            },
        )
    }

    fn post(id: &str, created: DateTime<Utc>) -> Submission {
        Submission::new(id, "someone", "pics", created, format!("Post {id}"))
    }

    fn composer() -> MessageComposer {
        MessageComposer::new("PostWarden", "https://redd.it")
    }

    #[test]
    fn violation_comment_lists_evidence_in_footer() {
        let first = post("first", at(10, 0));
        let second = post("second", at(10, 40));
        let text = composer()
            .violation_comment(&policy(), "Hi {author}, slow down.", &second, &[first], at(11, 0))
            .unwrap();
        assert!(text.starts_with("Hi someone, slow down."));
        assert!(text.contains("[first](https://redd.it/first)"));
        assert!(text.contains("^^Previous ^^post(s):"));
        assert!(text.contains("^^limit: ^^1 ^^per ^^1 ^^hour"));
        assert!(text.contains("2026-03-01 ^^11:00 ^^UTC"));
    }

    #[test]
    fn blacklist_comment_without_last_valid_post() {
        let current = post("x", at(12, 0));
        let text = composer()
            .blacklist_comment(&policy(), "Locked.", &current, None, at(20, 0))
            .unwrap();
        assert!(text.contains("^^Temporary ^^lock ^^out ^^per ^^BL"));
    }

    #[test]
    fn modmail_flag_uses_default_template() {
        let mut p = policy();
        let current = post("x", at(12, 0));
        assert!(composer().violation_modmail(&p, &current, None).is_none());

        p.settings.modmail = Some(NotifyTemplate::Flag(true));
        let n = composer().violation_modmail(&p, &current, None).unwrap().unwrap();
        assert_eq!(n.subject, VIOLATION_MODMAIL_SUBJECT);
        assert_eq!(
            n.body,
            "Repost that violates rules: [Post x](https://redd.it/x) by [someone](/u/someone)"
        );
    }

    #[test]
    fn report_reason_is_prefixed_and_truncated() {
        let mut p = policy();
        let current = post("x", at(12, 0));
        assert_eq!(
            composer().report_reason(&p, &current, None).unwrap(),
            "PostWarden: repeatedly exceeding posting threshold"
        );
        p.settings.report_reason = Some("x".repeat(200));
        let r = composer().report_reason(&p, &current, None).unwrap();
        assert_eq!(r.chars().count(), MAX_REPORT_CHARS);
        assert!(r.starts_with("PostWarden: xxx"));
    }

    #[test]
    fn ban_message_mentions_duration_only_when_temporary() {
        let priors = vec![post("a", at(1, 0)), post("b", at(2, 0))];
        let c = composer();
        let temp = c.ban_message(&policy(), &priors, BanDuration::Days(7));
        assert!(temp.contains("there were 2 post(s)"));
        assert!(temp.contains("last 7 days"));
        let perm = c.ban_message(&policy(), &priors, BanDuration::Permanent);
        assert!(!perm.contains("Your ban will last"));

        let many: Vec<Submission> = (0..60).map(|i| post(&format!("id{i:03}"), at(1, 0))).collect();
        let long = c.ban_message(&policy(), &many, BanDuration::Days(1));
        assert_eq!(long.chars().count(), MAX_BAN_MESSAGE_CHARS);
    }

    #[test]
    fn ban_failure_modmail_lists_history() {
        let priors = vec![post("a", at(1, 0))];
        let n = composer().ban_failure_modmail(&priors, &post("b", at(2, 0)));
        assert_eq!(n.subject, BAN_FAILURE_SUBJECT);
        assert!(n.body.contains("[Post a](https://redd.it/a)"));
        assert!(n.body.contains("* 2026-03-01 02:00 UTC: [someone](/u/someone) [Post b]"));
    }

    #[test]
    fn warning_mentions_next_eligibility() {
        let n = composer().warning_message(&policy(), &post("x", at(9, 0)), at(10, 0));
        assert!(n.subject.ends_with("pics"));
        assert!(n.body.contains("before 2026-03-01 10:00 UTC"));
        assert!(n.body.contains("does NOT include mod-removed"));
    }
}
