//! Minijinja template rendering for moderator-written messages.
//!
//! Policy templates (comments, modmail, author messages, report reasons)
//! are arbitrary strings, so a fresh [`minijinja::Environment`] is created
//! per render call. Older policy documents use single-brace tags such as
//! `{author}`; those are rewritten to minijinja expressions first.

use chrono::{DateTime, Utc};
use postwarden_core::interval::humanize_interval;
use postwarden_core::{CommunityPolicy, Submission};

use crate::error::NotifyError;

/// Timestamp format used in every rendered message.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Values available to policy templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageContext {
    pub author: String,
    pub subreddit: String,
    pub title: String,
    pub post_id: String,
    pub url: String,
    /// Creation time of the current submission.
    pub time: String,
    pub link_flair: Option<String>,
    /// Most recent prior submission, when there is one.
    pub prev_url: Option<String>,
    pub prev_title: Option<String>,
    pub prev_time: Option<String>,
    pub maxcount: u32,
    pub interval: String,
    pub grace: String,
    pub next_eligible: Option<String>,
    pub bot: String,
}

impl MessageContext {
    pub fn new(
        policy: &CommunityPolicy,
        submission: &Submission,
        prev: Option<&Submission>,
        link_base: &str,
        bot: &str,
    ) -> Self {
        Self {
            author: submission.author.clone(),
            subreddit: policy.community.clone(),
            title: submission.title.clone(),
            post_id: submission.id.clone(),
            url: submission.link(link_base),
            time: submission.created_at.format(TIME_FORMAT).to_string(),
            link_flair: submission.link_flair.clone(),
            prev_url: prev.map(|p| p.link(link_base)),
            prev_title: prev.map(|p| p.title.clone()),
            prev_time: prev.map(|p| p.created_at.format(TIME_FORMAT).to_string()),
            maxcount: policy.settings.max_count_per_interval,
            interval: humanize_interval(policy.settings.min_post_interval),
            grace: humanize_interval(policy.settings.grace_period),
            next_eligible: None,
            bot: bot.to_string(),
        }
    }

    pub fn with_next_eligible(mut self, at: DateTime<Utc>) -> Self {
        self.next_eligible = Some(at.format(TIME_FORMAT).to_string());
        self
    }
}

/// Renders policy templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_filter("truncate_chars", truncate_filter);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &MessageContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        let source = normalize_legacy_tags(template_str);
        env.render_str(&source, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check that a template parses, without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        let source = normalize_legacy_tags(template_str);
        env.template_from_str(&source)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

fn truncate_filter(value: String, max: usize) -> String {
    truncate_chars(&value, max)
}

/// Cut `s` to at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Rewrite single-brace tags (`{author}`) to minijinja expressions
/// (`{{ author }}`). Existing minijinja blocks are copied through untouched,
/// as is any brace that does not enclose a plain identifier.
pub fn normalize_legacy_tags(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let closer = match tail.as_bytes().get(1) {
            Some(b'{') => Some("}}"),
            Some(b'%') => Some("%}"),
            Some(b'#') => Some("#}"),
            _ => None,
        };
        if let Some(closer) = closer {
            match tail[2..].find(closer) {
                Some(end) => {
                    let upto = 2 + end + closer.len();
                    out.push_str(&tail[..upto]);
                    rest = &tail[upto..];
                }
                None => {
                    out.push_str(tail);
                    rest = "";
                }
            }
            continue;
        }

        let ident_len = tail[1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len() - 1);
        let ident = &tail[1..1 + ident_len];
        if !ident.is_empty() && tail[1 + ident_len..].starts_with('}') {
            out.push_str("{{ ");
            out.push_str(ident);
            out.push_str(" }}");
            rest = &tail[ident_len + 2..];
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use postwarden_core::PolicySettings;

    use super::*;

    fn sample_context() -> MessageContext {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let policy = CommunityPolicy::new("Pics", PolicySettings::default());
        let prev = Submission::new("p1", "someone", "pics", at - chrono::Duration::hours(2), "First");
        let current = Submission::new("p2", "someone", "pics", at, "Second");
        MessageContext::new(&policy, &current, Some(&prev), "https://redd.it", "PostWarden")
    }

    #[test]
    fn legacy_tags_are_rewritten() {
        assert_eq!(normalize_legacy_tags("hi {author}!"), "hi {{ author }}!");
        assert_eq!(
            normalize_legacy_tags("[{title}]({url}) by /u/{author}"),
            "[{{ title }}]({{ url }}) by /u/{{ author }}"
        );
    }

    #[test]
    fn minijinja_syntax_passes_through() {
        let src = "{{ author | upper }} {% if prev_url %}{prev_url}{% endif %} {# note #}";
        assert_eq!(
            normalize_legacy_tags(src),
            "{{ author | upper }} {% if prev_url %}{{ prev_url }}{% endif %} {# note #}"
        );
    }

    #[test]
    fn stray_braces_are_kept() {
        assert_eq!(normalize_legacy_tags("a { b } {}"), "a { b } {}");
        assert_eq!(normalize_legacy_tags("trailing {"), "trailing {");
        assert_eq!(normalize_legacy_tags("{unterminated"), "{unterminated");
    }

    #[test]
    fn render_legacy_and_modern_templates() {
        let r = TemplateRenderer::new();
        let ctx = sample_context();
        assert_eq!(
            r.render("Repost by [{author}](/u/{author}): {url}", &ctx).unwrap(),
            "Repost by [someone](/u/someone): https://redd.it/p2"
        );
        assert_eq!(
            r.render("{{ maxcount }} per {{ interval }}, previous {{ prev_url }}", &ctx).unwrap(),
            "1 per 1 day, previous https://redd.it/p1"
        );
        assert_eq!(r.render("{{ subreddit | upper }}", &ctx).unwrap(), "PICS");
        assert_eq!(r.render("{time}", &ctx).unwrap(), "2026-03-01 12:30 UTC");
    }

    #[test]
    fn invalid_template_produces_error() {
        let r = TemplateRenderer::new();
        assert!(matches!(
            r.render("{{ unclosed", &sample_context()),
            Err(NotifyError::Template(_))
        ));
        assert!(r.validate("{% if %}").is_err());
        assert!(r.validate("Hello {author}").is_ok());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
