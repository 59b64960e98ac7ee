//! Community policies: the per-community thresholds, exemptions and
//! enforcement settings the engine reads, plus the bookkeeping the engine
//! itself maintains (ban capability, operational status).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::{humanize_interval, serde_interval};

// ── Enums ───────────────────────────────────────────────────────────

/// What to do with a submission that breaks the frequency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Remove,
    Report,
    #[default]
    None,
}

/// What the engine knows about its ability to ban in a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanAbility {
    #[default]
    Unknown,
    Enabled,
    /// Bans are not configured; violations are tracked only.
    Disabled,
    /// A ban attempt was refused; soft blacklisting is used instead.
    NoPermission,
}

/// Operational state of the engine in a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStatus {
    #[default]
    Unmonitored,
    Inaccessible,
    LackingRemovePermission,
    LackingBanPermission,
    Active,
}

impl ActiveStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ActiveStatus::Unmonitored => "unmonitored",
            ActiveStatus::Inaccessible => "inaccessible",
            ActiveStatus::LackingRemovePermission => "lacking remove permission",
            ActiveStatus::LackingBanPermission => "lacking ban permission",
            ActiveStatus::Active => "active",
        }
    }
}

impl fmt::Display for ActiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Keyword lists ───────────────────────────────────────────────────

/// A single keyword or a list of keywords. Matching is case-insensitive
/// substring containment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordList {
    One(String),
    Many(Vec<String>),
}

impl KeywordList {
    pub fn keywords(&self) -> Vec<&str> {
        match self {
            KeywordList::One(k) => vec![k.as_str()],
            KeywordList::Many(ks) => ks.iter().map(String::as_str).collect(),
        }
        .into_iter()
        .filter(|k| !k.trim().is_empty())
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords().is_empty()
    }

    /// Any keyword occurs in `haystack`.
    pub fn matches(&self, haystack: &str) -> bool {
        let haystack = haystack.to_lowercase();
        self.keywords()
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()))
    }
}

impl fmt::Display for KeywordList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keywords().join(", "))
    }
}

/// `modmail: true` uses the built-in notification text; a string is a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotifyTemplate {
    Flag(bool),
    Text(String),
}

impl NotifyTemplate {
    /// The template to render, `None` when switched off.
    pub fn template<'a>(&'a self, default: &'a str) -> Option<&'a str> {
        match self {
            NotifyTemplate::Flag(true) => Some(default),
            NotifyTemplate::Flag(false) => None,
            NotifyTemplate::Text(t) if t.trim().is_empty() => None,
            NotifyTemplate::Text(t) => Some(t.as_str()),
        }
    }
}

// ── Settings ────────────────────────────────────────────────────────

fn default_max_count() -> u32 {
    1
}

fn default_min_interval() -> Duration {
    Duration::hours(24)
}

fn default_true() -> bool {
    true
}

fn default_ban_threshold() -> u32 {
    5
}

/// Moderator-authored settings for one community, as written in its policy
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_max_count")]
    pub max_count_per_interval: u32,
    #[serde(default = "default_min_interval", with = "serde_interval")]
    pub min_post_interval: Duration,
    #[serde(default = "Duration::zero", with = "serde_interval")]
    pub grace_period: Duration,

    // Exemptions
    #[serde(default)]
    pub exempt_self_posts: bool,
    #[serde(default)]
    pub exempt_link_posts: bool,
    #[serde(default)]
    pub exempt_oc: bool,
    #[serde(default)]
    pub exempt_moderator_posts: bool,
    #[serde(default)]
    pub author_exempt_flair_keyword: Option<KeywordList>,
    #[serde(default)]
    pub author_not_exempt_flair_keyword: Option<KeywordList>,
    #[serde(default)]
    pub title_exempt_keyword: Option<KeywordList>,
    #[serde(default)]
    pub title_not_exempt_keyword: Option<KeywordList>,
    #[serde(default = "default_true")]
    pub ignore_automod_removed: bool,
    #[serde(default = "default_true")]
    pub ignore_moderator_removed: bool,

    // Enforcement
    #[serde(default)]
    pub action: EnforcementAction,
    #[serde(default)]
    pub report_reason: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub modmail: Option<NotifyTemplate>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_true")]
    pub distinguish: bool,
    #[serde(default)]
    pub approve: bool,
    #[serde(default = "default_true")]
    pub lock_thread: bool,
    #[serde(default)]
    pub comment_stickied: bool,

    // Escalation
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold_count: u32,
    /// Days; `0` or anything above 998 means permanent. Absent disables bans.
    #[serde(default)]
    pub ban_duration_days: Option<f64>,
    #[serde(default)]
    pub notify_about_spammers: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            max_count_per_interval: default_max_count(),
            min_post_interval: default_min_interval(),
            grace_period: Duration::zero(),
            exempt_self_posts: false,
            exempt_link_posts: false,
            exempt_oc: false,
            exempt_moderator_posts: false,
            author_exempt_flair_keyword: None,
            author_not_exempt_flair_keyword: None,
            title_exempt_keyword: None,
            title_not_exempt_keyword: None,
            ignore_automod_removed: true,
            ignore_moderator_removed: true,
            action: EnforcementAction::None,
            report_reason: None,
            comment: None,
            modmail: None,
            message: None,
            distinguish: true,
            approve: false,
            lock_thread: true,
            comment_stickied: false,
            ban_threshold_count: default_ban_threshold(),
            ban_duration_days: None,
            notify_about_spammers: false,
        }
    }
}

impl PolicySettings {
    /// Problems that make the settings unusable. Template syntax is checked
    /// separately by the renderer.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_count_per_interval == 0 {
            problems.push("max_count_per_interval must be at least 1".to_string());
        }
        if self.min_post_interval <= Duration::zero() {
            problems.push("min_post_interval must be positive".to_string());
        }
        if self.grace_period < Duration::zero() {
            problems.push("grace_period must not be negative".to_string());
        }
        if self.grace_period >= self.min_post_interval {
            problems.push(format!(
                "grace_period ({}) must be shorter than min_post_interval ({})",
                humanize_interval(self.grace_period),
                humanize_interval(self.min_post_interval)
            ));
        }
        if self.ban_duration_days.is_some() && self.ban_threshold_count == 0 {
            problems.push("ban_threshold_count must be at least 1 when bans are enabled".to_string());
        }
        if let Some(days) = self.ban_duration_days {
            if days < 0.0 || !days.is_finite() {
                problems.push(format!("ban_duration_days must be a non-negative number, got {days}"));
            }
        }
        if self.exempt_self_posts && self.exempt_link_posts {
            problems.push("exempt_self_posts and exempt_link_posts together exempt every post".to_string());
        }
        problems
    }

    /// All message templates, labelled, for syntax checking.
    pub fn templates(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(c) = &self.comment {
            out.push(("comment", c.as_str()));
        }
        if let Some(NotifyTemplate::Text(m)) = &self.modmail {
            out.push(("modmail", m.as_str()));
        }
        if let Some(m) = &self.message {
            out.push(("message", m.as_str()));
        }
        if let Some(r) = &self.report_reason {
            out.push(("report_reason", r.as_str()));
        }
        out
    }
}

// ── Community policy ────────────────────────────────────────────────

/// A moderated community: its settings plus engine-maintained state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityPolicy {
    /// Lowercased community name.
    pub community: String,
    pub settings: PolicySettings,
    #[serde(default)]
    pub ban_ability: BanAbility,
    #[serde(default)]
    pub active_status: ActiveStatus,
    #[serde(default)]
    pub moderators: BTreeSet<String>,
    #[serde(default)]
    pub subscribers: u64,
    pub loaded_at: DateTime<Utc>,
}

impl CommunityPolicy {
    pub fn new(community: &str, settings: PolicySettings) -> Self {
        Self {
            community: community.to_lowercase(),
            settings,
            ban_ability: BanAbility::Unknown,
            active_status: ActiveStatus::Unmonitored,
            moderators: BTreeSet::new(),
            subscribers: 0,
            loaded_at: Utc::now(),
        }
    }

    /// Whether detection and enforcement run for this community.
    pub fn is_enforcing(&self) -> bool {
        matches!(
            self.active_status,
            ActiveStatus::Active | ActiveStatus::LackingBanPermission
        )
    }

    pub fn is_moderator(&self, author: &str) -> bool {
        self.moderators.iter().any(|m| m.eq_ignore_ascii_case(author))
    }

    pub fn interval(&self) -> Duration {
        self.settings.min_post_interval
    }

    pub fn grace(&self) -> Duration {
        self.settings.grace_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_and_intervals() {
        let yaml = r#"
max_count_per_interval: 2
min_post_interval: 1d12h
grace_period: 30m
action: remove
comment: "Please wait before posting again."
title_not_exempt_keyword: [selfie, "Portrait"]
modmail: true
ban_duration_days: 7
"#;
        let s: PolicySettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.max_count_per_interval, 2);
        assert_eq!(s.min_post_interval, Duration::hours(36));
        assert_eq!(s.grace_period, Duration::minutes(30));
        assert_eq!(s.action, EnforcementAction::Remove);
        assert!(s.ignore_automod_removed);
        assert_eq!(s.ban_threshold_count, 5);
        assert_eq!(s.ban_duration_days, Some(7.0));
        assert_eq!(s.modmail, Some(NotifyTemplate::Flag(true)));
        let kw = s.title_not_exempt_keyword.unwrap();
        assert!(kw.matches("My PORTRAIT attempt"));
        assert!(!kw.matches("landscape"));
        assert!(PolicySettings::default().validate().is_empty());
    }

    #[test]
    fn bare_seconds_interval() {
        let s: PolicySettings = serde_yaml::from_str("min_post_interval: 3600").unwrap();
        assert_eq!(s.min_post_interval, Duration::hours(1));
    }

    #[test]
    fn validation_catches_bad_settings() {
        let s = PolicySettings {
            max_count_per_interval: 0,
            grace_period: Duration::hours(30),
            ..Default::default()
        };
        let problems = s.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("max_count_per_interval"));
        assert!(problems[1].contains("grace_period"));
    }

    #[test]
    fn single_keyword_and_blank_entries() {
        let kw: KeywordList = serde_yaml::from_str("\"OC\"").unwrap();
        assert!(kw.matches("my oc art"));
        let blank = KeywordList::Many(vec!["  ".into()]);
        assert!(blank.is_empty());
        assert!(!blank.matches("anything"));
    }

    #[test]
    fn notify_template_variants() {
        assert_eq!(NotifyTemplate::Flag(true).template("dflt"), Some("dflt"));
        assert_eq!(NotifyTemplate::Flag(false).template("dflt"), None);
        assert_eq!(NotifyTemplate::Text("hi".into()).template("dflt"), Some("hi"));
    }

    #[test]
    fn enforcing_statuses() {
        let mut p = CommunityPolicy::new("Pics", PolicySettings::default());
        assert_eq!(p.community, "pics");
        assert!(!p.is_enforcing());
        p.active_status = ActiveStatus::LackingBanPermission;
        assert!(p.is_enforcing());
        p.active_status = ActiveStatus::LackingRemovePermission;
        assert!(!p.is_enforcing());
        p.moderators.insert("ModPerson".into());
        assert!(p.is_moderator("modperson"));
    }
}
