use std::env;
use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::interval::{compact_interval, parse_interval, serde_interval};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Interval-valued env var ("3h", "90s", "1d12h"); unparseable values fall
/// back to the default.
fn profiled_env_interval(profile: &str, key: &str, default: Duration) -> Duration {
    profiled_env_opt(profile, key)
        .and_then(|v| parse_interval(&v))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub bot: BotConfig,
    pub engine: EngineConfig,
    pub policy: PolicyConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["BOT_NAME", "DATA_DIR", "POLICY_DIR"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `POSTWARDEN_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("POSTWARDEN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            bot: BotConfig::from_env_profiled(p),
            engine: EngineConfig::from_env_profiled(p),
            policy: PolicyConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix != "POSTWARDEN"
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let summary = self.redacted_summary();
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  bot:      {}", summary["bot"]);
        tracing::info!(
            "  engine:   budget={}, commit_every={}, freshness={}",
            compact_interval(self.engine.pass_budget),
            self.engine.commit_every,
            compact_interval(self.engine.status_freshness)
        );
        tracing::info!("  policy:   dir={}, ttl={}", self.policy.dir.display(), compact_interval(self.policy.cache_ttl));
        tracing::info!("  storage:  ledger={}", self.storage.ledger_path().display());
        tracing::info!("  worker:   interval={}", compact_interval(self.worker.interval));
        tracing::debug!(config = %summary, "full config");
    }

    /// Return a redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "bot": { "name": self.bot.name, "owner_configured": self.bot.owner.is_some() },
            "engine": self.engine,
            "policy": self.policy,
            "storage": { "ledger": self.storage.ledger_path() },
            "worker": self.worker,
        })
    }
}

// ── Bot identity ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Prefix for reports and signature in messages.
    pub name: String,
    pub owner: Option<String>,
    /// Base for short submission links.
    pub link_base: String,
}

impl BotConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            name: profiled_env_or(p, "BOT_NAME", "PostWarden"),
            owner: profiled_env_opt(p, "BOT_OWNER"),
            link_base: profiled_env_or(p, "LINK_BASE", "https://redd.it"),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "PostWarden".to_string(),
            owner: None,
            link_base: "https://redd.it".to_string(),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

/// Tunables for one enforcement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for one pass.
    #[serde(with = "serde_interval")]
    pub pass_budget: Duration,
    /// Commit after this many processed submissions.
    pub commit_every: u32,
    /// Posted status older than this is refreshed before classification.
    #[serde(with = "serde_interval")]
    pub status_freshness: Duration,
    /// Open batches whose latest member is older than this are abandoned.
    #[serde(with = "serde_interval")]
    pub recovery_horizon: Duration,
    /// Groups whose latest member is older than this are not opened.
    #[serde(with = "serde_interval")]
    pub max_lookback: Duration,
    #[serde(with = "serde_interval")]
    pub blacklist_lookback: Duration,
    /// Submissions older than this are no longer removed.
    #[serde(with = "serde_interval")]
    pub removal_max_age: Duration,
    /// Self-deleted priors forgiven per evaluation.
    pub grace_cap: usize,
    /// Evidence count above which an author is soft-blacklisted right away.
    pub proactive_blacklist_evidence: usize,
    pub max_removal_attempts: u32,
    /// Soft blacklist length when bans are refused and the configured ban is
    /// temporary.
    pub no_permission_blacklist_days: i64,
    /// Soft blacklist length standing in for a permanent ban.
    pub permanent_blacklist_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pass_budget: Duration::minutes(5),
            commit_every: 25,
            status_freshness: Duration::hours(3),
            recovery_horizon: Duration::hours(48),
            max_lookback: Duration::hours(72),
            blacklist_lookback: Duration::hours(24),
            removal_max_age: Duration::hours(24),
            grace_cap: 2,
            proactive_blacklist_evidence: 2,
            max_removal_attempts: 3,
            no_permission_blacklist_days: 14,
            permanent_blacklist_days: 999,
        }
    }
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            pass_budget: profiled_env_interval(p, "PASS_BUDGET", d.pass_budget),
            commit_every: profiled_env_u32(p, "COMMIT_EVERY", d.commit_every).max(1),
            status_freshness: profiled_env_interval(p, "STATUS_FRESHNESS", d.status_freshness),
            recovery_horizon: profiled_env_interval(p, "RECOVERY_HORIZON", d.recovery_horizon),
            max_lookback: profiled_env_interval(p, "MAX_LOOKBACK", d.max_lookback),
            blacklist_lookback: profiled_env_interval(p, "BLACKLIST_LOOKBACK", d.blacklist_lookback),
            removal_max_age: profiled_env_interval(p, "REMOVAL_MAX_AGE", d.removal_max_age),
            grace_cap: profiled_env_u32(p, "GRACE_CAP", d.grace_cap as u32) as usize,
            proactive_blacklist_evidence: profiled_env_u32(
                p,
                "PROACTIVE_BLACKLIST_EVIDENCE",
                d.proactive_blacklist_evidence as u32,
            ) as usize,
            max_removal_attempts: profiled_env_u32(p, "MAX_REMOVAL_ATTEMPTS", d.max_removal_attempts),
            no_permission_blacklist_days: profiled_env_u32(
                p,
                "NO_PERMISSION_BLACKLIST_DAYS",
                d.no_permission_blacklist_days as u32,
            ) as i64,
            permanent_blacklist_days: d.permanent_blacklist_days,
        }
    }
}

// ── Policies ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Directory of per-community YAML documents.
    pub dir: PathBuf,
    #[serde(with = "serde_interval")]
    pub cache_ttl: Duration,
    /// Communities below this size are not picked up automatically.
    pub min_subscribers: u64,
}

impl PolicyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            dir: PathBuf::from(profiled_env_or(p, "POLICY_DIR", "data/policies")),
            cache_ttl: profiled_env_interval(p, "POLICY_CACHE_TTL", Duration::minutes(60)),
            min_subscribers: profiled_env_u64(p, "MIN_SUBSCRIBERS", 0),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Snapshot file name, relative to `data_dir`.
    pub ledger_file: String,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            ledger_file: profiled_env_or(p, "LEDGER_FILE", "ledger.json"),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Time between pass starts.
    #[serde(with = "serde_interval")]
    pub interval: Duration,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            interval: profiled_env_interval(p, "WORKER_INTERVAL", Duration::seconds(180)),
        }
    }
}
