//! In-memory structured log of enforcement actions.
//!
//! Stores per-community entries capped at a configurable maximum (default
//! 500) with FIFO eviction. Uses `std::sync::RwLock` so the worker binary
//! and tests can read it while the engine writes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric severity for comparison (higher = more severe).
    pub fn as_severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }
}

/// What the engine did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Classification,
    Detection,
    HallPass,
    Violation,
    Removal,
    Comment,
    Warning,
    Ban,
    SoftBlacklist,
    Recovery,
    PermissionChange,
    Advisory,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionEntry {
    pub timestamp: DateTime<Utc>,
    pub community: String,
    pub level: LogLevel,
    pub kind: ActionKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Filters for [`ActionLog::query`].
#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    /// Minimum level (inclusive).
    pub level: Option<LogLevel>,
    pub kind: Option<ActionKind>,
    pub limit: Option<u32>,
    pub since: Option<DateTime<Utc>>,
}

pub struct ActionLog {
    entries: Arc<RwLock<HashMap<String, VecDeque<ActionEntry>>>>,
    max_entries_per_community: usize,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::with_max_entries(500)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries_per_community: max,
        }
    }

    pub fn log(
        &self,
        community: &str,
        level: LogLevel,
        kind: ActionKind,
        submission_id: Option<&str>,
        message: impl Into<String>,
    ) {
        self.log_with_details(community, level, kind, submission_id, message, None);
    }

    pub fn log_with_details(
        &self,
        community: &str,
        level: LogLevel,
        kind: ActionKind,
        submission_id: Option<&str>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let entry = ActionEntry {
            timestamp: Utc::now(),
            community: community.to_string(),
            level,
            kind,
            message: message.into(),
            submission_id: submission_id.map(str::to_string),
            details,
        };

        let mut guard = self.entries.write().expect("action_log lock poisoned");
        let deque = guard.entry(community.to_string()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_community {
            deque.pop_front();
        }
    }

    /// Entries for one community, newest first.
    pub fn query(&self, community: &str, params: &ActionQuery) -> Vec<ActionEntry> {
        let guard = self.entries.read().expect("action_log lock poisoned");
        let Some(deque) = guard.get(community) else {
            return Vec::new();
        };

        let min_severity = params.level.as_ref().map(|l| l.as_severity()).unwrap_or(0);
        let limit = params.limit.unwrap_or(100) as usize;

        deque
            .iter()
            .rev()
            .filter(|e| e.level.as_severity() >= min_severity)
            .filter(|e| params.kind.as_ref().map_or(true, |k| &e.kind == k))
            .filter(|e| params.since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries of one kind across every community.
    pub fn count_kind(&self, kind: &ActionKind) -> usize {
        let guard = self.entries.read().expect("action_log lock poisoned");
        guard
            .values()
            .flat_map(|d| d.iter())
            .filter(|e| &e.kind == kind)
            .count()
    }

    pub fn communities(&self) -> Vec<String> {
        let guard = self.entries.read().expect("action_log lock poisoned");
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self, community: &str) {
        let mut guard = self.entries.write().expect("action_log lock poisoned");
        guard.remove(community);
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_eviction_per_community() {
        let log = ActionLog::with_max_entries(3);
        for i in 0..5 {
            log.log("pics", LogLevel::Info, ActionKind::Violation, None, format!("v{i}"));
        }
        log.log("art", LogLevel::Info, ActionKind::Ban, None, "b");

        let entries = log.query("pics", &ActionQuery::default());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "v4");
        assert_eq!(entries[2].message, "v2");
        assert_eq!(log.query("art", &ActionQuery::default()).len(), 1);
    }

    #[test]
    fn query_filters_level_and_kind() {
        let log = ActionLog::new();
        log.log("pics", LogLevel::Debug, ActionKind::Classification, Some("a"), "counts");
        log.log("pics", LogLevel::Warning, ActionKind::Removal, Some("b"), "refused");
        log.log("pics", LogLevel::Info, ActionKind::Removal, Some("c"), "removed");

        let warnings = log.query(
            "pics",
            &ActionQuery {
                level: Some(LogLevel::Warning),
                ..Default::default()
            },
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].submission_id.as_deref(), Some("b"));

        let removals = log.query(
            "pics",
            &ActionQuery {
                kind: Some(ActionKind::Removal),
                limit: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].message, "removed");
        assert_eq!(log.count_kind(&ActionKind::Removal), 2);
    }

    #[test]
    fn unknown_community_is_empty() {
        let log = ActionLog::new();
        assert!(log.query("nope", &ActionQuery::default()).is_empty());
        log.log("pics", LogLevel::Info, ActionKind::Ban, None, "x");
        log.clear("pics");
        assert!(log.query("pics", &ActionQuery::default()).is_empty());
    }
}
