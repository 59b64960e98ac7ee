//! Per-author, per-community lock-out and hall-pass state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::submission::SubmissionId;

/// Rate-limit state for one author in one community.
///
/// Only exists for pairs that have been soft-blacklisted or granted hall
/// passes. `next_eligible` never moves backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorCommunityState {
    pub community: String,
    pub author: String,
    #[serde(default)]
    pub next_eligible: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_valid_post: Option<SubmissionId>,
    #[serde(default)]
    pub hall_pass: u32,
    pub updated_at: DateTime<Utc>,
}

impl AuthorCommunityState {
    pub fn new(community: &str, author: &str) -> Self {
        Self {
            community: community.to_lowercase(),
            author: author.to_string(),
            next_eligible: None,
            last_valid_post: None,
            hall_pass: 0,
            updated_at: Utc::now(),
        }
    }

    /// Ledger key for this pair.
    pub fn key(&self) -> (String, String) {
        (self.community.clone(), self.author.clone())
    }

    /// Push `next_eligible` out to `until`. Returns whether it moved.
    pub fn extend_eligibility(&mut self, until: DateTime<Utc>) -> bool {
        match self.next_eligible {
            Some(current) if current >= until => false,
            _ => {
                self.next_eligible = Some(until);
                self.updated_at = Utc::now();
                true
            }
        }
    }

    /// Use one hall pass if any are left.
    pub fn consume_hall_pass(&mut self) -> bool {
        if self.hall_pass == 0 {
            return false;
        }
        self.hall_pass -= 1;
        self.updated_at = Utc::now();
        true
    }

    pub fn grant_hall_passes(&mut self, count: u32) {
        self.hall_pass = self.hall_pass.saturating_add(count);
        self.updated_at = Utc::now();
    }

    /// A submission created at `at` falls inside the lock-out.
    pub fn blocks(&self, at: DateTime<Utc>) -> bool {
        self.next_eligible.is_some_and(|until| at < until)
    }
}
