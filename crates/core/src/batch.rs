//! Evaluation batches: the persisted record of a posting group.
//!
//! A batch is opened when the detector finds an author over the limit in a
//! community and stays open until every member has been given a final
//! disposition. Open batches are collected again at the start of the next
//! pass, so work interrupted by the pass budget or a restart is resumed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::submission::{Submission, SubmissionId};

pub type BatchId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Open,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationBatch {
    pub id: BatchId,
    pub community: String,
    pub author: String,
    /// Member ids in chronological order.
    pub member_ids: Vec<SubmissionId>,
    /// Creation time of every member, keyed by id.
    #[serde(default)]
    pub posted_at: BTreeMap<SubmissionId, DateTime<Utc>>,
    pub latest_id: SubmissionId,
    pub latest_at: DateTime<Utc>,
    pub state: BatchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

impl EvaluationBatch {
    /// Open a batch over `members`, which must be sorted oldest first and
    /// non-empty.
    pub fn open(community: &str, author: &str, members: &[&Submission]) -> Option<Self> {
        let latest = members.last()?;
        let now = Utc::now();
        Some(Self {
            id: Uuid::new_v4(),
            community: community.to_lowercase(),
            author: author.to_string(),
            member_ids: members.iter().map(|s| s.id.clone()).collect(),
            posted_at: members.iter().map(|s| (s.id.clone(), s.created_at)).collect(),
            latest_id: latest.id.clone(),
            latest_at: latest.created_at,
            state: BatchState::Open,
            created_at: now,
            updated_at: now,
            note: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == BatchState::Open
    }

    /// Merge newly detected members into the batch, keeping chronological
    /// order. Returns whether membership changed.
    pub fn widen(&mut self, members: &[&Submission]) -> bool {
        let mut changed = false;
        for s in members {
            if !self.member_ids.contains(&s.id) {
                self.member_ids.push(s.id.clone());
                changed = true;
            }
            self.posted_at.insert(s.id.clone(), s.created_at);
            if s.created_at > self.latest_at
                || (s.created_at == self.latest_at && s.id > self.latest_id)
            {
                self.latest_at = s.created_at;
                self.latest_id = s.id.clone();
                changed = true;
            }
        }
        if changed {
            let posted_at = &self.posted_at;
            self.member_ids
                .sort_by(|a, b| (posted_at.get(a), a).cmp(&(posted_at.get(b), b)));
            self.updated_at = Utc::now();
        }
        changed
    }

    pub fn complete(&mut self) {
        self.state = BatchState::Completed;
        self.updated_at = Utc::now();
    }

    pub fn abandon(&mut self, note: impl Into<String>) {
        self.state = BatchState::Abandoned;
        self.note = Some(note.into());
        self.updated_at = Utc::now();
    }
}
