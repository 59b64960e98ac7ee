//! In-memory ledger with an optional JSON snapshot file.
//!
//! All reads and writes hit the in-memory maps. When a snapshot path is set,
//! [`Ledger::commit`] writes the whole state to a temp file next to it and
//! renames it into place, so a crash never leaves a half-written snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postwarden_core::ledger::LedgerResult;
use postwarden_core::{
    AuthorCommunityState, BatchId, CommunityPolicy, EvaluationBatch, Ledger, Submission,
    SubmissionQuery,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StorageError;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Default)]
struct LedgerState {
    submissions: HashMap<String, Submission>,
    policies: BTreeMap<String, CommunityPolicy>,
    authors: HashMap<(String, String), AuthorCommunityState>,
    batches: HashMap<BatchId, EvaluationBatch>,
    dirty: bool,
}

/// On-disk form. Maps keyed by tuples are flattened to lists.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    submissions: Vec<Submission>,
    policies: Vec<CommunityPolicy>,
    authors: Vec<AuthorCommunityState>,
    batches: Vec<EvaluationBatch>,
}

impl Snapshot {
    fn capture(state: &LedgerState) -> Self {
        let mut submissions: Vec<Submission> = state.submissions.values().cloned().collect();
        submissions.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        let mut authors: Vec<AuthorCommunityState> = state.authors.values().cloned().collect();
        authors.sort_by(|a, b| a.key().cmp(&b.key()));
        let mut batches: Vec<EvaluationBatch> = state.batches.values().cloned().collect();
        batches.sort_by_key(|b| b.created_at);
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            submissions,
            policies: state.policies.values().cloned().collect(),
            authors,
            batches,
        }
    }

    fn restore(self) -> Result<LedgerState, StorageError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(StorageError::Version(self.version));
        }
        Ok(LedgerState {
            submissions: self.submissions.into_iter().map(|s| (s.id.clone(), s)).collect(),
            policies: self
                .policies
                .into_iter()
                .map(|p| (p.community.clone(), p))
                .collect(),
            authors: self.authors.into_iter().map(|a| (a.key(), a)).collect(),
            batches: self.batches.into_iter().map(|b| (b.id, b)).collect(),
            dirty: false,
        })
    }
}

/// [`Ledger`] backed by in-memory maps.
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    snapshot_path: Option<PathBuf>,
    commits: AtomicU64,
}

impl MemoryLedger {
    /// A ledger that never touches disk.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            snapshot_path: None,
            commits: AtomicU64::new(0),
        }
    }

    /// Open a snapshot-backed ledger, loading the snapshot if it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            let state = snapshot.restore()?;
            info!(
                path = %path.display(),
                submissions = state.submissions.len(),
                policies = state.policies.len(),
                "Ledger snapshot loaded"
            );
            state
        } else {
            info!(path = %path.display(), "No ledger snapshot yet, starting empty");
            LedgerState::default()
        };
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            commits: AtomicU64::new(0),
        })
    }

    /// Number of commits that found pending changes.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().expect("ledger lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LedgerState> {
        self.state.write().expect("ledger lock poisoned")
    }

    async fn write_snapshot(&self, path: &Path, bytes: Vec<u8>) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_submission(&self, id: &str) -> LedgerResult<Option<Submission>> {
        Ok(self.read().submissions.get(id).cloned())
    }

    async fn upsert_submission(&self, submission: &Submission) -> LedgerResult<()> {
        let mut state = self.write();
        state
            .submissions
            .insert(submission.id.clone(), submission.clone());
        state.dirty = true;
        Ok(())
    }

    async fn query_submissions(&self, query: &SubmissionQuery) -> LedgerResult<Vec<Submission>> {
        let state = self.read();
        let mut out: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn get_policy(&self, community: &str) -> LedgerResult<Option<CommunityPolicy>> {
        Ok(self.read().policies.get(&community.to_lowercase()).cloned())
    }

    async fn upsert_policy(&self, policy: &CommunityPolicy) -> LedgerResult<()> {
        let mut state = self.write();
        state
            .policies
            .insert(policy.community.clone(), policy.clone());
        state.dirty = true;
        Ok(())
    }

    async fn list_policies(&self) -> LedgerResult<Vec<CommunityPolicy>> {
        Ok(self.read().policies.values().cloned().collect())
    }

    async fn get_author_state(
        &self,
        community: &str,
        author: &str,
    ) -> LedgerResult<Option<AuthorCommunityState>> {
        let key = (community.to_lowercase(), author.to_string());
        Ok(self.read().authors.get(&key).cloned())
    }

    async fn upsert_author_state(&self, author_state: &AuthorCommunityState) -> LedgerResult<()> {
        let mut state = self.write();
        state.authors.insert(author_state.key(), author_state.clone());
        state.dirty = true;
        Ok(())
    }

    async fn lockouts_after(&self, after: DateTime<Utc>) -> LedgerResult<Vec<AuthorCommunityState>> {
        let mut out: Vec<AuthorCommunityState> = self
            .read()
            .authors
            .values()
            .filter(|a| a.next_eligible.is_some_and(|t| t > after))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    async fn get_batch(&self, id: &BatchId) -> LedgerResult<Option<EvaluationBatch>> {
        Ok(self.read().batches.get(id).cloned())
    }

    async fn upsert_batch(&self, batch: &EvaluationBatch) -> LedgerResult<()> {
        let mut state = self.write();
        state.batches.insert(batch.id, batch.clone());
        state.dirty = true;
        Ok(())
    }

    async fn open_batches(
        &self,
        pair: Option<(&str, &str)>,
    ) -> LedgerResult<Vec<EvaluationBatch>> {
        let mut out: Vec<EvaluationBatch> = self
            .read()
            .batches
            .values()
            .filter(|b| b.is_open())
            .filter(|b| match pair {
                Some((community, author)) => {
                    b.community == community.to_lowercase() && b.author == author
                }
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.latest_at.cmp(&a.latest_at));
        Ok(out)
    }

    async fn commit(&self) -> LedgerResult<()> {
        let bytes = {
            let mut state = self.write();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            match &self.snapshot_path {
                Some(_) => Some(serde_json::to_vec_pretty(&Snapshot::capture(&state)).map_err(StorageError::from)?),
                None => None,
            }
        };
        self.commits.fetch_add(1, Ordering::SeqCst);

        if let (Some(path), Some(bytes)) = (&self.snapshot_path, bytes) {
            let size = bytes.len();
            self.write_snapshot(path, bytes).await?;
            debug!(path = %path.display(), bytes = size, "Ledger snapshot written");
        }
        Ok(())
    }
}
