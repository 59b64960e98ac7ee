//! Wall-clock budget and commit cadence for one pass.

use std::time::Instant;

use chrono::Duration;

pub struct PassBudget {
    started: Instant,
    limit: std::time::Duration,
    commit_every: u32,
    since_commit: u32,
}

impl PassBudget {
    /// A negative `limit` is treated as zero.
    pub fn new(limit: Duration, commit_every: u32) -> Self {
        Self {
            started: Instant::now(),
            limit: limit.to_std().unwrap_or_default(),
            commit_every: commit_every.max(1),
            since_commit: 0,
        }
    }

    /// A zero budget is exhausted from the start.
    pub fn exceeded(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Count one processed submission. Returns `true` when a commit is due.
    pub fn record_item(&mut self) -> bool {
        self.since_commit += 1;
        if self.since_commit >= self.commit_every {
            self.since_commit = 0;
            return true;
        }
        false
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
