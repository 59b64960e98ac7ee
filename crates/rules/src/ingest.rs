//! Recording newly observed submissions.

use chrono::{DateTime, Utc};
use postwarden_core::Submission;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::EnforcementEngine;
use crate::error::Result;

/// A submission as reported by whatever feeds the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub id: String,
    pub author: String,
    pub community: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_oc: bool,
    #[serde(default)]
    pub author_flair: Option<String>,
    #[serde(default)]
    pub link_flair: Option<String>,
}

impl NewSubmission {
    /// Parse one submission per non-blank line.
    pub fn parse_lines(input: &str) -> std::result::Result<Vec<Self>, serde_json::Error> {
        input
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(serde_json::from_str)
            .collect()
    }

    fn into_submission(self, now: DateTime<Utc>) -> Submission {
        let mut s = Submission::new(&self.id, &self.author, &self.community, self.created_at, &self.title);
        s.is_self = self.is_self;
        s.is_oc = self.is_oc;
        s.author_flair = self.author_flair;
        s.link_flair = self.link_flair;
        s.added_at = now;
        s
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    /// Already in the ledger; left untouched.
    pub duplicates: usize,
    /// Communities the platform does not know, or too small to track.
    pub skipped: usize,
}

impl EnforcementEngine {
    /// Record new submissions. Ids already in the ledger are ignored, and the
    /// policy for a community seen for the first time is created on the way.
    pub async fn ingest(&mut self, batch: Vec<NewSubmission>, now: DateTime<Utc>) -> Result<IngestReport> {
        let platform = self.services.platform.clone();
        let ledger = self.services.ledger.clone();
        let mut report = IngestReport::default();

        for item in batch {
            if ledger.get_submission(&item.id).await?.is_some() {
                report.duplicates += 1;
                continue;
            }
            let known = self
                .policies
                .get(&item.community, platform.as_ref(), ledger.as_ref(), now)
                .await?;
            if known.is_none() {
                debug!(id = %item.id, community = %item.community, "skipping submission");
                report.skipped += 1;
                continue;
            }
            ledger.upsert_submission(&item.into_submission(now)).await?;
            report.inserted += 1;
        }
        ledger.commit().await?;

        info!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "submissions ingested"
        );
        Ok(report)
    }
}
