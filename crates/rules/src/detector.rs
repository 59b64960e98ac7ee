//! Finds authors over the limit and turns them into evaluation batches.
//!
//! Open batches from earlier passes are collected first, so interrupted
//! work resumes before anything new is started.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use postwarden_core::config::EngineConfig;
use postwarden_core::{CommunityPolicy, Disposition, EvaluationBatch, Ledger, Submission, SubmissionQuery};
use serde::Serialize;
use tracing::{debug, info};

use crate::action_log::{ActionKind, ActionLog, LogLevel};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct Detection {
    /// Batches to process this pass, most recent violation first.
    pub groups: Vec<EvaluationBatch>,
    pub stats: DetectionStats,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectionStats {
    pub recovered: usize,
    pub abandoned: usize,
    pub opened: usize,
    pub widened: usize,
}

type Pair = (String, String);

pub async fn detect(
    ledger: &dyn Ledger,
    enforcing: &[CommunityPolicy],
    config: &EngineConfig,
    actions: &ActionLog,
    now: DateTime<Utc>,
) -> Result<Detection> {
    let policies: HashMap<&str, &CommunityPolicy> =
        enforcing.iter().map(|p| (p.community.as_str(), p)).collect();
    let mut stats = DetectionStats::default();
    let mut open: HashMap<Pair, EvaluationBatch> = HashMap::new();

    // ── Recovery ────────────────────────────────────────────────────
    for mut batch in ledger.open_batches(None).await? {
        let note = if batch.latest_at < now - config.recovery_horizon {
            Some("latest member is past the recovery horizon")
        } else if !policies.contains_key(batch.community.as_str()) {
            Some("community is no longer enforcing")
        } else {
            None
        };
        if let Some(note) = note {
            batch.abandon(note);
            ledger.upsert_batch(&batch).await?;
            actions.log(
                &batch.community,
                LogLevel::Info,
                ActionKind::Recovery,
                Some(&batch.latest_id),
                format!("abandoned batch for {}: {note}", batch.author),
            );
            stats.abandoned += 1;
            continue;
        }
        stats.recovered += 1;
        open.insert((batch.community.clone(), batch.author.clone()), batch);
    }

    if policies.is_empty() {
        return Ok(finish(open, stats));
    }

    // ── New violations ──────────────────────────────────────────────
    let longest = enforcing
        .iter()
        .map(|p| p.interval())
        .max()
        .unwrap_or_else(Duration::zero);
    let rows = ledger
        .query_submissions(
            &SubmissionQuery::new()
                .posted_after(now - longest)
                .disposition(Disposition::Countable),
        )
        .await?;

    let mut by_pair: BTreeMap<Pair, Vec<Submission>> = BTreeMap::new();
    for s in rows {
        by_pair
            .entry((s.community.clone(), s.author.clone()))
            .or_default()
            .push(s);
    }

    for ((community, author), rows) in by_pair {
        let Some(policy) = policies.get(community.as_str()) else {
            continue;
        };
        let window_start = now - policy.interval();
        let members: Vec<&Submission> = rows.iter().filter(|s| s.created_at > window_start).collect();
        if members.len() as u64 <= policy.settings.max_count_per_interval as u64 {
            continue;
        }
        // Only groups with a recent latest member are opened.
        if members.last().is_some_and(|s| s.created_at <= now - config.max_lookback) {
            continue;
        }
        if members.iter().all(|s| s.reviewed) {
            continue;
        }

        let key = (community.clone(), author.clone());
        if let Some(batch) = open.get_mut(&key) {
            if batch.widen(&members) {
                ledger.upsert_batch(batch).await?;
                stats.widened += 1;
                debug!(community = %community, author = %author, members = batch.member_ids.len(), "batch widened");
            }
        } else {
            let Some(batch) = EvaluationBatch::open(&community, &author, &members) else {
                continue;
            };
            ledger.upsert_batch(&batch).await?;
            stats.opened += 1;
            info!(
                community = %community,
                author = %author,
                count = members.len(),
                limit = policy.settings.max_count_per_interval,
                "posting group detected"
            );
            actions.log(
                &community,
                LogLevel::Info,
                ActionKind::Detection,
                Some(&batch.latest_id),
                format!("{author} has {} posts in the window", members.len()),
            );
            open.insert(key.clone(), batch);
        }

        let Some(batch) = open.get(&key) else {
            continue;
        };
        if let Some(latest) = members.iter().find(|s| s.id == batch.latest_id) {
            if latest.batch_id != Some(batch.id) {
                let mut tagged = (*latest).clone();
                tagged.batch_id = Some(batch.id);
                ledger.upsert_submission(&tagged).await?;
            }
        }
    }

    Ok(finish(open, stats))
}

fn finish(open: HashMap<Pair, EvaluationBatch>, stats: DetectionStats) -> Detection {
    let mut groups: Vec<EvaluationBatch> = open.into_values().collect();
    groups.sort_by(|a, b| {
        b.latest_at
            .cmp(&a.latest_at)
            .then_with(|| a.community.cmp(&b.community))
            .then_with(|| a.author.cmp(&b.author))
    });
    Detection { groups, stats }
}
