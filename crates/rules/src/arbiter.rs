//! Decides, for one counting submission, whether its prior posts make it a
//! violation.

use chrono::{DateTime, Utc};
use postwarden_core::{
    AuthorCommunityState, CommunityPolicy, Ledger, Platform, PlatformError, PostedStatus,
    Submission, SubmissionId,
};
use tracing::debug;

use crate::error::Result;

/// What the arbiter found among the candidates preceding one submission.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Arbitration {
    /// Priors that count against the submission, oldest first.
    pub evidence: Vec<SubmissionId>,
    /// Self-deleted priors excused by the grace period.
    pub forgiven: Vec<SubmissionId>,
    /// Live posted statuses fetched along the way.
    pub observed: Vec<(SubmissionId, PostedStatus)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Under the limit; the submission is reviewed and keeps counting.
    NotEnough,
    /// Over the limit but the author had a hall pass to spend.
    HallPass,
    Enforce,
}

/// Gather the evidence against `current` from `candidates`, which must be the
/// author's counting posts in the community sorted oldest first.
///
/// Candidates older than `current - interval + grace` are out of the window.
/// The scan stops at `current` itself or anything newer. Each remaining
/// candidate's live status is fetched; one deleted by its author less than
/// `grace` before `current` is forgiven, at most `grace_cap` times.
pub async fn arbitrate(
    platform: &dyn Platform,
    policy: &CommunityPolicy,
    current: &Submission,
    candidates: &[Submission],
    grace_cap: usize,
) -> Result<Arbitration> {
    let t = current.created_at;
    let grace = policy.grace();
    let window_start = t - policy.interval() + grace;
    let mut out = Arbitration::default();

    for prior in candidates {
        if prior.created_at < window_start {
            continue;
        }
        if prior.id == current.id || prior.created_at > t {
            break;
        }

        let status = match platform.get_posted_status(prior).await {
            Ok(lookup) => {
                out.observed.push((prior.id.clone(), lookup.posted_status));
                lookup.posted_status
            }
            Err(PlatformError::Transient(reason)) => {
                return Err(PlatformError::Transient(reason).into());
            }
            Err(e) => {
                debug!(id = %prior.id, error = %e, "live status unavailable, using last known");
                prior.posted_status
            }
        };

        let deleted_in_grace = status == PostedStatus::SelfDeleted && t - prior.created_at < grace;
        if deleted_in_grace && out.forgiven.len() < grace_cap {
            out.forgiven.push(prior.id.clone());
            continue;
        }
        out.evidence.push(prior.id.clone());
    }

    Ok(out)
}

pub fn decide(evidence: usize, max_count: u32, hall_passes: u32) -> Decision {
    if (evidence as u64) < max_count as u64 {
        Decision::NotEnough
    } else if hall_passes > 0 {
        Decision::HallPass
    } else {
        Decision::Enforce
    }
}

/// Give an author `count` more hall passes in a community.
pub async fn grant_hall_passes(
    ledger: &dyn Ledger,
    community: &str,
    author: &str,
    count: u32,
    now: DateTime<Utc>,
) -> Result<AuthorCommunityState> {
    let community = community.to_lowercase();
    let mut state = ledger
        .get_author_state(&community, author)
        .await?
        .unwrap_or_else(|| AuthorCommunityState::new(&community, author));
    state.grant_hall_passes(count);
    state.updated_at = now;
    ledger.upsert_author_state(&state).await?;
    ledger.commit().await?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use postwarden_core::PolicySettings;
    use postwarden_storage::MemoryLedger;

    use super::*;
    use crate::dry_run::{CallKind, DryRunPlatform};

    fn policy(max: u32, interval_h: i64, grace_m: i64) -> CommunityPolicy {
        CommunityPolicy::new(
            "pics",
            PolicySettings {
                max_count_per_interval: max,
                min_post_interval: Duration::hours(interval_h),
                grace_period: Duration::minutes(grace_m),
                ..Default::default()
            },
        )
    }

    fn post(id: &str, at: DateTime<Utc>) -> Submission {
        Submission::new(id, "someone", "pics", at, "t")
    }

    #[test]
    fn decision_thresholds() {
        assert_eq!(decide(0, 1, 0), Decision::NotEnough);
        assert_eq!(decide(1, 1, 0), Decision::Enforce);
        assert_eq!(decide(1, 2, 0), Decision::NotEnough);
        assert_eq!(decide(2, 2, 1), Decision::HallPass);
    }

    #[tokio::test]
    async fn evidence_stops_at_the_current_submission() {
        let platform = DryRunPlatform::new();
        let now = Utc::now();
        let candidates = vec![
            post("old", now - Duration::hours(30)),
            post("a", now - Duration::hours(5)),
            post("b", now - Duration::hours(2)),
            post("later", now + Duration::hours(1)),
        ];
        let current = post("b", now - Duration::hours(2));

        let a = arbitrate(&platform, &policy(1, 24, 0), &current, &candidates, 2)
            .await
            .unwrap();
        assert_eq!(a.evidence, vec!["a"]);
        assert!(a.forgiven.is_empty());
        assert_eq!(platform.call_count(CallKind::GetPostedStatus), 1);
    }

    #[tokio::test]
    async fn grace_forgiveness_is_capped() {
        let platform = DryRunPlatform::new();
        let now = Utc::now();
        let mut candidates = Vec::new();
        for (id, mins) in [("d1", 25), ("d2", 20), ("d3", 15)] {
            platform.set_status(id, PostedStatus::SelfDeleted);
            candidates.push(post(id, now - Duration::minutes(mins)));
        }
        let current = post("cur", now);

        let a = arbitrate(&platform, &policy(1, 24, 30), &current, &candidates, 2)
            .await
            .unwrap();
        assert_eq!(a.forgiven, vec!["d1", "d2"]);
        assert_eq!(a.evidence, vec!["d3"]);
        assert_eq!(a.observed.len(), 3);
    }

    #[tokio::test]
    async fn deletions_outside_grace_are_evidence() {
        let platform = DryRunPlatform::new();
        let now = Utc::now();
        platform.set_status("d", PostedStatus::SelfDeleted);
        let candidates = vec![post("d", now - Duration::minutes(45))];

        let a = arbitrate(&platform, &policy(1, 24, 30), &post("cur", now), &candidates, 2)
            .await
            .unwrap();
        assert_eq!(a.evidence, vec!["d"]);
    }

    #[tokio::test]
    async fn grace_shrinks_the_window() {
        let platform = DryRunPlatform::new();
        let now = Utc::now();
        // interval 24h, grace 1h: the window opens 23h before the post.
        let candidates = vec![post("edge", now - Duration::minutes(23 * 60 + 30))];
        let a = arbitrate(&platform, &policy(1, 24, 60), &post("cur", now), &candidates, 2)
            .await
            .unwrap();
        assert!(a.evidence.is_empty());
    }

    #[tokio::test]
    async fn transient_lookup_aborts_and_forbidden_falls_back() {
        let platform = DryRunPlatform::new();
        let now = Utc::now();
        let candidates = vec![post("a", now - Duration::hours(1))];

        platform.fail(CallKind::GetPostedStatus, PlatformError::Forbidden("private".into()));
        let a = arbitrate(&platform, &policy(1, 24, 0), &post("cur", now), &candidates, 2)
            .await
            .unwrap();
        assert_eq!(a.evidence, vec!["a"]);
        assert!(a.observed.is_empty());

        platform.fail(CallKind::GetPostedStatus, PlatformError::Transient("503".into()));
        let err = arbitrate(&platform, &policy(1, 24, 0), &post("cur", now), &candidates, 2)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn hall_passes_accumulate() {
        let ledger = MemoryLedger::new();
        grant_hall_passes(&ledger, "Pics", "someone", 1, Utc::now()).await.unwrap();
        let state = grant_hall_passes(&ledger, "pics", "someone", 2, Utc::now()).await.unwrap();
        assert_eq!(state.hall_pass, 3);
        let stored = ledger.get_author_state("pics", "someone").await.unwrap().unwrap();
        assert_eq!(stored.hall_pass, 3);
    }
}
