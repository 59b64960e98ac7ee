//! End-to-end passes over a memory ledger and the dry-run platform.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use postwarden_core::config::{BotConfig, EngineConfig};
use postwarden_core::{
    ActiveStatus, BanAbility, BatchState, CountedStatus, EnforcementAction, Ledger, PlatformError,
    PolicySettings, Submission,
};
use postwarden_rules::arbiter::grant_hall_passes;
use postwarden_rules::{CallKind, DryRunPlatform, EnforcementEngine, NewSubmission, PolicyCache};
use postwarden_storage::MemoryLedger;

// ── Fixtures ────────────────────────────────────────────────────────

struct Harness {
    platform: Arc<DryRunPlatform>,
    ledger: Arc<MemoryLedger>,
    engine: EnforcementEngine,
}

fn settings(max: u32) -> PolicySettings {
    PolicySettings {
        max_count_per_interval: max,
        min_post_interval: Duration::hours(1),
        ..Default::default()
    }
}

fn harness_with(settings: PolicySettings, config: EngineConfig) -> Harness {
    let platform = Arc::new(DryRunPlatform::new());
    let ledger = Arc::new(MemoryLedger::new());
    let engine = engine_over(&platform, &ledger, settings, config);
    Harness { platform, ledger, engine }
}

fn engine_over(
    platform: &Arc<DryRunPlatform>,
    ledger: &Arc<MemoryLedger>,
    settings: PolicySettings,
    config: EngineConfig,
) -> EnforcementEngine {
    let mut engine = EnforcementEngine::new(
        platform.clone(),
        ledger.clone(),
        &BotConfig::default(),
        config,
        PolicyCache::new(Duration::minutes(60), 0),
    );
    engine.set_policy_documents(HashMap::from([("pics".to_string(), settings)]));
    engine
}

fn harness(settings: PolicySettings) -> Harness {
    harness_with(settings, EngineConfig::default())
}

fn new_post(id: &str, author: &str, at: DateTime<Utc>) -> NewSubmission {
    NewSubmission {
        id: id.to_string(),
        author: author.to_string(),
        community: "pics".to_string(),
        created_at: at,
        title: format!("post {id}"),
        is_self: false,
        is_oc: false,
        author_flair: None,
        link_flair: None,
    }
}

async fn post(h: &mut Harness, id: &str, author: &str, at: DateTime<Utc>, now: DateTime<Utc>) {
    let report = h.engine.ingest(vec![new_post(id, author, at)], now).await.unwrap();
    assert_eq!(report.inserted, 1);
}

async fn stored(h: &Harness, id: &str) -> Submission {
    h.ledger.get_submission(id).await.unwrap().unwrap()
}

/// A violation recorded on an earlier day.
async fn seed_violation(h: &Harness, id: &str, author: &str, at: DateTime<Utc>) {
    let mut s = Submission::new(id, author, "pics", at, "old");
    s.counted_status = CountedStatus::Flagged;
    s.reviewed = true;
    h.ledger.upsert_submission(&s).await.unwrap();
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn second_post_in_the_interval_is_removed_and_commented() {
    let mut h = harness(PolicySettings {
        action: EnforcementAction::Remove,
        comment: Some("Please wait, your last post was {{ prev_url }}".to_string()),
        ..settings(1)
    });
    let now = Utc::now();
    post(&mut h, "first", "spammer", now - Duration::minutes(50), now).await;
    post(&mut h, "second", "spammer", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.detection.opened, 1);
    assert_eq!(report.violations, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.comments_posted, 1);

    let first = stored(&h, "first").await;
    assert_eq!(first.counted_status, CountedStatus::Counts);
    assert!(first.reviewed);
    assert!(first.pre_duplicate);

    let second = stored(&h, "second").await;
    assert_eq!(second.counted_status, CountedStatus::Removed);
    assert!(second.flagged_duplicate);
    assert_eq!(second.next_eligible, Some(first.created_at + Duration::hours(1)));
    assert!(second.reply_comment.is_none());
    assert_eq!(second.bot_comment_id.as_deref(), Some("c1"));

    let replies = h.platform.calls_of(CallKind::Reply);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].target, "second");
    assert!(replies[0].detail.contains("redd.it/first"));

    // No bans configured: nothing is remembered about the author.
    assert!(h.ledger.get_author_state("pics", "spammer").await.unwrap().is_none());

    // A later pass does not act on the same posts again.
    let report = h.engine.run_pass_at(now + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.violations, 0);
    assert_eq!(h.platform.call_count(CallKind::ModRemove), 1);
    assert_eq!(h.platform.call_count(CallKind::Reply), 1);
}

#[tokio::test]
async fn weekly_interval_catches_a_post_days_later() {
    let mut h = harness(PolicySettings {
        action: EnforcementAction::Remove,
        min_post_interval: Duration::days(7),
        ..settings(1)
    });
    let now = Utc::now();
    post(&mut h, "monday", "someone", now - Duration::days(5), now).await;
    post(&mut h, "saturday", "someone", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.detection.opened, 1);
    assert_eq!(report.violations, 1);
    assert_eq!(report.removed, 1);

    let monday = stored(&h, "monday").await;
    assert_eq!(monday.counted_status, CountedStatus::Counts);
    assert!(monday.pre_duplicate);

    let saturday = stored(&h, "saturday").await;
    assert_eq!(saturday.counted_status, CountedStatus::Removed);
    assert_eq!(saturday.next_eligible, Some(monday.created_at + Duration::days(7)));
    assert!(saturday.next_eligible.unwrap() > now + Duration::days(1));
}

#[tokio::test]
async fn multi_day_interval_gathers_every_prior_in_the_window() {
    let mut h = harness(PolicySettings {
        action: EnforcementAction::Remove,
        min_post_interval: Duration::days(3),
        ..settings(2)
    });
    let now = Utc::now();
    post(&mut h, "outside", "someone", now - Duration::hours(120), now).await;
    post(&mut h, "p1", "someone", now - Duration::hours(70), now).await;
    post(&mut h, "p2", "someone", now - Duration::hours(40), now).await;
    post(&mut h, "p3", "someone", now - Duration::hours(1), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.violations, 1);

    assert!(!stored(&h, "outside").await.pre_duplicate);
    assert!(stored(&h, "p1").await.pre_duplicate);
    assert!(stored(&h, "p2").await.pre_duplicate);

    let p3 = stored(&h, "p3").await;
    assert_eq!(p3.counted_status, CountedStatus::Removed);
    assert_eq!(p3.next_eligible, Some(now - Duration::hours(70) + Duration::days(3)));
}

#[tokio::test]
async fn exactly_the_limit_is_allowed() {
    let mut h = harness(settings(2));
    let now = Utc::now();
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(30), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.detection.opened, 0);
    assert_eq!(report.violations, 0);

    post(&mut h, "c", "someone", now - Duration::minutes(5), now).await;
    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.violations, 1);
    assert_eq!(stored(&h, "c").await.counted_status, CountedStatus::Flagged);
    assert_eq!(stored(&h, "b").await.counted_status, CountedStatus::Counts);
    // Action `none`: nothing touches the platform beyond status lookups.
    assert_eq!(h.platform.call_count(CallKind::ModRemove), 0);
    assert_eq!(h.platform.call_count(CallKind::Report), 0);
}

#[tokio::test]
async fn report_action_files_a_report() {
    let mut h = harness(PolicySettings {
        action: EnforcementAction::Report,
        ..settings(1)
    });
    let now = Utc::now();
    post(&mut h, "a", "someone", now - Duration::minutes(40), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(20), now).await;

    h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(stored(&h, "b").await.counted_status, CountedStatus::Flagged);
    let reports = h.platform.calls_of(CallKind::Report);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].target, "b");
    assert!(reports[0].detail.chars().count() <= 99);
}

#[tokio::test]
async fn hall_pass_is_spent_before_enforcing() {
    let mut h = harness(settings(1));
    let now = Utc::now();
    grant_hall_passes(h.ledger.as_ref(), "pics", "someone", 1, now).await.unwrap();
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.hall_passes, 1);
    assert_eq!(report.violations, 0);
    assert_eq!(stored(&h, "b").await.counted_status, CountedStatus::HallPass);
    let state = h.ledger.get_author_state("pics", "someone").await.unwrap().unwrap();
    assert_eq!(state.hall_pass, 0);
    let modmail = h.platform.calls_of(CallKind::SendModmail);
    assert_eq!(modmail.len(), 1);
    assert!(modmail[0].detail.contains("Hall pass was used by someone"));

    // Out of passes: the next one is enforced.
    let later = now + Duration::minutes(6);
    post(&mut h, "c", "someone", now + Duration::minutes(5), later).await;
    let report = h.engine.run_pass_at(later).await.unwrap();
    assert_eq!(report.violations, 1);
    assert_eq!(stored(&h, "c").await.counted_status, CountedStatus::Flagged);
}

#[tokio::test]
async fn self_deleted_prior_inside_grace_is_forgiven() {
    let mut h = harness(PolicySettings {
        grace_period: Duration::minutes(30),
        ..settings(1)
    });
    let now = Utc::now();
    post(&mut h, "a", "someone", now - Duration::minutes(20), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(5), now).await;
    h.platform.set_status("a", postwarden_core::PostedStatus::SelfDeleted);

    // `a` is still counted when detection runs, so a group is opened, but
    // the deletion is within grace of `b`.
    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.violations, 0);
    assert_eq!(stored(&h, "b").await.counted_status, CountedStatus::Counts);
}

#[tokio::test]
async fn warning_before_the_ban_threshold_then_ban() {
    let mut h = harness(PolicySettings {
        ban_threshold_count: 3,
        ban_duration_days: Some(7.0),
        ..settings(1)
    });
    let now = Utc::now();
    seed_violation(&h, "old1", "someone", now - Duration::days(3)).await;
    seed_violation(&h, "old2", "someone", now - Duration::days(2)).await;
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.violations, 1);
    assert_eq!(report.warnings, 1);
    assert_eq!(h.platform.call_count(CallKind::Ban), 0);
    let messages = h.platform.calls_of(CallKind::Message);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].target, "someone");

    // Third prior violation on record: the next one bans.
    let later = now + Duration::hours(2);
    post(&mut h, "c", "someone", later - Duration::minutes(30), later).await;
    post(&mut h, "d", "someone", later - Duration::minutes(10), later).await;
    let report = h.engine.run_pass_at(later).await.unwrap();
    assert_eq!(report.bans, 1);
    let bans = h.platform.calls_of(CallKind::Ban);
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].target, "pics/someone");
    assert!(bans[0].detail.starts_with("7|"));

    let policy = h.ledger.get_policy("pics").await.unwrap().unwrap();
    assert_eq!(policy.ban_ability, BanAbility::Enabled);
}

#[tokio::test]
async fn refused_ban_falls_back_to_soft_blacklist() {
    let mut h = harness(PolicySettings {
        action: EnforcementAction::Remove,
        ban_threshold_count: 1,
        ban_duration_days: Some(30.0),
        notify_about_spammers: true,
        ..settings(1)
    });
    h.platform
        .fail(CallKind::Ban, PlatformError::Forbidden("not a moderator with access".into()));
    let now = Utc::now();
    seed_violation(&h, "old", "someone", now - Duration::days(1)).await;
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.violations, 1);
    assert_eq!(report.soft_blacklists, 1);

    let state = h.ledger.get_author_state("pics", "someone").await.unwrap().unwrap();
    assert_eq!(state.next_eligible, Some(now + Duration::days(14)));
    assert_eq!(state.last_valid_post.as_deref(), Some("b"));

    let policy = h.ledger.get_policy("pics").await.unwrap().unwrap();
    assert_eq!(policy.ban_ability, BanAbility::NoPermission);
    assert_eq!(policy.active_status, ActiveStatus::LackingBanPermission);
    let modmail = h.platform.calls_of(CallKind::SendModmail);
    assert_eq!(modmail.len(), 1);
    assert!(modmail[0].detail.contains("multiple rule violations"));

    // Anything posted during the lock-out is removed by the fast path.
    let later = now + Duration::hours(3);
    post(&mut h, "c", "someone", later - Duration::minutes(1), later).await;
    let report = h.engine.run_pass_at(later).await.unwrap();
    assert_eq!(report.blacklisted, 1);
    assert_eq!(stored(&h, "c").await.counted_status, CountedStatus::Blacklisted);
}

#[tokio::test]
async fn exhausted_budget_leaves_the_batch_for_the_next_pass() {
    let config = EngineConfig {
        pass_budget: Duration::zero(),
        ..EngineConfig::default()
    };
    let mut h = harness_with(settings(1), config);
    let now = Utc::now();
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert!(report.budget_exhausted);
    assert_eq!(report.groups_completed, 0);
    let open = h.ledger.open_batches(None).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].state, BatchState::Open);

    let mut engine = engine_over(&h.platform, &h.ledger, settings(1), EngineConfig::default());
    let report = engine.run_pass_at(now + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.detection.recovered, 1);
    assert_eq!(report.groups_completed, 1);
    assert_eq!(report.violations, 1);
    assert!(h.ledger.open_batches(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_lookup_defers_the_group() {
    let mut h = harness(settings(1));
    let now = Utc::now();
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(10), now).await;
    h.platform
        .fail(CallKind::GetPostedStatus, PlatformError::Transient("503".into()));

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.groups_deferred, 1);
    assert_eq!(report.violations, 0);

    h.platform.clear_failure(CallKind::GetPostedStatus);
    let report = h.engine.run_pass_at(now + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.groups_completed, 1);
    assert_eq!(report.violations, 1);
}

#[tokio::test]
async fn removal_refusal_marks_the_community() {
    let mut h = harness(PolicySettings {
        action: EnforcementAction::Remove,
        comment: Some("Slow down".to_string()),
        ..settings(1)
    });
    h.platform
        .fail(CallKind::ModRemove, PlatformError::Forbidden("missing posts permission".into()));
    let now = Utc::now();
    post(&mut h, "a", "someone", now - Duration::minutes(50), now).await;
    post(&mut h, "b", "someone", now - Duration::minutes(10), now).await;

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.remove_failed, 1);
    let b = stored(&h, "b").await;
    assert_eq!(b.counted_status, CountedStatus::RemoveFailed);
    // The staged comment only follows a settled enforcement.
    assert!(b.reply_comment.is_none());
    assert_eq!(report.comments_dropped, 1);

    let policy = h.ledger.get_policy("pics").await.unwrap().unwrap();
    assert_eq!(policy.active_status, ActiveStatus::LackingRemovePermission);
}

#[tokio::test]
async fn unknown_communities_are_not_ingested() {
    let mut h = harness(settings(1));
    h.platform.remove_community("nowhere");
    let now = Utc::now();
    let mut item = new_post("x", "someone", now);
    item.community = "nowhere".to_string();
    let report = h
        .engine
        .ingest(vec![item, new_post("y", "someone", now), new_post("y", "someone", now)], now)
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test]
async fn missing_member_abandons_the_batch() {
    let mut h = harness(settings(1));
    let now = Utc::now();
    let ghost = Submission::new("ghost", "someone", "pics", now - Duration::minutes(30), "t");
    let real = Submission::new("real", "someone", "pics", now - Duration::minutes(20), "t");
    h.ledger.upsert_submission(&real).await.unwrap();
    let batch = postwarden_core::EvaluationBatch::open("pics", "someone", &[&ghost, &real]).unwrap();
    h.ledger.upsert_batch(&batch).await.unwrap();

    let report = h.engine.run_pass_at(now).await.unwrap();
    assert_eq!(report.groups_abandoned, 1);
    let stored_batch = h.ledger.get_batch(&batch.id).await.unwrap().unwrap();
    assert_eq!(stored_batch.state, BatchState::Abandoned);
}
