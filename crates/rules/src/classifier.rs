//! Decides whether a submission counts toward its author's limit.
//!
//! Classification is idempotent: a submission with a settled counted status
//! is never re-examined and costs no platform call.

use chrono::{DateTime, Duration, Utc};
use postwarden_core::{
    CommunityPolicy, CountedStatus, Ledger, Platform, PlatformError, PostedStatus, Submission,
};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: CountedStatus,
    pub reason: String,
}

/// Refresh `submission`'s posted status if it is stale, then run the
/// exemption checks. The refreshed status is persisted straight away.
///
/// Permission errors on the lookup fall back to the last known status; a
/// missing post becomes `Unavailable`. Transient errors are returned so the
/// caller can leave the submission for a later pass.
pub async fn classify(
    platform: &dyn Platform,
    ledger: &dyn Ledger,
    policy: &CommunityPolicy,
    submission: &mut Submission,
    now: DateTime<Utc>,
    freshness: Duration,
) -> Result<Classification> {
    if submission.counted_status.is_settled() {
        return Ok(Classification {
            status: submission.counted_status,
            reason: "previously exempted".to_string(),
        });
    }

    if submission.needs_status_refresh(now, freshness) {
        match platform.get_posted_status(submission).await {
            Ok(lookup) => {
                if !submission.observe_posted_status(lookup.posted_status, now) {
                    warn!(
                        id = %submission.id,
                        from = submission.posted_status.label(),
                        to = lookup.posted_status.label(),
                        "ignoring impossible posted status change"
                    );
                }
                if lookup.author_flair.is_some() {
                    submission.author_flair = lookup.author_flair;
                }
                if lookup.link_flair.is_some() {
                    submission.link_flair = lookup.link_flair;
                }
                ledger.upsert_submission(submission).await?;
            }
            Err(PlatformError::NotFound(_)) => {
                submission.observe_posted_status(PostedStatus::Unavailable, now);
                ledger.upsert_submission(submission).await?;
            }
            Err(PlatformError::Forbidden(reason)) => {
                warn!(id = %submission.id, reason = %reason, "status lookup refused, using last known status");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let (status, reason) = evaluate_exemptions(policy, submission);
    debug!(id = %submission.id, status = %status, reason = %reason, "classified");
    Ok(Classification { status, reason })
}

/// The exemption checks, first match wins.
pub fn evaluate_exemptions(policy: &CommunityPolicy, s: &Submission) -> (CountedStatus, String) {
    let settings = &policy.settings;

    match s.posted_status {
        PostedStatus::SpamFiltered => {
            return (CountedStatus::SpamFiltered, "removed by spam filter".into());
        }
        PostedStatus::AutoModRemoved if settings.ignore_automod_removed => {
            return (CountedStatus::AutoModRemoved, "removed by automod".into());
        }
        PostedStatus::FlairHelperRemoved if settings.ignore_moderator_removed => {
            return (CountedStatus::FlairHelperRemoved, "removed by flair helper".into());
        }
        PostedStatus::ModRemoved if settings.ignore_moderator_removed => {
            return (CountedStatus::ModRemoved, "removed by a moderator".into());
        }
        _ => {}
    }

    if settings.exempt_oc && s.is_oc {
        return (CountedStatus::OcExempt, "original content".into());
    }
    if settings.exempt_self_posts && s.is_self {
        return (CountedStatus::SelfExempt, "text post".into());
    }
    if settings.exempt_link_posts && !s.is_self {
        return (CountedStatus::LinkExempt, "link post".into());
    }
    if settings.exempt_moderator_posts && policy.is_moderator(&s.author) {
        return (CountedStatus::ModPostExempt, "posted by a moderator".into());
    }

    let flair = s.author_flair.as_deref().unwrap_or("");
    if let Some(keywords) = settings.author_exempt_flair_keyword.as_ref() {
        if !keywords.is_empty() && keywords.matches(flair) {
            return (CountedStatus::FlairExempt, format!("author flair '{flair}' is exempt"));
        }
    }
    if let Some(keywords) = settings.author_not_exempt_flair_keyword.as_ref() {
        if !keywords.is_empty() && (flair.is_empty() || !keywords.matches(flair)) {
            return (
                CountedStatus::FlairNotExempt,
                "author flair is not on the counted list".into(),
            );
        }
    }

    if let Some(keywords) = settings.title_exempt_keyword.as_ref() {
        if !keywords.is_empty() && keywords.matches(&s.title) {
            return (CountedStatus::TitleKeywordExempt, "title keyword exempt".into());
        }
    }
    if let Some(keywords) = settings.title_not_exempt_keyword.as_ref() {
        let link_flair = s.link_flair.as_deref().unwrap_or("");
        if !keywords.is_empty() && !keywords.matches(&s.title) && !keywords.matches(link_flair) {
            return (
                CountedStatus::TitleCriteriaNotMet,
                "title and link flair miss the counted keywords".into(),
            );
        }
    }

    (CountedStatus::Counts, "counts toward the limit".into())
}

#[cfg(test)]
mod tests {
    use postwarden_core::{KeywordList, PolicySettings};
    use postwarden_storage::MemoryLedger;

    use super::*;
    use crate::dry_run::{CallKind, DryRunPlatform};

    fn policy(settings: PolicySettings) -> CommunityPolicy {
        let mut p = CommunityPolicy::new("pics", settings);
        p.moderators.insert("ModPerson".to_string());
        p
    }

    fn post() -> Submission {
        let mut s = Submission::new("abc", "someone", "pics", Utc::now(), "My holiday photo");
        s.posted_status = PostedStatus::Up;
        s
    }

    fn status(p: &CommunityPolicy, s: &Submission) -> CountedStatus {
        evaluate_exemptions(p, s).0
    }

    #[test]
    fn plain_post_counts() {
        assert_eq!(status(&policy(PolicySettings::default()), &post()), CountedStatus::Counts);
    }

    #[test]
    fn removal_statuses_come_first() {
        let p = policy(PolicySettings {
            exempt_oc: true,
            ..Default::default()
        });
        let mut s = post();
        s.is_oc = true;
        s.posted_status = PostedStatus::SpamFiltered;
        assert_eq!(status(&p, &s), CountedStatus::SpamFiltered);
        s.posted_status = PostedStatus::AutoModRemoved;
        assert_eq!(status(&p, &s), CountedStatus::AutoModRemoved);
        s.posted_status = PostedStatus::FlairHelperRemoved;
        assert_eq!(status(&p, &s), CountedStatus::FlairHelperRemoved);
        s.posted_status = PostedStatus::ModRemoved;
        assert_eq!(status(&p, &s), CountedStatus::ModRemoved);
    }

    #[test]
    fn removals_count_when_not_ignored() {
        let p = policy(PolicySettings {
            ignore_automod_removed: false,
            ignore_moderator_removed: false,
            ..Default::default()
        });
        let mut s = post();
        s.posted_status = PostedStatus::ModRemoved;
        assert_eq!(status(&p, &s), CountedStatus::Counts);
        s.posted_status = PostedStatus::AutoModRemoved;
        assert_eq!(status(&p, &s), CountedStatus::Counts);
        s.posted_status = PostedStatus::SpamFiltered;
        assert_eq!(status(&p, &s), CountedStatus::SpamFiltered);
    }

    #[test]
    fn oc_beats_self_beats_moderator() {
        let p = policy(PolicySettings {
            exempt_oc: true,
            exempt_self_posts: true,
            exempt_moderator_posts: true,
            ..Default::default()
        });
        let mut s = post();
        s.author = "modperson".into();
        s.is_self = true;
        s.is_oc = true;
        assert_eq!(status(&p, &s), CountedStatus::OcExempt);
        s.is_oc = false;
        assert_eq!(status(&p, &s), CountedStatus::SelfExempt);
        s.is_self = false;
        assert_eq!(status(&p, &s), CountedStatus::ModPostExempt);
    }

    #[test]
    fn link_posts_exempt() {
        let p = policy(PolicySettings {
            exempt_link_posts: true,
            ..Default::default()
        });
        let mut s = post();
        assert_eq!(status(&p, &s), CountedStatus::LinkExempt);
        s.is_self = true;
        assert_eq!(status(&p, &s), CountedStatus::Counts);
    }

    #[test]
    fn flair_keywords() {
        let p = policy(PolicySettings {
            author_exempt_flair_keyword: Some(KeywordList::Many(vec!["Verified".into()])),
            ..Default::default()
        });
        let mut s = post();
        s.author_flair = Some("verified artist".into());
        assert_eq!(status(&p, &s), CountedStatus::FlairExempt);

        let p = policy(PolicySettings {
            author_not_exempt_flair_keyword: Some(KeywordList::One("newbie".into())),
            ..Default::default()
        });
        s.author_flair = None;
        assert_eq!(status(&p, &s), CountedStatus::FlairNotExempt);
        s.author_flair = Some("Veteran".into());
        assert_eq!(status(&p, &s), CountedStatus::FlairNotExempt);
        s.author_flair = Some("NEWBIE".into());
        assert_eq!(status(&p, &s), CountedStatus::Counts);
    }

    #[test]
    fn title_keywords() {
        let p = policy(PolicySettings {
            title_exempt_keyword: Some(KeywordList::One("[meta]".into())),
            title_not_exempt_keyword: Some(KeywordList::Many(vec!["photo".into(), "art".into()])),
            ..Default::default()
        });
        let mut s = post();
        assert_eq!(status(&p, &s), CountedStatus::Counts);
        s.title = "[META] rules update".into();
        assert_eq!(status(&p, &s), CountedStatus::TitleKeywordExempt);
        s.title = "Question about lenses".into();
        assert_eq!(status(&p, &s), CountedStatus::TitleCriteriaNotMet);
        s.link_flair = Some("Art".into());
        assert_eq!(status(&p, &s), CountedStatus::Counts);
    }

    #[test]
    fn blank_keyword_lists_are_ignored() {
        let p = policy(PolicySettings {
            author_not_exempt_flair_keyword: Some(KeywordList::Many(vec!["  ".into()])),
            title_not_exempt_keyword: Some(KeywordList::One(String::new())),
            ..Default::default()
        });
        assert_eq!(status(&p, &post()), CountedStatus::Counts);
    }

    #[tokio::test]
    async fn settled_submissions_are_not_looked_up_again() {
        let platform = DryRunPlatform::new();
        let ledger = MemoryLedger::new();
        let p = policy(PolicySettings {
            exempt_self_posts: true,
            ..Default::default()
        });
        let mut s = Submission::new("abc", "someone", "pics", Utc::now(), "t");
        s.is_self = true;

        let first = classify(&platform, &ledger, &p, &mut s, Utc::now(), Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(first.status, CountedStatus::SelfExempt);
        s.set_counted_status(first.status).unwrap();
        assert_eq!(platform.call_count(CallKind::GetPostedStatus), 1);

        let second = classify(&platform, &ledger, &p, &mut s, Utc::now(), Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(second.status, CountedStatus::SelfExempt);
        assert_eq!(second.reason, "previously exempted");
        assert_eq!(platform.call_count(CallKind::GetPostedStatus), 1);
    }

    #[tokio::test]
    async fn refresh_updates_status_and_flair() {
        let platform = DryRunPlatform::new();
        platform.set_lookup(
            "abc",
            postwarden_core::PostLookup {
                posted_status: PostedStatus::ModRemoved,
                author_flair: Some("regular".into()),
                link_flair: None,
            },
        );
        let ledger = MemoryLedger::new();
        let p = policy(PolicySettings::default());
        let mut s = Submission::new("abc", "someone", "pics", Utc::now(), "t");

        let c = classify(&platform, &ledger, &p, &mut s, Utc::now(), Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(c.status, CountedStatus::ModRemoved);
        assert_eq!(s.author_flair.as_deref(), Some("regular"));
        let stored = ledger.get_submission("abc").await.unwrap().unwrap();
        assert_eq!(stored.posted_status, PostedStatus::ModRemoved);
    }

    #[tokio::test]
    async fn lookup_failures() {
        let platform = DryRunPlatform::new();
        let ledger = MemoryLedger::new();
        let p = policy(PolicySettings::default());

        platform.fail(CallKind::GetPostedStatus, PlatformError::NotFound("gone".into()));
        let mut s = Submission::new("abc", "someone", "pics", Utc::now(), "t");
        classify(&platform, &ledger, &p, &mut s, Utc::now(), Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(s.posted_status, PostedStatus::Unavailable);

        platform.fail(CallKind::GetPostedStatus, PlatformError::Forbidden("private".into()));
        let mut s = Submission::new("def", "someone", "pics", Utc::now(), "t");
        let c = classify(&platform, &ledger, &p, &mut s, Utc::now(), Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(c.status, CountedStatus::Counts);

        platform.fail(CallKind::GetPostedStatus, PlatformError::Transient("503".into()));
        let mut s = Submission::new("ghi", "someone", "pics", Utc::now(), "t");
        let err = classify(&platform, &ledger, &p, &mut s, Utc::now(), Duration::hours(3))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
