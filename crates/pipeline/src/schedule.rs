//! Follow-up cadence policy and schedule materialization.
//!
//! The cadence is a pure function of `(article_date, completion_date)`:
//!
//! - span of 90 days or more: a 30-day ladder from the article date, then the
//!   endpoint; when the last ladder rung lands within 5 days of the
//!   endpoint it is dropped (no too-tight pair);
//! - 14 < span <= 90: the midpoint (integer day division), then the
//!   endpoint;
//! - span <= 14: the endpoint only.
//!
//! Autoplan materializes the whole remaining schedule as follow-up rows,
//! deduplicated on `(claim_id, follow_up_date)` so concurrent workers and
//! repeated runs cannot double-book.

use chrono::{Duration, NaiveDate};

use cw_domain::dates;
use cw_domain::model::{Claim, Followup, ModelOutput};
use cw_domain::Result;
use cw_store::Stores;

/// Spans at least this long use the 30-day ladder.
const LADDER_SPAN_DAYS: i64 = 90;
/// Ladder step width.
const LADDER_STEP_DAYS: i64 = 30;
/// Spans at or under this only get the endpoint check.
const ENDPOINT_ONLY_SPAN_DAYS: i64 = 14;
/// A ladder rung this close to the endpoint is dropped.
const TIGHT_PAIR_DAYS: i64 = 5;

/// What kind of check (if any) a claim needs on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// The completion date has arrived or passed: final verdict time.
    Endpoint,
    /// A scheduled interim check-in.
    RegularInterval,
    NoUpdate,
}

/// Classify whether a promise needs a check on `today`.
pub fn classify(today: NaiveDate, start: NaiveDate, end: NaiveDate) -> CheckKind {
    if today >= end {
        return CheckKind::Endpoint;
    }
    let span = (end - start).num_days();

    if span >= LADDER_SPAN_DAYS {
        let mut step = start + Duration::days(LADDER_STEP_DAYS);
        while step < today {
            step += Duration::days(LADDER_STEP_DAYS);
        }
        return if step == today {
            CheckKind::RegularInterval
        } else {
            CheckKind::NoUpdate
        };
    }

    if span <= ENDPOINT_ONLY_SPAN_DAYS {
        // today < end here, and short spans only check at the end.
        return CheckKind::NoUpdate;
    }

    let midpoint = start + Duration::days(span / 2);
    if today == midpoint {
        CheckKind::RegularInterval
    } else {
        CheckKind::NoUpdate
    }
}

/// The full planned check schedule for a promise, endpoint included.
pub fn planned_schedule(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let span = (end - start).num_days();
    if span <= ENDPOINT_ONLY_SPAN_DAYS {
        return vec![end];
    }

    if span >= LADDER_SPAN_DAYS {
        let mut dates = Vec::new();
        let mut step = start + Duration::days(LADDER_STEP_DAYS);
        while step < end {
            dates.push(step);
            step += Duration::days(LADDER_STEP_DAYS);
        }
        if let Some(&last_rung) = dates.last() {
            if (end - last_rung).num_days() <= TIGHT_PAIR_DAYS {
                dates.pop();
            }
        }
        dates.push(end);
        return dates;
    }

    vec![start + Duration::days(span / 2), end]
}

/// Insert a follow-up iff none exists for `(claim_id, date)`. Returns
/// whether a row was inserted.
pub fn insert_followup_dedup(
    stores: &Stores,
    claim: &Claim,
    date: NaiveDate,
    note: Option<ModelOutput>,
) -> Result<bool> {
    let exists = stores
        .follow_ups
        .count(|f| f.claim_id == claim.id && f.follow_up_date == date)?
        > 0;
    if exists {
        return Ok(false);
    }
    stores.follow_ups.insert_one(Followup {
        id: Default::default(),
        claim_id: claim.id.clone(),
        claim_text: claim.claim.clone(),
        follow_up_date: date,
        article_id: claim.article_id.clone(),
        article_link: claim.article_link.clone(),
        model_output: note,
        created_at: dates::now_fixed(),
        processed_at: None,
        processed_update_id: None,
    })?;
    Ok(true)
}

/// Materialize the remaining schedule for every eligible promise.
///
/// Skips a claim when it already has any follow-up dated `today` or later,
/// or when `today` is past its endpoint. Idempotent: the per-date dedupe
/// means a second pass inserts nothing.
pub fn autoplan(stores: &Stores, promises: &[Claim], today: NaiveDate) -> Result<usize> {
    let mut inserted = 0;
    for claim in promises {
        let Some(end) = claim.completion_condition_date else {
            continue;
        };
        if today > end {
            continue;
        }
        let has_future = stores
            .follow_ups
            .count(|f| f.claim_id == claim.id && f.follow_up_date >= today)?
            > 0;
        if has_future {
            continue;
        }

        let note = ModelOutput::Text(format!(
            "Scheduled proactively on {today} for the planned check-in cadence"
        ));
        for date in planned_schedule(claim.article_date, end) {
            if date < today {
                continue;
            }
            if insert_followup_dedup(stores, claim, date, Some(note.clone()))? {
                inserted += 1;
            }
        }
    }
    if inserted > 0 {
        tracing::info!(inserted, "autoplan materialized follow-ups");
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_domain::model::{ClaimPriority, ClaimType, DocId};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn promise(start: &str, end: &str) -> Claim {
        Claim {
            id: DocId::new(),
            claim: "publish the rule".into(),
            verbatim_claim: "we will publish the rule".into(),
            kind: ClaimType::Promise,
            completion_condition: "rule published".into(),
            completion_condition_date: Some(d(end)),
            event_date: None,
            follow_up_worthy: true,
            priority: ClaimPriority::High,
            mechanism: None,
            article_date: d(start),
            article_id: DocId::from("a1"),
            article_link: "https://example.gov/a1".into(),
            date_past: false,
        }
    }

    // ── Cadence boundaries ─────────────────────────────────────────

    #[test]
    fn short_span_schedules_endpoint_only() {
        // span = 9
        assert_eq!(
            planned_schedule(d("2025-01-01"), d("2025-01-10")),
            vec![d("2025-01-10")]
        );
    }

    #[test]
    fn fourteen_day_span_is_still_endpoint_only() {
        assert_eq!(
            planned_schedule(d("2025-01-01"), d("2025-01-15")),
            vec![d("2025-01-15")]
        );
    }

    #[test]
    fn medium_span_schedules_midpoint_then_endpoint() {
        // span = 15, midpoint at floor(15/2) = 7 days.
        assert_eq!(
            planned_schedule(d("2025-01-01"), d("2025-01-16")),
            vec![d("2025-01-08"), d("2025-01-16")]
        );
    }

    #[test]
    fn long_span_ladder_with_endpoint() {
        // span = 120: rungs at +30/+60/+90, endpoint at +120.
        assert_eq!(
            planned_schedule(d("2025-01-01"), d("2025-05-01")),
            vec![d("2025-01-31"), d("2025-03-02"), d("2025-04-01"), d("2025-05-01")]
        );
    }

    #[test]
    fn tight_final_rung_is_dropped() {
        // span = 94: the +90 rung is 4 days before the endpoint.
        assert_eq!(
            planned_schedule(d("2025-01-01"), d("2025-04-05")),
            vec![d("2025-01-31"), d("2025-03-02"), d("2025-04-05")]
        );
    }

    #[test]
    fn spec_seed_schedule_for_ninety_day_promise() {
        // Article 2025-06-01, "within 90 days" => end 2025-08-30.
        assert_eq!(
            planned_schedule(d("2025-06-01"), d("2025-08-30")),
            vec![d("2025-07-01"), d("2025-07-31"), d("2025-08-30")]
        );
    }

    // ── Classifier ─────────────────────────────────────────────────

    #[test]
    fn classify_endpoint_on_or_after_end() {
        assert_eq!(classify(d("2025-01-10"), d("2025-01-01"), d("2025-01-10")), CheckKind::Endpoint);
        assert_eq!(classify(d("2025-02-01"), d("2025-01-01"), d("2025-01-10")), CheckKind::Endpoint);
    }

    #[test]
    fn classify_short_span_quiet_before_end() {
        assert_eq!(classify(d("2025-01-05"), d("2025-01-01"), d("2025-01-10")), CheckKind::NoUpdate);
    }

    #[test]
    fn classify_midpoint_for_medium_span() {
        assert_eq!(
            classify(d("2025-01-08"), d("2025-01-01"), d("2025-01-16")),
            CheckKind::RegularInterval
        );
        assert_eq!(
            classify(d("2025-01-09"), d("2025-01-01"), d("2025-01-16")),
            CheckKind::NoUpdate
        );
    }

    #[test]
    fn classify_ladder_for_long_span() {
        let start = d("2025-01-01");
        let end = d("2025-05-01");
        assert_eq!(classify(d("2025-01-31"), start, end), CheckKind::RegularInterval);
        assert_eq!(classify(d("2025-03-02"), start, end), CheckKind::RegularInterval);
        assert_eq!(classify(d("2025-02-15"), start, end), CheckKind::NoUpdate);
        assert_eq!(classify(d("2025-05-01"), start, end), CheckKind::Endpoint);
    }

    // ── Autoplan ───────────────────────────────────────────────────

    #[test]
    fn autoplan_materializes_future_dates_only() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let mut claim = promise("2025-06-01", "2025-08-30");
        claim.id = stores.claims.insert_one(claim.clone()).unwrap();

        let inserted = autoplan(&stores, &[claim.clone()], d("2025-07-15")).unwrap();
        assert_eq!(inserted, 2); // 07-31 and 08-30; 07-01 is in the past

        let mut dates: Vec<NaiveDate> = stores
            .follow_ups
            .find_all()
            .unwrap()
            .into_iter()
            .map(|f| f.follow_up_date)
            .collect();
        dates.sort();
        assert_eq!(dates, vec![d("2025-07-31"), d("2025-08-30")]);
    }

    #[test]
    fn autoplan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let mut claim = promise("2025-06-01", "2025-08-30");
        claim.id = stores.claims.insert_one(claim.clone()).unwrap();

        let first = autoplan(&stores, &[claim.clone()], d("2025-06-01")).unwrap();
        assert_eq!(first, 3);
        let second = autoplan(&stores, &[claim.clone()], d("2025-06-01")).unwrap();
        assert_eq!(second, 0);
        assert_eq!(stores.follow_ups.count(|_| true).unwrap(), 3);
    }

    #[test]
    fn autoplan_skips_claims_with_future_followups() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let mut claim = promise("2025-06-01", "2025-08-30");
        claim.id = stores.claims.insert_one(claim.clone()).unwrap();

        insert_followup_dedup(&stores, &claim, d("2025-08-01"), None).unwrap();
        let inserted = autoplan(&stores, &[claim], d("2025-07-15")).unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn autoplan_skips_past_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let mut claim = promise("2025-06-01", "2025-08-30");
        claim.id = stores.claims.insert_one(claim.clone()).unwrap();

        let inserted = autoplan(&stores, &[claim], d("2025-09-15")).unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn followup_dedup_blocks_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let mut claim = promise("2025-06-01", "2025-08-30");
        claim.id = stores.claims.insert_one(claim.clone()).unwrap();

        assert!(insert_followup_dedup(&stores, &claim, d("2025-07-01"), None).unwrap());
        assert!(!insert_followup_dedup(&stores, &claim, d("2025-07-01"), None).unwrap());
        assert_eq!(stores.follow_ups.count(|_| true).unwrap(), 1);
    }
}
