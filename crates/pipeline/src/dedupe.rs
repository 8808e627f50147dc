//! Collapse duplicate follow-ups.
//!
//! Guarantee restored: at most one follow-up per `(claim_id,
//! follow_up_date)`. Keep preference: a processed row wins over an
//! unprocessed one; ties break to the earliest `created_at`, then id.

use std::collections::HashMap;

use chrono::NaiveDate;

use cw_domain::model::{DocId, Followup};
use cw_domain::Result;
use cw_store::Stores;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeStats {
    pub groups: usize,
    pub kept: usize,
    pub deleted: usize,
    pub dry_run: bool,
}

fn sort_key(f: &Followup) -> (chrono::DateTime<chrono::FixedOffset>, String) {
    (f.created_at, f.id.to_string())
}

/// Pick the survivor of a duplicate group.
fn choose_keep(group: &[Followup]) -> &Followup {
    let mut processed: Vec<&Followup> = group.iter().filter(|f| f.processed_at.is_some()).collect();
    let mut unprocessed: Vec<&Followup> = group.iter().filter(|f| f.processed_at.is_none()).collect();
    processed.sort_by_key(|f| sort_key(f));
    unprocessed.sort_by_key(|f| sort_key(f));
    processed.first().copied().unwrap_or_else(|| unprocessed[0])
}

/// Run the dedupe pass. `limit` caps how many duplicate groups are
/// handled; `dry_run` only reports what would be deleted.
pub fn run(stores: &Stores, limit: Option<usize>, dry_run: bool) -> Result<DedupeStats> {
    let all = stores.follow_ups.find_all()?;

    let mut groups: HashMap<(DocId, NaiveDate), Vec<Followup>> = HashMap::new();
    for followup in all {
        groups
            .entry((followup.claim_id.clone(), followup.follow_up_date))
            .or_default()
            .push(followup);
    }

    let mut duplicate_groups: Vec<((DocId, NaiveDate), Vec<Followup>)> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .collect();
    // Stable handling order across runs.
    duplicate_groups.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some(limit) = limit {
        duplicate_groups.truncate(limit);
    }

    let mut stats = DedupeStats {
        groups: duplicate_groups.len(),
        kept: 0,
        deleted: 0,
        dry_run,
    };

    for ((claim_id, date), members) in &duplicate_groups {
        let keep = choose_keep(members);
        stats.kept += 1;
        for member in members {
            if member.id == keep.id {
                continue;
            }
            if dry_run {
                tracing::info!(
                    %claim_id,
                    %date,
                    keep = %keep.id,
                    delete = %member.id,
                    "[dry-run] would delete duplicate follow-up"
                );
                continue;
            }
            match stores.follow_ups.delete_one(&member.id) {
                Ok(true) => stats.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(id = %member.id, error = %e, "failed to delete duplicate follow-up")
                }
            }
        }
    }

    tracing::info!(
        groups = stats.groups,
        kept = stats.kept,
        deleted = stats.deleted,
        dry_run = stats.dry_run,
        "follow-up dedupe finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cw_domain::dates::now_fixed;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn followup(claim: &str, date: &str, created_offset_secs: i64, processed: bool) -> Followup {
        Followup {
            id: DocId::default(),
            claim_id: DocId::from(claim),
            claim_text: "text".into(),
            follow_up_date: d(date),
            article_id: DocId::from("a1"),
            article_link: "https://example.gov/a".into(),
            model_output: None,
            created_at: now_fixed() + Duration::seconds(created_offset_secs),
            processed_at: processed.then(now_fixed),
            processed_update_id: None,
        }
    }

    #[test]
    fn duplicates_collapse_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        stores.follow_ups.insert_one(followup("c1", "2025-07-01", 0, false)).unwrap();
        stores.follow_ups.insert_one(followup("c1", "2025-07-01", 10, false)).unwrap();
        stores.follow_ups.insert_one(followup("c1", "2025-08-01", 0, false)).unwrap();

        let stats = run(&stores, None, false).unwrap();
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stores.follow_ups.count(|_| true).unwrap(), 2);
    }

    #[test]
    fn processed_duplicate_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        // The processed row is newer, but still wins.
        stores.follow_ups.insert_one(followup("c1", "2025-07-01", 0, false)).unwrap();
        let processed_id = stores
            .follow_ups
            .insert_one(followup("c1", "2025-07-01", 30, true))
            .unwrap();

        run(&stores, None, false).unwrap();
        let survivors = stores.follow_ups.find_all().unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, processed_id);
    }

    #[test]
    fn earliest_created_wins_among_unprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        let early_id = stores
            .follow_ups
            .insert_one(followup("c1", "2025-07-01", -60, false))
            .unwrap();
        stores.follow_ups.insert_one(followup("c1", "2025-07-01", 0, false)).unwrap();

        run(&stores, None, false).unwrap();
        let survivors = stores.follow_ups.find_all().unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, early_id);
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        stores.follow_ups.insert_one(followup("c1", "2025-07-01", 0, false)).unwrap();
        stores.follow_ups.insert_one(followup("c1", "2025-07-01", 10, false)).unwrap();

        let stats = run(&stores, None, true).unwrap();
        assert_eq!(stats.deleted, 0);
        assert_eq!(stores.follow_ups.count(|_| true).unwrap(), 2);
    }
}
