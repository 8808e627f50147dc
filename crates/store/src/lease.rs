//! TTL-bounded work leases.
//!
//! A lease is a named field embedded on a document:
//! `locks.<name> = {locked_at, owner}`. Acquisition is one compare-and-set
//! under the collection's file lock: set iff absent or expired. A crashed
//! worker's lease becomes reclaimable once its TTL elapses.
//!
//! The lease is an optimization, not a correctness guarantee — all leased
//! work must remain idempotent. Entities that participate must carry a
//! `locks` map in their stored shape, or a typed rewrite would drop the
//! bookkeeping.

use std::time::Duration;

use serde_json::{json, Value};

use cw_domain::dates;
use cw_domain::model::DocId;
use cw_domain::Result;

use crate::collection::{Collection, Doc};

/// Default lease TTL used by the pipeline stages.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Try to acquire `(id, lock_name)` for `owner`. Returns `true` only when
/// the CAS succeeded; a live lease held by anyone (including `owner`)
/// yields `false`.
pub fn acquire<T: Doc>(
    coll: &Collection<T>,
    id: &DocId,
    lock_name: &str,
    owner: &str,
    ttl: Duration,
) -> Result<bool> {
    let now = dates::now_fixed();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
    let expire_before = now - ttl;

    coll.modify_raw(id, |doc| {
        let live = doc
            .get("locks")
            .and_then(|locks| locks.get(lock_name))
            .and_then(|lock| lock.get("locked_at"))
            .and_then(Value::as_str)
            .and_then(dates::parse_datetime_flexible)
            .map_or(false, |locked_at| locked_at >= expire_before);
        if live {
            return false;
        }

        let Some(map) = doc.as_object_mut() else {
            return false;
        };
        let locks = map.entry("locks").or_insert_with(|| json!({}));
        if !locks.is_object() {
            *locks = json!({});
        }
        locks[lock_name] = json!({
            "locked_at": now.to_rfc3339(),
            "owner": owner,
        });
        true
    })
}

/// Release `(id, lock_name)`. Never fails the caller; a vanished document
/// or absent lock is fine.
pub fn release<T: Doc>(coll: &Collection<T>, id: &DocId, lock_name: &str) {
    let result = coll.modify_raw(id, |doc| {
        doc.get_mut("locks")
            .and_then(Value::as_object_mut)
            .map_or(false, |locks| locks.remove(lock_name).is_some())
    });
    if let Err(e) = result {
        tracing::warn!(%id, lock_name, error = %e, "lease release failed; TTL will reclaim");
    }
}

/// Worker identity used as the lease owner: hostname when available,
/// else the process id.
pub fn worker_owner() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("pid-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FileStore;
    use chrono::NaiveDate;
    use cw_domain::model::Article;

    fn seed(store: &FileStore) -> (Collection<Article>, DocId) {
        let coll = store.collection::<Article>();
        let id = coll
            .insert_one(Article {
                id: DocId::default(),
                title: "t".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                ingested_at: dates::now_fixed(),
                link: "https://example.gov/a".into(),
                tags: vec![],
                raw_content: String::new(),
                clean_markdown: None,
                summary_paragraph: None,
                key_takeaways: None,
                priority: None,
                follow_up_questions: None,
                follow_up_question_groups: None,
                follow_up_answers: None,
                enrichment_lm_log: None,
                follow_up_answers_lm_log: None,
                claim_processed: None,
                locks: Default::default(),
            })
            .unwrap();
        (coll, id)
    }

    #[test]
    fn acquire_is_exclusive_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let (coll, id) = seed(&store);

        assert!(acquire(&coll, &id, "enrich_lock", "w1", DEFAULT_TTL).unwrap());
        assert!(!acquire(&coll, &id, "enrich_lock", "w2", DEFAULT_TTL).unwrap());
        // A different lock name on the same document is independent.
        assert!(acquire(&coll, &id, "claimproc_lock", "w2", DEFAULT_TTL).unwrap());
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let (coll, id) = seed(&store);

        assert!(acquire(&coll, &id, "enrich_lock", "w1", Duration::from_millis(1)).unwrap());
        std::thread::sleep(Duration::from_millis(25));
        assert!(acquire(&coll, &id, "enrich_lock", "w2", Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn release_then_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let (coll, id) = seed(&store);

        assert!(acquire(&coll, &id, "enrich_lock", "w1", DEFAULT_TTL).unwrap());
        release(&coll, &id, "enrich_lock");
        assert!(acquire(&coll, &id, "enrich_lock", "w2", DEFAULT_TTL).unwrap());
    }

    #[test]
    fn release_of_missing_doc_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        release(&coll, &DocId::from("missing"), "enrich_lock");
    }

    #[test]
    fn acquire_on_missing_doc_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        assert!(!acquire(&coll, &DocId::from("missing"), "enrich_lock", "w1", DEFAULT_TTL).unwrap());
    }
}
