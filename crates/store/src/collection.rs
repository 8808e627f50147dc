//! File-backed typed collections.
//!
//! One JSON array file per collection under the store root. Every
//! read-modify-write cycle runs under an exclusive `fs2` advisory lock on
//! the collection file, so cooperating worker processes see atomic
//! mutations — this is what makes the lease layer's compare-and-set real
//! across processes. Payloads pass the recursive date normalizer on every
//! write.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use cw_domain::model::DocId;
use cw_domain::{Error, Result};

use crate::normalize::normalize_value;

/// A persisted document type bound to a named collection.
pub trait Doc: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &DocId;
    fn id_mut(&mut self) -> &mut DocId;
}

/// Root handle for the document store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<FileStore> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Typed handle for `T`'s collection.
    pub fn collection<T: Doc>(&self) -> Collection<T> {
        Collection {
            path: self.root.join(format!("{}.json", T::COLLECTION)),
            _marker: PhantomData,
        }
    }
}

/// Typed access to one collection file.
pub struct Collection<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Doc> Collection<T> {
    /// Run `f` over the decoded collection under the file lock. When `f`
    /// reports the set dirty, the whole array is re-normalized and written
    /// back before the lock is released.
    fn with_docs<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> Result<(R, bool)>) -> Result<R> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.lock_exclusive()
            .map_err(|e| Error::Store(format!("lock {}: {e}", self.path.display())))?;

        let result = (|| {
            let mut text = String::new();
            (&file).read_to_string(&mut text)?;
            let mut docs: Vec<Value> = if text.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| Error::Store(format!("corrupt {}: {e}", self.path.display())))?
            };

            let (out, dirty) = f(&mut docs)?;

            if dirty {
                let normalized: Vec<Value> = docs.iter().map(normalize_value).collect();
                let json = serde_json::to_string_pretty(&normalized)?;
                file.set_len(0)?;
                (&file).seek(SeekFrom::Start(0))?;
                (&file).write_all(json.as_bytes())?;
            }
            Ok(out)
        })();

        let _ = FileExt::unlock(&file);
        result
    }

    fn decode(value: &Value) -> Option<T> {
        match serde_json::from_value(value.clone()) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(
                    collection = T::COLLECTION,
                    error = %e,
                    "skipping document that does not decode"
                );
                None
            }
        }
    }

    fn doc_id(value: &Value) -> Option<&str> {
        value.get("id").and_then(|v| v.as_str())
    }

    /// Insert a document, assigning a fresh id when the caller left it
    /// empty. Returns the id.
    pub fn insert_one(&self, mut doc: T) -> Result<DocId> {
        if doc.id().is_empty() {
            *doc.id_mut() = DocId::new();
        }
        let id = doc.id().clone();
        let value = serde_json::to_value(&doc)?;
        self.with_docs(|docs| {
            docs.push(value);
            Ok(((), true))
        })?;
        Ok(id)
    }

    pub fn find_by_id(&self, id: &DocId) -> Result<Option<T>> {
        self.with_docs(|docs| {
            let found = docs
                .iter()
                .find(|v| Self::doc_id(v) == Some(id.as_str()))
                .and_then(Self::decode);
            Ok((found, false))
        })
    }

    pub fn find_one_by(&self, pred: impl Fn(&T) -> bool) -> Result<Option<T>> {
        self.with_docs(|docs| {
            let found = docs
                .iter()
                .filter_map(Self::decode)
                .find(|t| pred(t));
            Ok((found, false))
        })
    }

    pub fn find_many(&self, pred: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        self.with_docs(|docs| {
            let found = docs
                .iter()
                .filter_map(Self::decode)
                .filter(|t| pred(t))
                .collect();
            Ok((found, false))
        })
    }

    /// Filtered find with sort and limit.
    pub fn find_many_ordered<K: Ord>(
        &self,
        pred: impl Fn(&T) -> bool,
        key: impl Fn(&T) -> K,
        descending: bool,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        let mut found = self.find_many(pred)?;
        found.sort_by_key(|t| key(t));
        if descending {
            found.reverse();
        }
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    pub fn find_all(&self) -> Result<Vec<T>> {
        self.find_many(|_| true)
    }

    pub fn count(&self, pred: impl Fn(&T) -> bool) -> Result<usize> {
        Ok(self.find_many(pred)?.len())
    }

    /// Mutate the document with `id`. Returns whether it existed.
    pub fn update_one(&self, id: &DocId, f: impl FnOnce(&mut T)) -> Result<bool> {
        self.modify_if(id, |_| true, f)
    }

    /// Mutate every document matching `pred`; returns how many changed.
    pub fn update_many(&self, pred: impl Fn(&T) -> bool, f: impl Fn(&mut T)) -> Result<usize> {
        self.with_docs(|docs| {
            let mut changed = 0;
            for slot in docs.iter_mut() {
                if let Some(mut doc) = Self::decode(slot) {
                    if pred(&doc) {
                        f(&mut doc);
                        *slot = serde_json::to_value(&doc)?;
                        changed += 1;
                    }
                }
            }
            Ok((changed, changed > 0))
        })
    }

    /// Compare-and-set: mutate the document iff `pred` holds, atomically
    /// with respect to other processes. Returns whether the mutation ran.
    pub fn modify_if(
        &self,
        id: &DocId,
        pred: impl FnOnce(&T) -> bool,
        f: impl FnOnce(&mut T),
    ) -> Result<bool> {
        self.with_docs(|docs| {
            for slot in docs.iter_mut() {
                if Self::doc_id(slot) != Some(id.as_str()) {
                    continue;
                }
                let Some(mut doc) = Self::decode(slot) else {
                    return Ok((false, false));
                };
                if !pred(&doc) {
                    return Ok((false, false));
                }
                f(&mut doc);
                *slot = serde_json::to_value(&doc)?;
                return Ok((true, true));
            }
            Ok((false, false))
        })
    }

    /// Raw compare-and-set on the JSON value (used by the lease layer so
    /// lock bookkeeping never depends on the typed shape). `f` returns
    /// whether it mutated the document.
    pub fn modify_raw(&self, id: &DocId, f: impl FnOnce(&mut Value) -> bool) -> Result<bool> {
        self.with_docs(|docs| {
            for slot in docs.iter_mut() {
                if Self::doc_id(slot) == Some(id.as_str()) {
                    let changed = f(slot);
                    return Ok((changed, changed));
                }
            }
            Ok((false, false))
        })
    }

    pub fn delete_one(&self, id: &DocId) -> Result<bool> {
        self.with_docs(|docs| {
            let before = docs.len();
            docs.retain(|v| Self::doc_id(v) != Some(id.as_str()));
            let removed = docs.len() < before;
            Ok((removed, removed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use cw_domain::model::{Article, DocId};

    fn article(link: &str) -> Article {
        Article {
            id: DocId::default(),
            title: "Agency announces rule".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            ingested_at: cw_domain::dates::now_fixed(),
            link: link.into(),
            tags: vec!["agency".into()],
            raw_content: "raw".into(),
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
        }
    }

    #[test]
    fn insert_assigns_id_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();

        let id = coll.insert_one(article("https://example.gov/a")).unwrap();
        assert!(!id.is_empty());

        let back = coll.find_by_id(&id).unwrap().unwrap();
        assert_eq!(back.link, "https://example.gov/a");
        assert_eq!(back.date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    }

    #[test]
    fn persisted_dates_carry_fixed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        coll.insert_one(article("https://example.gov/a")).unwrap();

        let text = std::fs::read_to_string(dir.path().join("articles.json")).unwrap();
        let docs: Vec<Value> = serde_json::from_str(&text).unwrap();
        let date = docs[0]["date"].as_str().unwrap();
        assert!(date.ends_with("-05:00"), "persisted date {date} lacks -05:00");
        let ingested = docs[0]["ingested_at"].as_str().unwrap();
        assert!(ingested.ends_with("-05:00"), "persisted timestamp {ingested} lacks -05:00");
    }

    #[test]
    fn update_one_mutates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        let id = coll.insert_one(article("https://example.gov/a")).unwrap();

        let hit = coll
            .update_one(&id, |a| a.claim_processed = Some(true))
            .unwrap();
        assert!(hit);
        assert_eq!(
            coll.find_by_id(&id).unwrap().unwrap().claim_processed,
            Some(true)
        );
        assert!(!coll
            .update_one(&DocId::from("missing"), |_| {})
            .unwrap());
    }

    #[test]
    fn modify_if_respects_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        let id = coll.insert_one(article("https://example.gov/a")).unwrap();

        let ran = coll
            .modify_if(&id, |a| a.claim_processed.is_some(), |a| a.title = "x".into())
            .unwrap();
        assert!(!ran);
        let ran = coll
            .modify_if(&id, |a| a.claim_processed.is_none(), |a| a.title = "x".into())
            .unwrap();
        assert!(ran);
    }

    #[test]
    fn ordered_find_sorts_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        for (i, day) in [3u32, 1, 2].iter().enumerate() {
            let mut a = article(&format!("https://example.gov/{i}"));
            a.date = NaiveDate::from_ymd_opt(2025, 6, *day).unwrap();
            coll.insert_one(a).unwrap();
        }

        let newest_first = coll
            .find_many_ordered(|_| true, |a| a.date, true, Some(2))
            .unwrap();
        assert_eq!(newest_first.len(), 2);
        assert_eq!(newest_first[0].date, NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
        assert_eq!(newest_first[1].date, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    }

    #[test]
    fn delete_one_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let coll = store.collection::<Article>();
        let id = coll.insert_one(article("https://example.gov/a")).unwrap();
        assert!(coll.delete_one(&id).unwrap());
        assert!(!coll.delete_one(&id).unwrap());
        assert_eq!(coll.count(|_| true).unwrap(), 0);
    }
}
