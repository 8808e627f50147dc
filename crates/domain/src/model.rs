//! Persisted entities: articles, claims, updates, follow-ups, roundups,
//! subscriptions, run logs, and the embedded lease/provenance records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dates::{self, store_date, store_date_opt, store_datetime, store_datetime_opt};
use crate::outputs::{ClaimProcessingStep, QuestionGroups};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identifiers & leases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque document identifier. The engine never interprets the contents;
/// ordering and equality are byte-wise.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocId(pub String);

impl DocId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A TTL-bounded work lease embedded on a document under a named field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    #[serde(with = "store_datetime")]
    pub locked_at: DateTime<FixedOffset>,
    pub owner: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LM provenance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Call-level provenance attached to anything an LLM call produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LmLog {
    pub api_type: String,
    pub call_id: String,
    pub called_from: String,
    pub model_name: String,
    #[serde(default)]
    pub system_tokens: u64,
    #[serde(default)]
    pub user_tokens: u64,
    #[serde(default)]
    pub response_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Article
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One ingested press release (one row per source URL). Scrapers create
/// these; enrichment and claim extraction mutate each exactly once, under
/// their respective leases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub id: DocId,
    pub title: String,
    #[serde(with = "store_date")]
    pub date: NaiveDate,
    #[serde(with = "store_datetime")]
    pub ingested_at: DateTime<FixedOffset>,
    pub link: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub raw_content: String,

    // ── Enrichment (written once by the enrich stage) ─────────────
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_paragraph: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_takeaways: Option<Vec<String>>,
    /// 1 = Active Emergency … 5 = Operational Updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_question_groups: Option<QuestionGroups>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_answers: Option<Vec<FollowupAnswerRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_lm_log: Option<LmLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_answers_lm_log: Option<LmLog>,

    /// Tri-state: unset = never attempted, false = queued, true = done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_processed: Option<bool>,

    /// Named work leases (`enrich_lock`, `claimproc_lock`, …).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locks: BTreeMap<String, Lease>,
}

impl Article {
    pub fn needs_enrichment(&self) -> bool {
        self.clean_markdown.is_none()
            || self.summary_paragraph.is_none()
            || self.key_takeaways.is_none()
    }
}

/// A stored follow-up answer: the question it answers, the answer text,
/// and the URLs backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupAnswerRecord {
    pub index: usize,
    pub question: String,
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claim
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    /// A general objective with no deadline.
    Goal,
    /// A specific commitment with a deadline and a measurable outcome.
    Promise,
    /// A factual assertion, checkable today.
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClaimPriority {
    High,
    Medium,
    Low,
}

/// One extracted assertion, owned by the lifecycle scheduler after
/// extraction inserts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    #[serde(default)]
    pub id: DocId,
    /// Canonical short text of the claim.
    pub claim: String,
    /// Exact excerpt from the article.
    pub verbatim_claim: String,
    #[serde(rename = "type")]
    pub kind: ClaimType,
    pub completion_condition: String,
    /// Deadline; present only on promises.
    #[serde(default, with = "store_date_opt", skip_serializing_if = "Option::is_none")]
    pub completion_condition_date: Option<NaiveDate>,
    /// When the asserted event happened; statements only.
    #[serde(default, with = "store_date_opt", skip_serializing_if = "Option::is_none")]
    pub event_date: Option<NaiveDate>,
    #[serde(default)]
    pub follow_up_worthy: bool,
    pub priority: ClaimPriority,
    /// Routing hint for the verification mechanism, when the model gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<String>,
    #[serde(with = "store_date")]
    pub article_date: NaiveDate,
    pub article_id: DocId,
    pub article_link: String,
    /// Terminal marker: the completion date has passed and an endpoint
    /// check ran (or a terminal verdict landed).
    #[serde(default)]
    pub date_past: bool,
}

impl Claim {
    /// Build a claim from an extraction step, applying the construction
    /// invariants:
    /// - a promise without a resolvable deadline is demoted to a goal;
    /// - goals carry no dates; statements keep only `event_date`;
    /// - `follow_up_worthy = false` caps priority at medium;
    /// - `date_past` is derived from the deadline vs. `today`.
    pub fn from_step(
        step: &ClaimProcessingStep,
        article_id: DocId,
        article_link: String,
        article_date: NaiveDate,
        today: NaiveDate,
    ) -> Claim {
        let completion = step.completion_condition_date.resolve(Some(article_date));
        let event = step.event_date.resolve(Some(article_date));

        let kind = match step.kind {
            ClaimType::Promise if completion.is_none() => ClaimType::Goal,
            other => other,
        };
        let (completion_condition_date, event_date) = match kind {
            ClaimType::Promise => (completion, None),
            ClaimType::Statement => (None, event),
            ClaimType::Goal => (None, None),
        };

        let priority = if !step.follow_up_worthy && step.priority == ClaimPriority::High {
            ClaimPriority::Medium
        } else {
            step.priority
        };

        let date_past = completion_condition_date.map_or(false, |end| end < today);

        Claim {
            id: DocId::default(),
            claim: step.claim.clone(),
            verbatim_claim: step.verbatim_claim.clone(),
            kind,
            completion_condition: step.completion_condition.clone(),
            completion_condition_date,
            event_date,
            follow_up_worthy: step.follow_up_worthy,
            priority,
            mechanism: step.mechanism.clone(),
            article_date,
            article_id,
            article_link,
            date_past,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdicts & updates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The stored verdict of a verification outcome. Check-ins produce the
/// lowercase trio; fact checks produce the capitalized categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "failed")]
    Failed,
    True,
    False,
    #[serde(rename = "Tech Error")]
    TechError,
    Close,
    Misleading,
    Unverifiable,
    Unclear,
}

impl Verdict {
    /// Verdicts that seal a promise's fate independent of the calendar.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Verdict::Complete | Verdict::Failed | Verdict::True | Verdict::False
        )
    }
}

/// Either the raw structured result the model produced or its narrative
/// text when parsing failed. Never empty: a heuristic verdict plus the
/// text is stored rather than dropping the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelOutput {
    Text(String),
    Structured(serde_json::Value),
}

/// One verification outcome for a claim. Latest by `(created_at, id)` is
/// the authoritative current verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub id: DocId,
    pub claim_id: DocId,
    pub claim_text: String,
    pub article_id: DocId,
    pub article_link: String,
    #[serde(default, with = "store_date_opt", skip_serializing_if = "Option::is_none")]
    pub article_date: Option<NaiveDate>,
    /// Narrative answer, with any sources rendered at the end.
    #[serde(default)]
    pub text: String,
    pub model_output: ModelOutput,
    pub verdict: Verdict,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(with = "store_datetime")]
    pub created_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lm_log: Option<LmLog>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Follow-up
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A scheduled future verification of a claim. At most one row may exist
/// per `(claim_id, follow_up_date)`; duplicates are collapsed by the
/// dedupe pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followup {
    #[serde(default)]
    pub id: DocId,
    pub claim_id: DocId,
    pub claim_text: String,
    #[serde(with = "store_date")]
    pub follow_up_date: NaiveDate,
    pub article_id: DocId,
    pub article_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_output: Option<ModelOutput>,
    #[serde(with = "store_datetime")]
    pub created_at: DateTime<FixedOffset>,
    /// Set when the follow-up pipeline consumes this row.
    #[serde(
        default,
        with = "store_datetime_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub processed_at: Option<DateTime<FixedOffset>>,
    /// The update produced when this follow-up was processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_update_id: Option<DocId>,
}

impl Followup {
    /// Due on `today` iff scheduled for today and not yet consumed.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.follow_up_date == today && self.processed_at.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roundups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundupKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RoundupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundupKind::Daily => "daily",
            RoundupKind::Weekly => "weekly",
            RoundupKind::Monthly => "monthly",
            RoundupKind::Yearly => "yearly",
        }
    }
}

impl fmt::Display for RoundupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seed entry feeding a roundup: either a period article (with its
/// heuristic score) or a nested lower-tier roundup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedArticle {
    pub article_id: DocId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_takeaways: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Vec<String>>,
}

/// One narrative report per `(kind, period_start, period_end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roundup {
    #[serde(default)]
    pub id: DocId,
    pub kind: RoundupKind,
    #[serde(with = "store_date")]
    pub period_start: NaiveDate,
    #[serde(with = "store_date")]
    pub period_end: NaiveDate,
    pub title: String,
    pub summary_markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub seed_articles: Vec<SeedArticle>,
    /// Period articles that did not make the seed list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omitted_count: Option<u64>,
    #[serde(with = "store_datetime")]
    pub created_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lm_log: Option<LmLog>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscriptions & run logs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A reader subscription scoped to a locale tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleSubscription {
    #[serde(default)]
    pub id: DocId,
    pub locale: String,
    pub email: String,
    #[serde(with = "store_datetime")]
    pub created_at: DateTime<FixedOffset>,
}

/// Per-run summary written into the `logs` collection by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(default)]
    pub id: DocId,
    #[serde(with = "store_datetime")]
    pub run_started_at: DateTime<FixedOffset>,
    #[serde(with = "store_datetime")]
    pub run_finished_at: DateTime<FixedOffset>,
    #[serde(with = "store_date")]
    pub pipeline_date: NaiveDate,
    /// Article counts by enrichment priority (whole corpus).
    #[serde(default)]
    pub enrich_priority_counts: BTreeMap<String, u64>,
    /// Claim counts by priority (whole corpus).
    #[serde(default)]
    pub claim_priority_counts: BTreeMap<String, u64>,
    /// Updates inserted during this run's window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<RunUpdateSummary>,
    #[serde(default)]
    pub locale_subscriptions: u64,
}

/// Grouped view of updates inserted inside a run window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunUpdateSummary {
    #[serde(with = "store_datetime")]
    pub window_from: DateTime<FixedOffset>,
    #[serde(with = "store_datetime")]
    pub window_to: DateTime<FixedOffset>,
    pub total_inserted: u64,
    pub by_verdict: BTreeMap<String, u64>,
    /// `fact_check` (statements), `promise_checkin` (promises/goals), `other`.
    pub by_type: BTreeMap<String, u64>,
}

pub fn now_store() -> DateTime<FixedOffset> {
    dates::now_fixed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::DateLike;
    use crate::outputs::ClaimProcessingStep;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn step(kind: ClaimType) -> ClaimProcessingStep {
        ClaimProcessingStep {
            claim: "the agency will publish a rule".into(),
            verbatim_claim: "Within 90 days, the agency will publish a rule".into(),
            kind,
            completion_condition: "rule published in the federal register".into(),
            completion_condition_date: DateLike::Null,
            event_date: DateLike::Null,
            follow_up_worthy: true,
            priority: ClaimPriority::High,
            mechanism: None,
        }
    }

    #[test]
    fn promise_without_deadline_demotes_to_goal() {
        let claim = Claim::from_step(
            &step(ClaimType::Promise),
            DocId::from("a1"),
            "https://example.gov/a1".into(),
            d("2025-06-01"),
            d("2025-06-01"),
        );
        assert_eq!(claim.kind, ClaimType::Goal);
        assert!(claim.completion_condition_date.is_none());
        assert!(claim.event_date.is_none());
    }

    #[test]
    fn promise_resolves_delta_deadline_from_article_date() {
        let mut s = step(ClaimType::Promise);
        s.completion_condition_date = DateLike::Delta(crate::dates::DateDelta {
            from_date: None,
            days_delta: Some(90),
            weeks_delta: None,
            months_delta: None,
            years_delta: None,
        });
        let claim = Claim::from_step(
            &s,
            DocId::from("a1"),
            "https://example.gov/a1".into(),
            d("2025-06-01"),
            d("2025-06-01"),
        );
        assert_eq!(claim.kind, ClaimType::Promise);
        assert_eq!(claim.completion_condition_date, Some(d("2025-08-30")));
        assert!(!claim.date_past);
    }

    #[test]
    fn statement_keeps_event_date_only() {
        let mut s = step(ClaimType::Statement);
        s.event_date = DateLike::Absolute(d("2025-05-20"));
        s.completion_condition_date = DateLike::Absolute(d("2025-07-01"));
        let claim = Claim::from_step(
            &s,
            DocId::from("a1"),
            "https://example.gov/a1".into(),
            d("2025-06-01"),
            d("2025-06-01"),
        );
        assert_eq!(claim.event_date, Some(d("2025-05-20")));
        assert!(claim.completion_condition_date.is_none());
    }

    #[test]
    fn unworthy_high_priority_is_nudged_to_medium() {
        let mut s = step(ClaimType::Goal);
        s.follow_up_worthy = false;
        let claim = Claim::from_step(
            &s,
            DocId::from("a1"),
            "link".into(),
            d("2025-06-01"),
            d("2025-06-01"),
        );
        assert_eq!(claim.priority, ClaimPriority::Medium);
    }

    #[test]
    fn date_past_derived_from_deadline() {
        let mut s = step(ClaimType::Promise);
        s.completion_condition_date = DateLike::Absolute(d("2025-01-10"));
        let claim = Claim::from_step(
            &s,
            DocId::from("a1"),
            "link".into(),
            d("2025-01-01"),
            d("2025-06-01"),
        );
        assert!(claim.date_past);
    }

    #[test]
    fn verdict_serializes_to_wire_strings() {
        assert_eq!(serde_json::to_string(&Verdict::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(serde_json::to_string(&Verdict::True).unwrap(), "\"True\"");
        assert_eq!(serde_json::to_string(&Verdict::TechError).unwrap(), "\"Tech Error\"");
    }

    #[test]
    fn terminal_verdicts() {
        for v in [Verdict::Complete, Verdict::Failed, Verdict::True, Verdict::False] {
            assert!(v.is_terminal(), "{v:?} should be terminal");
        }
        for v in [Verdict::InProgress, Verdict::Close, Verdict::Unclear, Verdict::Unverifiable] {
            assert!(!v.is_terminal(), "{v:?} should not be terminal");
        }
    }

    #[test]
    fn model_output_untagged_round_trip() {
        let text = ModelOutput::Text("plain narrative".into());
        let json = serde_json::to_value(&text).unwrap();
        assert!(json.is_string());
        let back: ModelOutput = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ModelOutput::Text(_)));

        let structured = ModelOutput::Structured(serde_json::json!({"verdict": "complete"}));
        let json = serde_json::to_value(&structured).unwrap();
        assert!(json.is_object());
        let back: ModelOutput = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ModelOutput::Structured(_)));
    }
}
