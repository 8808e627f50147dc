//! Structured shapes the engine binds LLM output against, plus the
//! keyword heuristic used when structured parsing fails.
//!
//! Schemas for these types are derived with `schemars` and passed through
//! the strict sanitizer before they reach the provider.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dates::DateLike;
use crate::model::{ClaimPriority, ClaimType, Verdict};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Verdict vocabulary for promise/goal check-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckinVerdict {
    Complete,
    InProgress,
    Failed,
}

impl From<CheckinVerdict> for Verdict {
    fn from(v: CheckinVerdict) -> Verdict {
        match v {
            CheckinVerdict::Complete => Verdict::Complete,
            CheckinVerdict::InProgress => Verdict::InProgress,
            CheckinVerdict::Failed => Verdict::Failed,
        }
    }
}

/// Verdict vocabulary for statement fact checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FactVerdict {
    True,
    False,
    #[serde(rename = "Tech Error")]
    TechError,
    Close,
    Misleading,
    Unverifiable,
    Unclear,
}

impl From<FactVerdict> for Verdict {
    fn from(v: FactVerdict) -> Verdict {
        match v {
            FactVerdict::True => Verdict::True,
            FactVerdict::False => Verdict::False,
            FactVerdict::TechError => Verdict::TechError,
            FactVerdict::Close => Verdict::Close,
            FactVerdict::Misleading => Verdict::Misleading,
            FactVerdict::Unverifiable => Verdict::Unverifiable,
            FactVerdict::Unclear => Verdict::Unclear,
        }
    }
}

/// Classify narrative text into a check-in verdict. Pure; used only when
/// the structured parse came back malformed or absent.
pub fn classify_verdict(text: &str) -> CheckinVerdict {
    let t = text.to_lowercase();
    if ["complete", "fulfilled", "succeeded", "met"].iter().any(|k| t.contains(k)) {
        return CheckinVerdict::Complete;
    }
    if ["in progress", "in_progress", "progress", "ongoing"].iter().any(|k| t.contains(k)) {
        return CheckinVerdict::InProgress;
    }
    if ["fail", "failed", "not met", "not fulfilled", "did not"].iter().any(|k| t.contains(k)) {
        return CheckinVerdict::Failed;
    }
    CheckinVerdict::InProgress
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Check-in / fact-check outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured output expected from check-in verifications.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelResponseOutput {
    pub verdict: CheckinVerdict,
    /// Human-readable status narrative.
    #[serde(default)]
    pub text: Option<String>,
    /// Source URLs referenced by the narrative.
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    /// ISO date the model requests another look at this claim.
    #[serde(default)]
    pub follow_up_date: Option<String>,
}

/// Structured output expected from statement fact checks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FactCheckResponseOutput {
    pub verdict: FactVerdict,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub follow_up_date: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enrichment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How follow-up questions group for joint research: all together, each on
/// its own, or explicit 0-based index groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QuestionGroups {
    Mode(GroupMode),
    Explicit(Vec<Vec<i64>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    Single,
    Individual,
}

/// Structured output of the enrichment stage. `clean_markdown` is always
/// overwritten with the deterministic conversion regardless of what the
/// model returned.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArticleEnrichment {
    pub clean_markdown: String,
    pub summary_paragraph: String,
    pub key_takeaways: Vec<String>,
    /// 1 = Active Emergency, 2 = Major Policy Action, 3 = Significant
    /// Development, 4 = Routine Announcement, 5 = Operational Updates.
    #[schemars(range(min = 1, max = 5))]
    pub priority: u8,
    pub follow_up_questions: Vec<String>,
    pub follow_up_question_groups: QuestionGroups,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claim extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One extracted claim as the model reports it, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClaimProcessingStep {
    /// Canonical short restatement of the claim.
    pub claim: String,
    /// Exact quote from the article.
    pub verbatim_claim: String,
    /// `goal`, `promise`, or `statement`.
    #[serde(rename = "type")]
    pub kind: ClaimType,
    /// Condition(s) under which the claim counts as true / achieved /
    /// fulfilled.
    pub completion_condition: String,
    /// Deadline; only when the article names a date or window ("90 days",
    /// "in March"). Absolute date or a delta from the article date.
    #[serde(default)]
    pub completion_condition_date: DateLike,
    /// When the asserted event happened (statements only).
    #[serde(default)]
    pub event_date: DateLike,
    pub follow_up_worthy: bool,
    pub priority: ClaimPriority,
    /// How completion would be verified, when the article implies one.
    #[serde(default)]
    pub mechanism: Option<String>,
}

/// Batch wrapper the extraction prompt binds against.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClaimProcessingResult {
    pub steps: Vec<ClaimProcessingStep>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roundups & follow-up answers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoundupResponseOutput {
    pub title: String,
    /// Markdown body of the roundup.
    pub text: String,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

/// One answer to a follow-up question.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FollowupAnswer {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Answer keyed to its 0-based question index.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FollowupAnswerItem {
    pub index: i64,
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// The list shape the parse pass binds (strict-schema friendly).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FollowupAnswersList {
    pub answers: Vec<FollowupAnswerItem>,
}

/// The keyed-object shape models sometimes emit instead of the list.
pub type FollowupAnswerMap = std::collections::BTreeMap<String, FollowupAnswer>;
