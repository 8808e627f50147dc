//! Prompt templates, embedded at compile time so a deployment cannot
//! lose them.

pub const ARTICLE_ENRICH: &str = include_str!("../prompts/article_enrich.md");
pub const CLAIM_PROCESSING: &str = include_str!("../prompts/claim_processing.md");
pub const REGULAR_CHECKIN: &str = include_str!("../prompts/regular_checkin.md");
pub const ENDPOINT_CHECKIN: &str = include_str!("../prompts/endpoint_checkin.md");
pub const FACT_CHECK: &str = include_str!("../prompts/fact_check.md");
pub const ROUNDUP: &str = include_str!("../prompts/roundup.md");

/// Split token between the static extraction instructions and the
/// per-article payload in [`CLAIM_PROCESSING`].
pub const ARTICLE_SPLIT: &str = "\n----\nARTICLE:";
