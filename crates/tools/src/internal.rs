//! Internal corpus search: case-insensitive text match across the
//! article and claim stores, optional date range, each matched claim
//! enriched with its most recent update's verdict.

use chrono::NaiveDate;
use serde_json::{json, Value};

use cw_domain::model::{Article, Claim, Update};
use cw_store::Stores;

fn matches_query(haystacks: &[&str], needle_lower: &str) -> bool {
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(needle_lower))
}

fn article_matches(article: &Article, needle_lower: &str) -> bool {
    let summary = article.summary_paragraph.as_deref().unwrap_or("");
    let markdown = article.clean_markdown.as_deref().unwrap_or("");
    let tags = article.tags.join(" ");
    matches_query(
        &[&article.title, summary, markdown, &article.raw_content, &tags],
        needle_lower,
    )
}

fn claim_matches(claim: &Claim, needle_lower: &str) -> bool {
    matches_query(
        &[&claim.claim, &claim.verbatim_claim, &claim.completion_condition],
        needle_lower,
    )
}

fn in_range(date: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    from.map_or(true, |f| date >= f) && to.map_or(true, |t| date <= t)
}

/// Latest update for a claim by `(created_at, id)`.
fn latest_verdict(stores: &Stores, claim: &Claim) -> Option<String> {
    let mut updates: Vec<Update> = stores
        .updates
        .find_many(|u| u.claim_id == claim.id)
        .unwrap_or_default();
    updates.sort_by(|a, b| {
        (a.created_at, a.id.as_str()).cmp(&(b.created_at, b.id.as_str()))
    });
    updates
        .last()
        .and_then(|u| serde_json::to_value(u.verdict).ok())
        .and_then(|v| v.as_str().map(String::from))
}

/// Run the internal search and return the tool-contract JSON.
pub fn internal_search(
    stores: &Stores,
    query: &str,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    max_results: usize,
) -> Value {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return json!({ "articles": [], "claims": [] });
    }

    let articles: Vec<Value> = stores
        .articles
        .find_many(|a| in_range(a.date, date_from, date_to) && article_matches(a, &needle))
        .unwrap_or_default()
        .into_iter()
        .take(max_results)
        .map(|a| {
            json!({
                "title": a.title,
                "link": a.link,
                "date": a.date.format("%Y-%m-%d").to_string(),
                "summary": a.summary_paragraph,
                "tags": a.tags,
            })
        })
        .collect();

    let claims: Vec<Value> = stores
        .claims
        .find_many(|c| in_range(c.article_date, date_from, date_to) && claim_matches(c, &needle))
        .unwrap_or_default()
        .into_iter()
        .take(max_results)
        .map(|c| {
            let latest = latest_verdict(stores, &c);
            json!({
                "claim": c.claim,
                "type": c.kind,
                "completion_condition": c.completion_condition,
                "completion_condition_date": c
                    .completion_condition_date
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                "article_link": c.article_link,
                "article_date": c.article_date.format("%Y-%m-%d").to_string(),
                "latest_verdict": latest,
            })
        })
        .collect();

    json!({ "articles": articles, "claims": claims })
}
