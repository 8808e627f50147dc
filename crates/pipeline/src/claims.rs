//! Claim extraction: batch-extract classified claims from enriched
//! articles with a strict schema, normalize them, and mark the articles
//! processed.

use serde_json::{json, Value};

use cw_domain::dates;
use cw_domain::model::{Article, Claim};
use cw_domain::outputs::ClaimProcessingResult;
use cw_domain::{Error, Result};
use cw_providers::{
    respond_parsed, run_bulk, strict_schema_for, BatchRequestLine, LmOutput, ResponseRequest,
    SchemaBinding, CHAT_COMPLETIONS_ENDPOINT,
};
use cw_store::lease;

use crate::context::StageContext;
use crate::prompts;

pub const LOCK: &str = "claimproc_lock";

fn article_payload(article: &Article) -> String {
    let content = article
        .clean_markdown
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| article.raw_content.clone());
    format!(
        "ARTICLE:\nTitle: {}\nTimestamp: {}\nTags: {}\nSource: {}\n\nContent (Markdown):\n{}",
        article.title,
        article.date,
        article.tags.join(","),
        article.link,
        content,
    )
}

/// The static extraction instructions: template with the schema filled
/// in, cut at the per-article marker.
fn system_prompt(schema_json: &str) -> String {
    let full = prompts::CLAIM_PROCESSING.replace("{{SCHEMA}}", schema_json);
    match full.split_once(prompts::ARTICLE_SPLIT) {
        Some((head, _)) => head.trim_end().to_string(),
        None => full,
    }
}

fn chat_line(article: &Article, system: &str, schema: &Value, model: &str) -> BatchRequestLine {
    BatchRequestLine::new(
        article.id.to_string(),
        CHAT_COMPLETIONS_ENDPOINT,
        json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": article_payload(article) },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "ClaimProcessingResult",
                    "schema": schema,
                    "strict": true,
                },
            },
        }),
    )
}

/// Pull the JSON content string out of a chat-completions body.
fn chat_content(body: &Value) -> Option<&str> {
    body.get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
}

/// Insert the extracted claims for one article and seal it. Individual
/// insert failures are logged and skipped; the article is only marked
/// processed after the steps were applied.
fn apply_result(ctx: &StageContext, article: &Article, result: &ClaimProcessingResult) -> Result<usize> {
    let today = dates::pipeline_today();
    let mut inserted = 0;
    for step in &result.steps {
        let claim = Claim::from_step(
            step,
            article.id.clone(),
            article.link.clone(),
            article.date,
            today,
        );
        match ctx.stores.claims.insert_one(claim) {
            Ok(_) => inserted += 1,
            Err(e) => {
                tracing::error!(article_id = %article.id, error = %e, "failed to insert claim");
            }
        }
    }

    ctx.stores
        .articles
        .update_one(&article.id, |a| a.claim_processed = Some(true))?;
    lease::release(&ctx.stores.articles, &article.id, LOCK);
    Ok(inserted)
}

/// Mode B failover: one synchronous structured call per article.
async fn fallback_each(ctx: &StageContext, docs: &[Article], system: &str, schema: &Value) {
    for article in docs {
        let req = ResponseRequest {
            model: ctx.batch_model.clone(),
            input: vec![
                json!({ "role": "system", "content": system }),
                json!({ "role": "user", "content": article_payload(article) }),
            ],
            schema: Some(SchemaBinding {
                name: "ClaimProcessingResult".into(),
                schema: schema.clone(),
            }),
            ..Default::default()
        };
        match respond_parsed::<ClaimProcessingResult>(ctx.lm.as_ref(), &req).await {
            Ok((LmOutput::Parsed(result), _)) => {
                if let Err(e) = apply_result(ctx, article, &result) {
                    tracing::error!(article_id = %article.id, error = %e, "failed to apply extraction");
                }
            }
            Ok((LmOutput::Unparsed(_), _)) => {
                tracing::warn!(article_id = %article.id, "extraction never validated; leaving for next run");
            }
            Err(e) => {
                tracing::error!(article_id = %article.id, error = %e, "extraction call failed");
            }
        }
    }
}

/// Run the extraction stage over up to `batch_size` unprocessed articles.
pub async fn run(ctx: &StageContext, batch_size: usize) -> Result<()> {
    let owner = lease::worker_owner();
    let candidates = ctx.stores.articles.find_many_ordered(
        |a| a.claim_processed != Some(true),
        |a| a.ingested_at,
        false,
        None,
    )?;

    let mut docs: Vec<Article> = Vec::new();
    for article in candidates {
        if docs.len() >= batch_size {
            break;
        }
        if lease::acquire(&ctx.stores.articles, &article.id, LOCK, &owner, lease::DEFAULT_TTL)? {
            docs.push(article);
        }
    }
    if docs.is_empty() {
        tracing::info!("no unprocessed articles");
        return Ok(());
    }

    // Unset tri-state becomes an explicit "queued".
    for article in &docs {
        if article.claim_processed.is_none() {
            ctx.stores
                .articles
                .update_one(&article.id, |a| a.claim_processed = Some(false))?;
        }
    }

    let schema = strict_schema_for::<ClaimProcessingResult>();
    let schema_json = serde_json::to_string_pretty(&schema)?;
    let system = system_prompt(&schema_json);
    let lines: Vec<BatchRequestLine> = docs
        .iter()
        .map(|doc| chat_line(doc, &system, &schema, &ctx.batch_model))
        .collect();
    tracing::info!(articles = docs.len(), "dispatching claim extraction");

    match run_bulk(ctx.lm.as_ref(), &lines, CHAT_COMPLETIONS_ENDPOINT, &ctx.watchdog).await {
        Ok(outputs) => {
            let mut inserted = 0;
            let mut processed = 0;
            for line in &outputs {
                let Some(article) = docs.iter().find(|d| d.id.to_string() == line.custom_id) else {
                    tracing::warn!(custom_id = %line.custom_id, "output line for unknown article");
                    continue;
                };
                let Some(body) = line.success_body() else {
                    tracing::error!(custom_id = %line.custom_id, error = ?line.error, "extraction request failed");
                    continue;
                };
                let Some(content) = chat_content(body) else {
                    tracing::error!(custom_id = %line.custom_id, "no content in extraction response");
                    continue;
                };
                let result: ClaimProcessingResult = match serde_json::from_str(content) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::error!(custom_id = %line.custom_id, error = %e, "extraction output failed validation");
                        continue;
                    }
                };
                inserted += apply_result(ctx, article, &result)?;
                processed += 1;
            }
            tracing::info!(inserted, processed, "claim extraction applied");
        }
        Err(Error::Timeout(reason)) => {
            tracing::warn!(%reason, "extraction batch stalled; falling back to per-item mode");
            fallback_each(ctx, &docs, &system, &schema).await;
        }
        Err(e) => {
            tracing::error!(error = %e, "extraction batch failed; skipping this run");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_cuts_at_article_marker() {
        let system = system_prompt("{\"type\": \"object\"}");
        assert!(system.contains("{\"type\": \"object\"}"));
        assert!(!system.contains("ARTICLE:"));
    }

    #[test]
    fn chat_content_walks_choices() {
        let body = json!({
            "choices": [
                { "message": { "content": "{\"steps\": []}" } }
            ]
        });
        assert_eq!(chat_content(&body), Some("{\"steps\": []}"));
        assert_eq!(chat_content(&json!({})), None);
    }
}
