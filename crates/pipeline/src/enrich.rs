//! Article enrichment: canonical markdown, summary, takeaways, priority,
//! and follow-up questions for every article that still misses any of
//! them.

use std::collections::HashMap;

use serde_json::{json, Value};

use cw_domain::model::{Article, DocId, LmLog};
use cw_domain::outputs::ArticleEnrichment;
use cw_domain::{Error, Result};
use cw_providers::{
    respond_parsed, run_bulk, select_model, strict_schema_for, BatchRequestLine, LmOutput,
    ResponseRequest, SchemaBinding, TaskKind, CHAT_COMPLETIONS_ENDPOINT,
};
use cw_store::lease;
use cw_tools::fetch_markdown;

use crate::context::StageContext;
use crate::prompts;

pub const LOCK: &str = "enrich_lock";

fn enrich_input(article: &Article, markdown: &str) -> String {
    format!(
        "Title: {}\nDate: {}\nTags: {}\nSource: {}\n\nSource Content (markdown):\n{}",
        article.title,
        article.date,
        article.tags.join(","),
        article.link,
        markdown,
    )
}

fn chat_lm_log(body: &Value, model_fallback: &str) -> LmLog {
    let usage = body.get("usage");
    LmLog {
        api_type: "completions".into(),
        call_id: body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .into(),
        called_from: "pipeline::enrich".into(),
        model_name: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model_fallback)
            .into(),
        system_tokens: 0,
        user_tokens: usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        response_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}

/// Persist one enrichment. The model's `clean_markdown` is always
/// overwritten with the deterministic conversion when one exists.
fn apply_enrichment(
    ctx: &StageContext,
    article_id: &DocId,
    enrichment: ArticleEnrichment,
    deterministic_md: &str,
    lm_log: Option<LmLog>,
) -> Result<()> {
    let markdown = if deterministic_md.trim().is_empty() {
        enrichment.clean_markdown.clone()
    } else {
        deterministic_md.to_string()
    };
    ctx.stores.articles.update_one(article_id, |article| {
        article.clean_markdown = Some(markdown.clone());
        article.summary_paragraph = Some(enrichment.summary_paragraph.clone());
        article.key_takeaways = Some(enrichment.key_takeaways.clone());
        article.priority = Some(enrichment.priority.clamp(1, 5));
        article.follow_up_questions = Some(enrichment.follow_up_questions.clone());
        article.follow_up_question_groups = Some(enrichment.follow_up_question_groups.clone());
        article.enrichment_lm_log = lm_log.clone();
        article.locks.remove(LOCK);
    })?;
    Ok(())
}

/// Mode B failover: one structured call per article, model picked by the
/// selector.
async fn fallback_each(
    ctx: &StageContext,
    docs: &[Article],
    md_by_id: &HashMap<DocId, String>,
    schema: &Value,
) {
    let choice = select_model(
        ctx.lm.as_ref(),
        TaskKind::Process,
        "Enrich an article into markdown, summary, and key takeaways with a strict schema.",
    )
    .await;

    for article in docs {
        let markdown = md_by_id.get(&article.id).cloned().unwrap_or_default();
        let req = ResponseRequest {
            model: choice.model.to_string(),
            input: vec![
                json!({ "role": "system", "content": prompts::ARTICLE_ENRICH }),
                json!({ "role": "user", "content": enrich_input(article, &markdown) }),
            ],
            schema: Some(SchemaBinding {
                name: "ArticleEnrichment".into(),
                schema: schema.clone(),
            }),
            reasoning_effort: choice.effort.map(String::from),
            ..Default::default()
        };
        match respond_parsed::<ArticleEnrichment>(ctx.lm.as_ref(), &req).await {
            Ok((LmOutput::Parsed(enrichment), turn)) => {
                let lm_log = Some(turn.lm_log("pipeline::enrich"));
                if let Err(e) = apply_enrichment(ctx, &article.id, enrichment, &markdown, lm_log) {
                    tracing::error!(article_id = %article.id, error = %e, "failed to store enrichment");
                }
            }
            Ok((LmOutput::Unparsed(_), _)) => {
                // Validation never landed; drop this record, the TTL
                // reclaims the lease.
                tracing::warn!(article_id = %article.id, "enrichment never validated; dropped for this run");
            }
            Err(e) => {
                tracing::error!(article_id = %article.id, error = %e, "enrichment call failed");
            }
        }
    }
}

/// Run the enrichment stage over up to `batch_size` articles.
pub async fn run(ctx: &StageContext, batch_size: usize) -> Result<()> {
    let owner = lease::worker_owner();
    let candidates = ctx.stores.articles.find_many_ordered(
        |a| a.needs_enrichment(),
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
        tracing::info!("no articles require enrichment");
        return Ok(());
    }

    // Fetch canonical markdown once per article; it both feeds the prompt
    // and overwrites whatever markdown the model returns.
    let mut md_by_id: HashMap<DocId, String> = HashMap::new();
    for article in &docs {
        let markdown = fetch_markdown(&ctx.tools.http, &article.link, &article.raw_content).await;
        md_by_id.insert(article.id.clone(), markdown);
    }

    let schema = strict_schema_for::<ArticleEnrichment>();
    let lines: Vec<BatchRequestLine> = docs
        .iter()
        .map(|article| {
            let markdown = md_by_id.get(&article.id).map(String::as_str).unwrap_or("");
            BatchRequestLine::new(
                article.id.to_string(),
                CHAT_COMPLETIONS_ENDPOINT,
                json!({
                    "model": ctx.batch_model,
                    "messages": [
                        { "role": "system", "content": prompts::ARTICLE_ENRICH },
                        { "role": "user", "content": enrich_input(article, markdown) },
                    ],
                    "response_format": {
                        "type": "json_schema",
                        "json_schema": {
                            "name": "ArticleEnrichment",
                            "schema": schema,
                            "strict": true,
                        },
                    },
                }),
            )
        })
        .collect();
    tracing::info!(articles = docs.len(), "dispatching enrichment");

    match run_bulk(ctx.lm.as_ref(), &lines, CHAT_COMPLETIONS_ENDPOINT, &ctx.watchdog).await {
        Ok(outputs) => {
            let mut enriched = 0;
            for line in &outputs {
                let Some(article) = docs.iter().find(|d| d.id.to_string() == line.custom_id) else {
                    continue;
                };
                let Some(body) = line.success_body() else {
                    tracing::error!(custom_id = %line.custom_id, error = ?line.error, "enrichment request failed");
                    continue;
                };
                let Some(content) = body
                    .get("choices")
                    .and_then(Value::as_array)
                    .and_then(|c| c.first())
                    .and_then(|c| c.get("message"))
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let enrichment: ArticleEnrichment = match serde_json::from_str(content) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::error!(custom_id = %line.custom_id, error = %e, "enrichment output failed validation; dropped");
                        continue;
                    }
                };
                let markdown = md_by_id.get(&article.id).cloned().unwrap_or_default();
                let lm_log = Some(chat_lm_log(body, &ctx.batch_model));
                match apply_enrichment(ctx, &article.id, enrichment, &markdown, lm_log) {
                    Ok(()) => enriched += 1,
                    Err(e) => {
                        tracing::error!(article_id = %article.id, error = %e, "failed to store enrichment")
                    }
                }
            }
            tracing::info!(enriched, "enrichment applied");
        }
        Err(Error::Timeout(reason)) => {
            tracing::warn!(%reason, "enrichment batch stalled; falling back to per-item mode");
            fallback_each(ctx, &docs, &md_by_id, &schema).await;
        }
        Err(e) => {
            tracing::error!(error = %e, "enrichment batch failed; skipping this run");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_lm_log_reads_usage() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-5-mini",
            "usage": { "prompt_tokens": 120, "completion_tokens": 40 },
        });
        let log = chat_lm_log(&body, "fallback");
        assert_eq!(log.api_type, "completions");
        assert_eq!(log.call_id, "chatcmpl-1");
        assert_eq!(log.user_tokens, 120);
        assert_eq!(log.response_tokens, 40);
    }

    #[test]
    fn enrich_input_carries_metadata() {
        let article = Article {
            id: DocId::from("a1"),
            title: "Title".into(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            ingested_at: cw_domain::dates::now_fixed(),
            link: "https://example.gov/a".into(),
            tags: vec!["x".into(), "y".into()],
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
        };
        let input = enrich_input(&article, "# body");
        assert!(input.contains("Tags: x,y"));
        assert!(input.contains("# body"));
    }
}
