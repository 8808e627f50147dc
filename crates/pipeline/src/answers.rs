//! Answer the follow-up questions enrichment raised, so each article is
//! understandable to a layperson. Questions are researched in their
//! declared groups and every answer carries its backing sources.

use serde_json::Value;

use cw_domain::model::{Article, FollowupAnswerRecord};
use cw_domain::outputs::{FollowupAnswer, FollowupAnswersList, GroupMode, QuestionGroups};
use cw_domain::Result;
use cw_providers::{model_table, strict_schema_for, Difficulty, SchemaBinding, TaskKind};
use cw_research::{run_with_search, ResearchRequest};
use cw_store::lease;
use cw_tools::ToolSet;

use crate::context::StageContext;

pub const LOCK: &str = "followup_answer_lock";

/// Resolve the declared grouping into explicit 0-based index groups:
/// `"single"` is one group of everything, `"individual"` is singletons,
/// explicit groups are cleaned (deduplicated, sorted, bounds-checked).
pub fn normalize_groups(groups: Option<&QuestionGroups>, question_count: usize) -> Vec<Vec<usize>> {
    match groups {
        Some(QuestionGroups::Mode(GroupMode::Single)) => {
            if question_count == 0 {
                Vec::new()
            } else {
                vec![(0..question_count).collect()]
            }
        }
        Some(QuestionGroups::Mode(GroupMode::Individual)) | None => {
            (0..question_count).map(|i| vec![i]).collect()
        }
        Some(QuestionGroups::Explicit(groups)) => {
            let mut out = Vec::new();
            for group in groups {
                let mut cleaned: Vec<usize> = group
                    .iter()
                    .filter(|i| **i >= 0 && (**i as usize) < question_count)
                    .map(|i| *i as usize)
                    .collect();
                cleaned.sort_unstable();
                cleaned.dedup();
                if !cleaned.is_empty() {
                    out.push(cleaned);
                }
            }
            out
        }
    }
}

fn build_prompt(article: &Article, questions: &[String], groups: &[Vec<usize>], outline: &str) -> String {
    let takeaways = article
        .key_takeaways
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|kt| format!("- {kt}"))
        .collect::<Vec<_>>()
        .join("\n");
    let questions_block = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{i}. {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    let groups_block = if groups.is_empty() {
        "[]".to_string()
    } else {
        groups
            .iter()
            .map(|g| format!("{g:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let excerpt: String = article
        .clean_markdown
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(4000)
        .collect();

    format!(
        "You are answering follow-up questions to make this article understandable to a layperson.\n\
         Use the article context below and web research to produce concise, sourced answers.\n\
         Return ONLY the structured output requested.\n\n\
         Instructions:\n\
         - Provide a short answer for each question index, even if the article partially answers it.\n\
         - Cite 1-3 high-quality sources per answer when possible; prefer sources that directly support the answer.\n\
         - Reuse research across grouped questions to keep answers consistent.\n\
         - If a question is unanswerable with available information, say so concisely and leave sources empty.\n\n\
         Structured output required (one entry per question index, 0-based):\n{outline}\n\n\
         Article title: {title}\nDate: {date}\nLink: {link}\nSummary: {summary}\n\
         Key takeaways:\n{takeaways}\n\
         Question groups (0-based indexes of related questions): {groups_block}\n\n\
         Questions (index: text):\n{questions_block}\n\n\
         Article excerpt for grounding:\n{excerpt}",
        title = article.title,
        date = article.date,
        link = article.link,
        summary = article.summary_paragraph.as_deref().unwrap_or(""),
        takeaways = if takeaways.is_empty() { "- None provided".into() } else { takeaways },
    )
}

/// Accept either the bound list shape or the index-keyed map models
/// sometimes emit; pair answers back to their questions.
pub fn coerce_answers(parsed: &Value, questions: &[String]) -> Vec<FollowupAnswerRecord> {
    let mut indexed: Vec<(usize, FollowupAnswer)> = Vec::new();

    if let Ok(list) = serde_json::from_value::<FollowupAnswersList>(parsed.clone()) {
        for item in list.answers {
            if item.index >= 0 {
                indexed.push((
                    item.index as usize,
                    FollowupAnswer { text: item.text, sources: item.sources },
                ));
            }
        }
    } else if let Some(map) = parsed.as_object() {
        for (key, value) in map {
            let Ok(index) = key.parse::<usize>() else {
                continue;
            };
            if let Ok(answer) = serde_json::from_value::<FollowupAnswer>(value.clone()) {
                indexed.push((index, answer));
            }
        }
    }

    let mut out = Vec::new();
    for (index, answer) in indexed {
        let Some(question) = questions.get(index) else {
            continue;
        };
        if out.iter().any(|r: &FollowupAnswerRecord| r.index == index) {
            continue;
        }
        out.push(FollowupAnswerRecord {
            index,
            question: question.clone(),
            text: answer.text,
            sources: answer.sources,
        });
    }
    out.sort_by_key(|r| r.index);
    out
}

/// Answer follow-up questions for up to `batch_size` articles.
pub async fn run(ctx: &StageContext, batch_size: usize) -> Result<()> {
    let owner = lease::worker_owner();
    let candidates = ctx.stores.articles.find_many_ordered(
        |a| {
            a.follow_up_questions.as_ref().is_some_and(|q| !q.is_empty())
                && a.follow_up_answers.as_ref().map_or(true, |ans| ans.is_empty())
        },
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
        tracing::info!("no articles require follow-up answers");
        return Ok(());
    }

    let schema = strict_schema_for::<FollowupAnswersList>();
    let outline = cw_providers::compact_outline(&schema);
    let choice = model_table(TaskKind::Agent, Difficulty::Medium);
    let mut answered = 0;

    for article in &docs {
        let questions = article.follow_up_questions.clone().unwrap_or_default();
        let groups = normalize_groups(article.follow_up_question_groups.as_ref(), questions.len());
        let prompt = build_prompt(article, &questions, &groups, &outline);

        let request = ResearchRequest {
            input: prompt,
            model: choice.model.to_string(),
            reasoning_effort: choice.effort.map(String::from),
            task_system: None,
            tools: vec![ToolSet::WebSearch, ToolSet::FetchUrl],
            schema: Some(SchemaBinding {
                name: "FollowupAnswersList".into(),
                schema: schema.clone(),
            }),
        };

        match run_with_search(ctx.lm.as_ref(), &ctx.tools, &request).await {
            Ok(outcome) => {
                let mut records = outcome
                    .parsed
                    .as_ref()
                    .map(|p| coerce_answers(p, &questions))
                    .unwrap_or_default();
                if records.is_empty() && !outcome.text.is_empty() {
                    // Some models answer in plain JSON text instead.
                    if let Ok(value) = serde_json::from_str::<Value>(&outcome.text) {
                        records = coerce_answers(&value, &questions);
                    }
                }
                if records.is_empty() {
                    tracing::warn!(article_id = %article.id, "no usable follow-up answers");
                    lease::release(&ctx.stores.articles, &article.id, LOCK);
                    continue;
                }
                let lm_log = outcome.lm_log.clone();
                ctx.stores.articles.update_one(&article.id, |a| {
                    a.follow_up_answers = Some(records.clone());
                    a.follow_up_answers_lm_log = lm_log.clone();
                    a.locks.remove(LOCK);
                })?;
                answered += 1;
            }
            Err(e) => {
                tracing::error!(article_id = %article.id, error = %e, "follow-up answering failed");
                lease::release(&ctx.stores.articles, &article.id, LOCK);
            }
        }
    }

    tracing::info!(answered, "follow-up answers stored");
    Ok(())
}
