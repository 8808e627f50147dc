//! Multi-horizon roundups: daily, weekly, monthly, yearly narrative
//! reports assembled from period articles and the nested lower-tier
//! roundups inside the window.

use chrono::{Datelike, Duration, NaiveDate};
use serde_json::Value;

use cw_domain::dates;
use cw_domain::model::{Roundup, RoundupKind, SeedArticle};
use cw_domain::outputs::RoundupResponseOutput;
use cw_domain::Result;
use cw_providers::{
    model_table, select_model, strict_schema_for, Difficulty, SchemaBinding, TaskKind,
};
use cw_research::{run_with_search, ResearchRequest};
use cw_tools::ToolSet;

use crate::context::StageContext;
use crate::prompts;

/// Periods starting before this date are never generated.
pub fn cutoff_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 15).unwrap()
}

/// Nested lower-tier seeds rank above any article seed.
const NESTED_SEED_SCORE: i64 = 100_000;
/// Seed list cap, nested roundups included.
const MAX_SEEDS: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Period windows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn prev_day(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = today - Duration::days(1);
    (end, end)
}

/// Monday..Sunday week ending on the most recent Sunday.
pub fn prev_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let weekday = today.weekday().num_days_from_monday() as i64;
    let last_sunday = today - Duration::days(weekday + 1);
    (last_sunday - Duration::days(6), last_sunday)
}

/// The whole previous calendar month.
pub fn prev_month(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = today.with_day(1).unwrap_or(today);
    let end = first_of_month - Duration::days(1);
    let start = end.with_day(1).unwrap_or(end);
    (start, end)
}

/// The whole previous calendar year.
pub fn prev_year(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let year = today.year() - 1;
    (
        NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today),
        NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seed assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn nesting(kind: RoundupKind) -> Option<(RoundupKind, usize)> {
    match kind {
        RoundupKind::Daily => None,
        RoundupKind::Weekly => Some((RoundupKind::Daily, 7)),
        RoundupKind::Monthly => Some((RoundupKind::Weekly, 4)),
        RoundupKind::Yearly => Some((RoundupKind::Monthly, 12)),
    }
}

/// Seeds for the shorter-window roundups inside the period, oldest first.
pub(crate) fn collect_nested(
    ctx: &StageContext,
    kind: RoundupKind,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<SeedArticle>> {
    let Some((sub_kind, cap)) = nesting(kind) else {
        return Ok(Vec::new());
    };
    let nested = ctx.stores.roundups.find_many_ordered(
        |r| r.kind == sub_kind && r.period_start >= start && r.period_end <= end,
        |r| r.period_start,
        false,
        Some(cap),
    )?;
    Ok(nested
        .into_iter()
        .map(|r| SeedArticle {
            article_id: r.id,
            title: r.title,
            link: None,
            score: NESTED_SEED_SCORE,
            key_takeaways: None,
            claims: None,
        })
        .collect())
}

/// Rank the period's articles by
/// `#key_takeaways + #claims referencing it + priority` and take the top
/// `limit` as seeds, each carrying its takeaways and claim texts.
pub(crate) fn collect_seed_articles(
    ctx: &StageContext,
    start: NaiveDate,
    end: NaiveDate,
    limit: usize,
) -> Result<Vec<SeedArticle>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let articles = ctx
        .stores
        .articles
        .find_many(|a| a.date >= start && a.date <= end)?;

    let mut scored: Vec<(i64, SeedArticle)> = Vec::new();
    for article in articles {
        let takeaways = article.key_takeaways.clone().unwrap_or_default();
        let claims: Vec<String> = ctx
            .stores
            .claims
            .find_many(|c| c.article_id == article.id)?
            .into_iter()
            .map(|c| c.claim)
            .collect();
        let score =
            takeaways.len() as i64 + claims.len() as i64 + article.priority.unwrap_or(0) as i64;
        scored.push((
            score,
            SeedArticle {
                article_id: article.id.clone(),
                title: article.title.clone(),
                link: Some(article.link.clone()),
                score,
                key_takeaways: (!takeaways.is_empty()).then_some(takeaways),
                claims: (!claims.is_empty()).then_some(claims),
            },
        ));
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(scored.into_iter().take(limit).map(|(_, seed)| seed).collect())
}

fn seed_markdown(seeds: &[SeedArticle]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for seed in seeds {
        match &seed.link {
            Some(link) => lines.push(format!("- {} ({link})", seed.title)),
            None => lines.push(format!("- {}", seed.title)),
        }
        if let Some(takeaways) = &seed.key_takeaways {
            for kt in takeaways {
                lines.push(format!("  - {kt}"));
            }
        }
        if let Some(claims) = &seed.claims {
            lines.push("  - Claims:".into());
            for claim in claims {
                lines.push(format!("    - {claim}"));
            }
        }
    }
    lines.join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn generate(
    ctx: &StageContext,
    kind: RoundupKind,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Option<Roundup>> {
    let nested = collect_nested(ctx, kind, start, end)?;
    let remaining = MAX_SEEDS.saturating_sub(nested.len());
    let articles = collect_seed_articles(ctx, start, end, remaining)?;
    let mut seeds = nested;
    seeds.extend(articles);

    let total_in_period = ctx
        .stores
        .articles
        .count(|a| a.date >= start && a.date <= end)? as u64;
    let omitted = total_in_period.saturating_sub(seeds.len() as u64);

    let user_prompt = format!(
        "Time period: {start} to {end} ({kind})\n\n\
         Seed articles (representative sample):\n{}\n\n\
         Articles in internal knowledge base but not in this seed list: {omitted}\n\n\
         Write the roundup.",
        seed_markdown(&seeds),
    );

    // Yearly reports always get the strongest agent; everything else asks
    // the selector.
    let choice = if kind == RoundupKind::Yearly {
        model_table(TaskKind::Agent, Difficulty::High)
    } else {
        select_model(
            ctx.lm.as_ref(),
            TaskKind::Agent,
            &format!("Write a {kind} roundup of government activity with research and citations."),
        )
        .await
    };

    let schema = strict_schema_for::<RoundupResponseOutput>();
    let request = ResearchRequest {
        input: user_prompt,
        model: choice.model.to_string(),
        reasoning_effort: choice.effort.map(String::from),
        task_system: Some(prompts::ROUNDUP.to_string()),
        tools: vec![ToolSet::WebSearch, ToolSet::NewsSearch, ToolSet::InternalSearch],
        schema: Some(SchemaBinding {
            name: "RoundupResponseOutput".into(),
            schema,
        }),
    };

    let outcome = match run_with_search(ctx.lm.as_ref(), &ctx.tools, &request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(%kind, %start, %end, error = %e, "roundup generation failed");
            return Ok(None);
        }
    };

    let parsed: Option<RoundupResponseOutput> = outcome
        .parsed
        .clone()
        .and_then(|v: Value| serde_json::from_value(v).ok());
    let mut title = parsed.as_ref().map(|p| p.title.clone()).unwrap_or_default();
    let body = parsed
        .as_ref()
        .map(|p| p.text.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| outcome.text.clone());
    let sources = parsed.and_then(|p| p.sources);

    if body.trim().is_empty() {
        tracing::warn!(%kind, %start, %end, "empty roundup body; not persisting");
        return Ok(None);
    }
    if title.is_empty() {
        let kind_title = match kind {
            RoundupKind::Daily => "Daily",
            RoundupKind::Weekly => "Weekly",
            RoundupKind::Monthly => "Monthly",
            RoundupKind::Yearly => "Yearly",
        };
        title = format!("{kind_title} Roundup ({start}\u{2013}{end})");
    }

    Ok(Some(Roundup {
        id: Default::default(),
        kind,
        period_start: start,
        period_end: end,
        title,
        summary_markdown: body,
        sources,
        seed_articles: seeds,
        omitted_count: Some(omitted),
        created_at: dates::now_fixed(),
        lm_log: outcome.lm_log,
    }))
}

/// Generate every missing roundup for the periods relative to
/// `pipeline_today()`.
pub async fn run(ctx: &StageContext) -> Result<()> {
    let today = dates::pipeline_today();
    let periods = [
        (RoundupKind::Daily, prev_day(today)),
        (RoundupKind::Weekly, prev_week(today)),
        (RoundupKind::Monthly, prev_month(today)),
        (RoundupKind::Yearly, prev_year(today)),
    ];

    for (kind, (start, end)) in periods {
        if start < cutoff_date() {
            tracing::info!(%kind, %start, %end, cutoff = %cutoff_date(), "period precedes cutoff; skipping");
            continue;
        }
        let exists = ctx
            .stores
            .roundups
            .count(|r| r.kind == kind && r.period_start == start && r.period_end == end)?
            > 0;
        if exists {
            tracing::info!(%kind, %start, %end, "roundup already exists");
            continue;
        }

        tracing::info!(%kind, %start, %end, "generating roundup");
        match generate(ctx, kind, start, end).await {
            Ok(Some(roundup)) => {
                if let Err(e) = ctx.stores.roundups.insert_one(roundup) {
                    tracing::error!(%kind, error = %e, "failed to insert roundup");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(%kind, error = %e, "roundup generation errored"),
        }
    }
    Ok(())
}
