//! Claim verification: build one research request per claim that needs a
//! check today, dispatch the batch (bulk mode with per-item failover),
//! and apply the results — updates, model-requested follow-ups, terminal
//! transitions, and follow-up fate-sealing.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde_json::Value;

use cw_domain::dates;
use cw_domain::model::{
    Claim, ClaimType, DocId, Followup, LmLog, ModelOutput, Update, Verdict,
};
use cw_domain::outputs::{classify_verdict, FactCheckResponseOutput, ModelResponseOutput};
use cw_domain::{Error, Result};
use cw_providers::{
    parse_model_turn, respond_parsed, response_request_body, run_bulk, strict_schema_for,
    BatchRequestLine, LmOutput, ResponseRequest, SchemaBinding, RESPONSES_ENDPOINT,
};

use crate::context::StageContext;
use crate::prompts;
use crate::schedule::{autoplan, classify, insert_followup_dedup, CheckKind};

/// Due follow-ups are only drained on the last run of the day (fixed
/// UTC-5 clock).
pub const DRAIN_HOUR: u32 = 23;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Eligible populations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct Populations {
    pub promises: Vec<Claim>,
    pub goals: Vec<Claim>,
    pub statements: Vec<Claim>,
}

/// Collect the claims in play this run:
/// - promises not yet terminal;
/// - goals marked follow-up-worthy;
/// - statements marked follow-up-worthy that have never been checked
///   (one fact check per statement, ever).
pub(crate) fn eligible_populations(ctx: &StageContext) -> Result<Populations> {
    let promises = ctx
        .stores
        .claims
        .find_many(|c| c.kind == ClaimType::Promise && !c.date_past)?;
    let goals = ctx
        .stores
        .claims
        .find_many(|c| c.kind == ClaimType::Goal && c.follow_up_worthy)?;

    let mut statements = Vec::new();
    for claim in ctx
        .stores
        .claims
        .find_many(|c| c.kind == ClaimType::Statement && c.follow_up_worthy)?
    {
        let checked = ctx.stores.updates.count(|u| u.claim_id == claim.id)? > 0;
        if !checked {
            statements.push(claim);
        }
    }

    tracing::info!(
        promises = promises.len(),
        goals = goals.len(),
        statements = statements.len(),
        "eligible claim populations"
    );
    Ok(Populations { promises, goals, statements })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RequestEntry {
    claim: Option<Claim>,
    check: Option<CheckKind>,
    followup: Option<Followup>,
    fact_check: bool,
}

struct RequestBatch {
    lines: Vec<BatchRequestLine>,
    mapping: HashMap<String, RequestEntry>,
}

fn claim_metadata_block(claim: &Claim, today: NaiveDate) -> String {
    let completion_date = claim
        .completion_condition_date
        .map(|d| d.to_string())
        .unwrap_or_default();
    [
        "".into(),
        "-- Article Metadata --".into(),
        format!("Source Article Link: {}", claim.article_link),
        format!("Source Article Date: {}", claim.article_date),
        format!("Claim: {}", claim.claim),
        format!("Verbatim Quote from Article: {}", claim.verbatim_claim),
        format!("Completion Condition: {}", claim.completion_condition),
        format!("Projected Completion Date: {completion_date}"),
        format!("Current Date: {today}"),
    ]
    .join("\n")
}

fn statement_metadata_block(claim: &Claim, today: NaiveDate) -> String {
    let mut parts = vec![
        "".into(),
        "-- Statement Metadata --".into(),
        format!("Source Article Link: {}", claim.article_link),
        format!("Source Article Date: {}", claim.article_date),
        format!("Claim (statement): {}", claim.claim),
        format!("Verbatim Quote: {}", claim.verbatim_claim),
    ];
    if let Some(event) = claim.event_date {
        parts.push(format!("Event/Effective Date (if any): {event}"));
    }
    parts.push(format!("Current Date: {today}"));
    parts.join("\n")
}

fn followup_metadata_block(followup: &Followup, claim: Option<&Claim>, today: NaiveDate) -> String {
    let article_date = claim
        .map(|c| c.article_date.to_string())
        .unwrap_or_default();
    [
        "".into(),
        "-- Followup Metadata --".into(),
        format!("Source Article Link: {}", followup.article_link),
        format!("Source Article Date: {article_date}"),
        format!("Claim: {}", followup.claim_text),
        format!("Followup requested for: {}", followup.follow_up_date),
        format!("Current Date: {today}"),
    ]
    .join("\n")
}

fn research_request(ctx: &StageContext, content: String, fact_check: bool) -> ResponseRequest {
    let schema = if fact_check {
        SchemaBinding {
            name: "FactCheckResponseOutput".into(),
            schema: strict_schema_for::<FactCheckResponseOutput>(),
        }
    } else {
        SchemaBinding {
            name: "ModelResponseOutput".into(),
            schema: strict_schema_for::<ModelResponseOutput>(),
        }
    };
    ResponseRequest {
        model: ctx.verify_model.clone(),
        input: vec![serde_json::json!({ "role": "user", "content": content })],
        tools: vec![serde_json::json!({ "type": "web_search" })],
        tool_choice: Some("auto".into()),
        include: vec!["web_search_call.action.sources".into()],
        schema: Some(schema),
        reasoning_effort: None,
    }
}

/// Whether this claim already produced an update today (wall clock).
/// Same-day re-runs skip such claims, so a second pipeline pass inserts
/// nothing new.
fn checked_today(ctx: &StageContext, claim_id: &DocId) -> Result<bool> {
    let today = dates::today_fixed();
    Ok(ctx
        .stores
        .updates
        .count(|u| u.claim_id == *claim_id && u.created_at.date_naive() == today)?
        > 0)
}

fn build_requests(ctx: &StageContext, pops: &Populations, today: NaiveDate, drain_due: bool) -> Result<RequestBatch> {
    let mut lines = Vec::new();
    let mut mapping: HashMap<String, RequestEntry> = HashMap::new();
    let mut idx = 0usize;

    let push = |lines: &mut Vec<BatchRequestLine>,
                    mapping: &mut HashMap<String, RequestEntry>,
                    custom_id: String,
                    req: ResponseRequest,
                    entry: RequestEntry| {
        lines.push(BatchRequestLine::new(
            custom_id.clone(),
            RESPONSES_ENDPOINT,
            response_request_body(&req),
        ));
        mapping.insert(custom_id, entry);
    };

    // Promises: cadence-gated check-ins.
    for claim in &pops.promises {
        let Some(end) = claim.completion_condition_date else {
            continue;
        };
        let check = classify(today, claim.article_date, end);
        let template = match check {
            CheckKind::Endpoint => prompts::ENDPOINT_CHECKIN,
            CheckKind::RegularInterval => prompts::REGULAR_CHECKIN,
            CheckKind::NoUpdate => continue,
        };
        if checked_today(ctx, &claim.id)? {
            continue;
        }
        let content = format!("{}{}", template.trim(), claim_metadata_block(claim, today));
        let custom_id = format!("claim:{}:{idx}", claim.id);
        idx += 1;
        push(
            &mut lines,
            &mut mapping,
            custom_id,
            research_request(ctx, content, false),
            RequestEntry {
                claim: Some(claim.clone()),
                check: Some(check),
                followup: None,
                fact_check: false,
            },
        );
    }

    // Goals: a regular check-in so the model can propose the next
    // follow-up date itself.
    for claim in &pops.goals {
        if checked_today(ctx, &claim.id)? {
            continue;
        }
        let content = format!(
            "{}{}",
            prompts::REGULAR_CHECKIN.trim(),
            claim_metadata_block(claim, today)
        );
        let custom_id = format!("goal:{}:{idx}", claim.id);
        idx += 1;
        push(
            &mut lines,
            &mut mapping,
            custom_id,
            research_request(ctx, content, false),
            RequestEntry {
                claim: Some(claim.clone()),
                check: None,
                followup: None,
                fact_check: false,
            },
        );
    }

    // Statements: one fact check.
    for claim in &pops.statements {
        let content = format!(
            "{}{}",
            prompts::FACT_CHECK.trim(),
            statement_metadata_block(claim, today)
        );
        let custom_id = format!("statement:{}:{idx}", claim.id);
        idx += 1;
        push(
            &mut lines,
            &mut mapping,
            custom_id,
            research_request(ctx, content, true),
            RequestEntry {
                claim: Some(claim.clone()),
                check: None,
                followup: None,
                fact_check: true,
            },
        );
    }

    // Due follow-ups, drained only on the last run of the day. A due
    // follow-up whose claim already has a request this run rides along on
    // that request instead of spawning a second check.
    if drain_due {
        let due = ctx.stores.follow_ups.find_many(|f| f.is_due(today))?;
        let mut drained = 0;
        for followup in due {
            if let Some(entry) = mapping
                .values_mut()
                .find(|e| e.claim.as_ref().map(|c| &c.id) == Some(&followup.claim_id))
            {
                if entry.followup.is_none() {
                    entry.followup = Some(followup);
                    drained += 1;
                    continue;
                }
            }
            let claim = ctx.stores.claims.find_by_id(&followup.claim_id)?;
            let content = format!(
                "{}{}",
                prompts::ENDPOINT_CHECKIN.trim(),
                followup_metadata_block(&followup, claim.as_ref(), today)
            );
            let custom_id = format!("followup:{}:{idx}", followup.id);
            idx += 1;
            push(
                &mut lines,
                &mut mapping,
                custom_id,
                research_request(ctx, content, false),
                RequestEntry {
                    claim,
                    check: None,
                    followup: Some(followup),
                    fact_check: false,
                },
            );
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(drained, %today, "queued due follow-ups");
        }
    }

    Ok(RequestBatch { lines, mapping })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct VerifyOutcome {
    verdict: Verdict,
    text: String,
    sources: Vec<String>,
    follow_up_date: Option<NaiveDate>,
    model_output: ModelOutput,
    lm_log: Option<LmLog>,
}

/// Normalize a parsed-or-not response into one outcome. Malformed or
/// absent structures fall back to the keyword heuristic over the
/// narrative text; the item is stored either way.
fn outcome_from_parts(
    parsed: Option<Value>,
    narrative: &str,
    fact_check: bool,
    lm_log: Option<LmLog>,
) -> VerifyOutcome {
    if let Some(value) = parsed {
        if fact_check {
            if let Ok(out) = serde_json::from_value::<FactCheckResponseOutput>(value.clone()) {
                return VerifyOutcome {
                    verdict: out.verdict.into(),
                    text: out.text.unwrap_or_else(|| narrative.to_string()),
                    sources: out.sources.unwrap_or_default(),
                    follow_up_date: out.follow_up_date.as_deref().and_then(dates::coerce_date),
                    model_output: ModelOutput::Structured(value),
                    lm_log,
                };
            }
        } else if let Ok(out) = serde_json::from_value::<ModelResponseOutput>(value.clone()) {
            return VerifyOutcome {
                verdict: out.verdict.into(),
                text: out.text.unwrap_or_else(|| narrative.to_string()),
                sources: out.sources.unwrap_or_default(),
                follow_up_date: out.follow_up_date.as_deref().and_then(dates::coerce_date),
                model_output: ModelOutput::Structured(value),
                lm_log,
            };
        }
    }

    VerifyOutcome {
        verdict: classify_verdict(narrative).into(),
        text: narrative.to_string(),
        sources: Vec::new(),
        follow_up_date: None,
        model_output: ModelOutput::Text(narrative.to_string()),
        lm_log,
    }
}

/// Apply one outcome: insert the update, record any requested follow-up,
/// run the terminal transitions, and seal a consumed follow-up's fate.
fn apply_outcome(ctx: &StageContext, entry: &RequestEntry, outcome: VerifyOutcome) -> Result<()> {
    let (claim_id, claim_text, article_id, article_link, article_date) = match (&entry.claim, &entry.followup) {
        (Some(claim), _) => (
            claim.id.clone(),
            claim.claim.clone(),
            claim.article_id.clone(),
            claim.article_link.clone(),
            Some(claim.article_date),
        ),
        (None, Some(followup)) => (
            followup.claim_id.clone(),
            followup.claim_text.clone(),
            followup.article_id.clone(),
            followup.article_link.clone(),
            None,
        ),
        (None, None) => return Ok(()),
    };

    // Sources are rendered into the narrative as well as stored.
    let mut text = outcome.text;
    if !outcome.sources.is_empty() {
        text.push_str("\n\nSources:\n");
        for source in &outcome.sources {
            text.push_str(&format!("- {source}\n"));
        }
    }

    let update = Update {
        id: DocId::default(),
        claim_id: claim_id.clone(),
        claim_text,
        article_id,
        article_link,
        article_date,
        text,
        model_output: outcome.model_output.clone(),
        verdict: outcome.verdict,
        sources: outcome.sources,
        created_at: dates::now_fixed(),
        lm_log: outcome.lm_log,
    };
    let update_id = match ctx.stores.updates.insert_one(update) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(%claim_id, error = %e, "failed to insert update; next run retries");
            return Ok(());
        }
    };

    if let Some(date) = outcome.follow_up_date {
        match ctx.stores.claims.find_by_id(&claim_id)? {
            Some(claim) => {
                if insert_followup_dedup(&ctx.stores, &claim, date, Some(outcome.model_output))? {
                    tracing::info!(%claim_id, %date, "model requested a follow-up");
                }
            }
            None => tracing::warn!(%claim_id, "follow-up requested for a vanished claim"),
        }
    }

    if let Some(claim) = &entry.claim {
        let endpoint = entry.check == Some(CheckKind::Endpoint);
        let terminal_promise = claim.kind == ClaimType::Promise && outcome.verdict.is_terminal();
        if endpoint || terminal_promise {
            ctx.stores.claims.update_one(&claim.id, |c| c.date_past = true)?;
        }
    }

    if let Some(followup) = &entry.followup {
        let now = dates::now_fixed();
        ctx.stores.follow_ups.update_one(&followup.id, |f| {
            f.processed_at = Some(now);
            f.processed_update_id = Some(update_id.clone());
        })?;
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mode B failover: one synchronous call per request line, in order.
async fn run_each(ctx: &StageContext, batch: &RequestBatch) -> Result<usize> {
    let mut applied = 0;
    for line in &batch.lines {
        let Some(entry) = batch.mapping.get(&line.custom_id) else {
            continue;
        };

        // Rebuild the synchronous request from the submitted body so both
        // modes send the same thing.
        let req = ResponseRequest {
            model: line.body["model"].as_str().unwrap_or(&ctx.verify_model).to_string(),
            input: line.body["input"].as_array().cloned().unwrap_or_default(),
            tools: line.body["tools"].as_array().cloned().unwrap_or_default(),
            tool_choice: line.body["tool_choice"].as_str().map(String::from),
            include: vec!["web_search_call.action.sources".into()],
            schema: {
                let format = &line.body["text"]["format"];
                format.get("schema").map(|schema| SchemaBinding {
                    name: format
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("Output")
                        .to_string(),
                    schema: schema.clone(),
                })
            },
            reasoning_effort: None,
        };

        let result: Result<(LmOutput<Value>, _)> = respond_parsed(ctx.lm.as_ref(), &req).await;
        match result {
            Ok((output, turn)) => {
                let lm_log = Some(turn.lm_log("pipeline::verify"));
                let outcome = match output {
                    LmOutput::Parsed(value) => {
                        outcome_from_parts(Some(value), &turn.output_text, entry.fact_check, lm_log)
                    }
                    LmOutput::Unparsed(text) => {
                        outcome_from_parts(None, &text, entry.fact_check, lm_log)
                    }
                };
                apply_outcome(ctx, entry, outcome)?;
                applied += 1;
            }
            Err(e) => {
                tracing::error!(custom_id = %line.custom_id, error = %e, "per-item call failed; skipping for this run");
            }
        }
    }
    Ok(applied)
}

/// Run the verification stage for `pipeline_today()`.
pub async fn run(ctx: &StageContext, drain_due: bool) -> Result<()> {
    let today = dates::pipeline_today();

    // A promise that lost its deadline is really a goal.
    let demoted = ctx.stores.claims.update_many(
        |c| c.kind == ClaimType::Promise && c.completion_condition_date.is_none(),
        |c| c.kind = ClaimType::Goal,
    )?;
    if demoted > 0 {
        tracing::info!(demoted, "demoted deadline-less promises to goals");
    }

    let pops = eligible_populations(ctx)?;
    autoplan(&ctx.stores, &pops.promises, today)?;

    let batch = build_requests(ctx, &pops, today, drain_due)?;
    if batch.lines.is_empty() {
        tracing::info!("no verification requests today");
        return Ok(());
    }
    tracing::info!(requests = batch.lines.len(), %today, "dispatching verification requests");

    match run_bulk(ctx.lm.as_ref(), &batch.lines, RESPONSES_ENDPOINT, &ctx.watchdog).await {
        Ok(lines) => {
            let mut applied = 0;
            for line in &lines {
                let Some(entry) = batch.mapping.get(&line.custom_id) else {
                    tracing::warn!(custom_id = %line.custom_id, "no mapping for result line");
                    continue;
                };
                let Some(body) = line.success_body() else {
                    tracing::error!(custom_id = %line.custom_id, error = ?line.error, "request failed; retried next run");
                    continue;
                };
                let turn = parse_model_turn(body, true);
                let lm_log = Some(turn.lm_log("pipeline::verify"));
                let outcome =
                    outcome_from_parts(turn.parsed.clone(), &turn.output_text, entry.fact_check, lm_log);
                apply_outcome(ctx, entry, outcome)?;
                applied += 1;
            }
            tracing::info!(applied, "applied bulk verification results");
        }
        Err(Error::Timeout(reason)) => {
            tracing::warn!(%reason, "bulk verification stalled; falling back to per-item mode");
            let applied = run_each(ctx, &batch).await?;
            tracing::info!(applied, "applied per-item verification results");
        }
        Err(e) => {
            tracing::error!(error = %e, "bulk verification failed; skipping this run");
        }
    }

    Ok(())
}

/// Whether the wall clock says this is the day's drain window.
pub fn in_drain_window() -> bool {
    use chrono::Timelike;
    dates::now_fixed().hour() >= DRAIN_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_outcome_when_parse_absent() {
        let outcome = outcome_from_parts(None, "The deadline was not met at all", false, None);
        assert_eq!(outcome.verdict, Verdict::Failed);
        assert!(matches!(outcome.model_output, ModelOutput::Text(_)));
        assert!(outcome.follow_up_date.is_none());
    }

    #[test]
    fn malformed_structure_falls_back_to_heuristic() {
        let parsed = serde_json::json!({"verdict": "definitely-not-a-verdict"});
        let outcome = outcome_from_parts(Some(parsed), "work is ongoing", false, None);
        assert_eq!(outcome.verdict, Verdict::InProgress);
        assert!(matches!(outcome.model_output, ModelOutput::Text(_)));
    }

    #[test]
    fn parsed_checkin_outcome_carries_follow_up() {
        let parsed = serde_json::json!({
            "verdict": "in_progress",
            "text": "rulemaking docket opened",
            "sources": ["https://example.gov/docket"],
            "follow_up_date": "2025-09-15",
        });
        let outcome = outcome_from_parts(Some(parsed), "", false, None);
        assert_eq!(outcome.verdict, Verdict::InProgress);
        assert_eq!(
            outcome.follow_up_date,
            Some(chrono::NaiveDate::from_ymd_opt(2025, 9, 15).unwrap())
        );
        assert_eq!(outcome.sources, vec!["https://example.gov/docket"]);
        assert!(matches!(outcome.model_output, ModelOutput::Structured(_)));
    }

    #[test]
    fn parsed_fact_check_outcome_uses_fact_vocabulary() {
        let parsed = serde_json::json!({
            "verdict": "Misleading",
            "text": "numbers are cherry-picked",
            "sources": [],
            "follow_up_date": null,
        });
        let outcome = outcome_from_parts(Some(parsed), "", true, None);
        assert_eq!(outcome.verdict, Verdict::Misleading);
    }
}
