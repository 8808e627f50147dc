//! Daily run orchestrator: enrich → extract claims → verify → roundups,
//! then one `RunLog` row summarizing the run.

use std::collections::BTreeMap;

use cw_domain::dates;
use cw_domain::model::{ClaimType, DocId, RunLog, RunUpdateSummary};
use cw_domain::Result;

use crate::context::StageContext;
use crate::{claims, enrich, roundups, verify};

const ENRICH_BATCH: usize = 50;
const CLAIMS_BATCH: usize = 100;

/// Run the whole daily pipeline for `pipeline_today()`. Stage failures
/// are logged and the run continues unless `stop_on_error` is set; the
/// run log is written either way.
pub async fn run_pipeline(ctx: &StageContext, stop_on_error: bool) -> Result<()> {
    let run_started = dates::now_fixed();
    let pipeline_date = dates::pipeline_today();
    tracing::info!(%pipeline_date, "pipeline run starting");

    let mut ran_enrich = false;
    let mut ran_claims = false;
    let mut ran_updates = false;

    match enrich::run(ctx, ENRICH_BATCH).await {
        Ok(()) => ran_enrich = true,
        Err(e) => {
            tracing::error!(error = %e, "enrichment stage failed");
            if stop_on_error {
                return Err(e);
            }
        }
    }

    match claims::run(ctx, CLAIMS_BATCH).await {
        Ok(()) => ran_claims = true,
        Err(e) => {
            tracing::error!(error = %e, "claim extraction stage failed");
            if stop_on_error {
                return Err(e);
            }
        }
    }

    match verify::run(ctx, verify::in_drain_window()).await {
        Ok(()) => ran_updates = true,
        Err(e) => {
            tracing::error!(error = %e, "verification stage failed");
            if stop_on_error {
                return Err(e);
            }
        }
    }

    if let Err(e) = roundups::run(ctx).await {
        tracing::error!(error = %e, "roundup stage failed");
        if stop_on_error {
            return Err(e);
        }
    }

    if let Err(e) = write_run_log(ctx, run_started, pipeline_date, ran_enrich, ran_claims, ran_updates) {
        tracing::error!(error = %e, "failed to write run log");
    }

    tracing::info!(%pipeline_date, "pipeline run finished");
    Ok(())
}

fn count_by_key<T>(items: &[T], key: impl Fn(&T) -> Option<String>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for item in items {
        if let Some(k) = key(item) {
            *counts.entry(k).or_insert(0) += 1;
        }
    }
    counts
}

/// Aggregate the run into one `logs` row: corpus-wide priority counts,
/// and the run window's updates grouped by verdict and by the claim type
/// they verified.
fn write_run_log(
    ctx: &StageContext,
    run_started: chrono::DateTime<chrono::FixedOffset>,
    pipeline_date: chrono::NaiveDate,
    ran_enrich: bool,
    ran_claims: bool,
    ran_updates: bool,
) -> Result<()> {
    let run_finished = dates::now_fixed();

    let enrich_priority_counts = if ran_enrich {
        let articles = ctx.stores.articles.find_all()?;
        count_by_key(&articles, |a| a.priority.map(|p| p.to_string()))
    } else {
        BTreeMap::new()
    };

    let claim_priority_counts = if ran_claims {
        let all_claims = ctx.stores.claims.find_all()?;
        count_by_key(&all_claims, |c| {
            serde_json::to_value(c.priority)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
        })
    } else {
        BTreeMap::new()
    };

    let updates = if ran_updates {
        let window = ctx
            .stores
            .updates
            .find_many(|u| u.created_at >= run_started && u.created_at <= run_finished)?;

        let by_verdict = count_by_key(&window, |u| {
            serde_json::to_value(u.verdict)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
        });

        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut kind_of_claim: BTreeMap<DocId, Option<ClaimType>> = BTreeMap::new();
        for update in &window {
            let kind = kind_of_claim
                .entry(update.claim_id.clone())
                .or_insert_with(|| {
                    ctx.stores
                        .claims
                        .find_by_id(&update.claim_id)
                        .ok()
                        .flatten()
                        .map(|c| c.kind)
                });
            let bucket = match kind {
                Some(ClaimType::Statement) => "fact_check",
                Some(ClaimType::Promise) | Some(ClaimType::Goal) => "promise_checkin",
                None => "other",
            };
            *by_type.entry(bucket.to_string()).or_insert(0) += 1;
        }

        Some(RunUpdateSummary {
            window_from: run_started,
            window_to: run_finished,
            total_inserted: window.len() as u64,
            by_verdict,
            by_type,
        })
    } else {
        None
    };

    let locale_subscriptions = ctx.stores.locale_subscriptions.count(|_| true)? as u64;

    ctx.stores.logs.insert_one(RunLog {
        id: DocId::default(),
        run_started_at: run_started,
        run_finished_at: run_finished,
        pipeline_date,
        enrich_priority_counts,
        claim_priority_counts,
        updates,
        locale_subscriptions,
    })?;
    tracing::info!("run log recorded");
    Ok(())
}
