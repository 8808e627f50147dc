//! The two execution modes of the dispatcher.
//!
//! Mode A submits a request list as one bulk job and long-polls it with a
//! progress watchdog: the soft deadline resets whenever the completion
//! ratio advances, so a slow-but-moving job is never killed, while a
//! stalled one is cancelled and reported as a timeout. The caller fails
//! over to Mode B for the same request list — `custom_id`s make the
//! re-submission idempotent.
//!
//! Mode B is one synchronous call per item with bounded retries on
//! structured-validation failure.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use cw_domain::{Error, Result};

use crate::batch::{parse_output_lines, to_jsonl, BatchOutputLine, BatchRequestLine};
use crate::traits::{BatchStatus, LmClient, LmOutput, ModelTurn, ResponseRequest};

/// Maximum structured-validation retries in Mode B.
pub const MAX_VALIDATION_RETRIES: usize = 3;

/// Watchdog tuning for Mode A polling.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
    /// Cancel when no progress has been observed for this long.
    pub idle_timeout: Duration,
    /// Absolute wall-clock cap, progress or not.
    pub hard_cap: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            poll_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30 * 60),
            hard_cap: Duration::from_secs(4 * 60 * 60),
        }
    }
}

/// Mode A: upload the request lines, submit the job, poll to a terminal
/// state, download and return one record per line keyed by `custom_id`.
///
/// Returns [`Error::Timeout`] after cancelling a stalled job; the caller
/// is responsible for invoking Mode B over the same request list.
pub async fn run_bulk(
    client: &dyn LmClient,
    lines: &[BatchRequestLine],
    endpoint: &str,
    watchdog: &WatchdogConfig,
) -> Result<Vec<BatchOutputLine>> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let jsonl = to_jsonl(lines)?;
    let input_file_id = client.upload_batch_input(&jsonl).await?;
    let batch_id = client.create_batch(&input_file_id, endpoint).await?;
    tracing::info!(%batch_id, requests = lines.len(), endpoint, "bulk job submitted");

    let started = Instant::now();
    let mut last_progress = Instant::now();
    let mut last_ratio = -1.0f64;

    loop {
        let job = client.retrieve_batch(&batch_id).await?;

        match job.status {
            BatchStatus::Completed => {
                let Some(output_file_id) = job.output_file_id else {
                    return Err(Error::Provider {
                        provider: "llm".into(),
                        message: format!("batch {batch_id} completed without an output file"),
                    });
                };
                if let Some(error_file_id) = &job.error_file_id {
                    log_error_file(client, error_file_id).await;
                }
                let text = client.download_file(&output_file_id).await?;
                return Ok(parse_output_lines(&text));
            }
            BatchStatus::Expired | BatchStatus::Cancelled => {
                tracing::warn!(%batch_id, status = ?job.status, "bulk job ended early");
                // Whatever finished is still retrievable; the rest will be
                // retried by the next run.
                return match job.output_file_id {
                    Some(id) => {
                        let text = client.download_file(&id).await?;
                        Ok(parse_output_lines(&text))
                    }
                    None => Ok(Vec::new()),
                };
            }
            BatchStatus::Failed => {
                return Err(Error::Provider {
                    provider: "llm".into(),
                    message: format!("batch {batch_id} failed"),
                });
            }
            BatchStatus::InProgress => {}
        }

        if let Some(ratio) = job.progress() {
            if ratio > last_ratio {
                last_ratio = ratio;
                last_progress = Instant::now();
                tracing::debug!(%batch_id, completed = job.completed, total = job.total, "bulk progress");
            }
        }

        if started.elapsed() > watchdog.hard_cap || last_progress.elapsed() > watchdog.idle_timeout {
            tracing::warn!(%batch_id, "bulk job stalled; cancelling for failover");
            if let Err(e) = client.cancel_batch(&batch_id).await {
                tracing::warn!(%batch_id, error = %e, "cancel after stall failed");
            }
            return Err(Error::Timeout(format!("batch {batch_id} made no progress")));
        }

        tokio::time::sleep(watchdog.poll_interval).await;
    }
}

/// Mode B: one synchronous call with up to [`MAX_VALIDATION_RETRIES`]
/// attempts when the response fails to validate against `T`. Returns the
/// narrative text as [`LmOutput::Unparsed`] once retries are spent —
/// callers degrade gracefully rather than dropping the item.
pub async fn respond_parsed<T: DeserializeOwned>(
    client: &dyn LmClient,
    req: &ResponseRequest,
) -> Result<(LmOutput<T>, ModelTurn)> {
    let mut last_turn: Option<ModelTurn> = None;

    for attempt in 1..=MAX_VALIDATION_RETRIES {
        let turn = client.respond(req).await?;

        if let Some(parsed) = &turn.parsed {
            match serde_json::from_value::<T>(parsed.clone()) {
                Ok(value) => return Ok((LmOutput::Parsed(value), turn)),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max = MAX_VALIDATION_RETRIES,
                        error = %e,
                        "structured output failed validation; retrying"
                    );
                }
            }
        } else {
            tracing::warn!(attempt, max = MAX_VALIDATION_RETRIES, "no structured output; retrying");
        }

        last_turn = Some(turn);
        if attempt < MAX_VALIDATION_RETRIES {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    let turn = last_turn.unwrap_or_default();
    Ok((LmOutput::Unparsed(turn.output_text.clone()), turn))
}

async fn log_error_file(client: &dyn LmClient, error_file_id: &str) {
    match client.download_file(error_file_id).await {
        Ok(text) => {
            let head: Vec<&str> = text.lines().take(5).collect();
            tracing::warn!(error_file_id, head = %head.join("\n"), "bulk job produced per-record errors");
        }
        Err(e) => tracing::warn!(error_file_id, error = %e, "failed to read batch error file"),
    }
}
