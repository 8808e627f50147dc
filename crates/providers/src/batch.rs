//! Bulk request/response line formats (newline-delimited JSON).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cw_domain::Result;

/// Responses-API endpoint used for bulk verification requests.
pub const RESPONSES_ENDPOINT: &str = "/v1/responses";
/// Chat-completions endpoint used for bulk enrichment/extraction requests.
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

/// One submitted request line. `custom_id` is the idempotency key that
/// maps results (and failover re-submissions) back to their source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: Value,
}

impl BatchRequestLine {
    pub fn new(custom_id: impl Into<String>, endpoint: &str, body: Value) -> BatchRequestLine {
        BatchRequestLine {
            custom_id: custom_id.into(),
            method: "POST".into(),
            url: endpoint.into(),
            body,
        }
    }
}

/// One downloaded result line. Exactly one of `response`/`error` is
/// meaningful; per-record errors never abort the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutputLine {
    #[serde(default)]
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BatchOutputLine {
    /// The response body, when the record succeeded with HTTP 200.
    pub fn success_body(&self) -> Option<&Value> {
        let response = self.response.as_ref()?;
        if response.get("status_code").and_then(Value::as_u64) != Some(200) {
            return None;
        }
        response.get("body")
    }
}

/// Serialize request lines as JSONL.
pub fn to_jsonl<T: Serialize>(lines: &[T]) -> Result<String> {
    let mut out = String::new();
    for line in lines {
        out.push_str(&serde_json::to_string(line)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse downloaded JSONL output, skipping blank and malformed lines.
pub fn parse_output_lines(text: &str) -> Vec<BatchOutputLine> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| match serde_json::from_str::<BatchOutputLine>(l) {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed batch output line");
                None
            }
        })
        .collect()
}
