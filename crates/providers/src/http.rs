//! HTTP adapter for an OpenAI-compatible provider.
//!
//! Speaks three endpoint families: `/responses` for synchronous
//! structured-output calls, `/files` for batch artifacts, and `/batches`
//! for the bulk-async workflow. Everything above [`LmClient`] is wire
//! agnostic.

use serde_json::Value;

use cw_domain::config::Config;
use cw_domain::{Error, Result};

use crate::traits::{BatchJob, BatchStatus, LmClient, ModelTurn, ResponseRequest, TokenUsage};
use crate::util::from_reqwest;

pub struct HttpLmClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpLmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<HttpLmClient> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(from_reqwest)?;
        Ok(HttpLmClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<HttpLmClient> {
        Self::new(cfg.llm_base_url.clone(), cfg.llm_api_key.clone())
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .authed(self.client.get(url))
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::json_or_error(resp).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .authed(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::json_or_error(resp).await
    }

    async fn json_or_error(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "llm".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Build the responses-API wire body for a request. Also used to shape
/// bulk request lines, so Mode A and Mode B submit byte-identical bodies.
pub fn response_request_body(req: &ResponseRequest) -> Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "input": req.input,
    });
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(req.tools.clone());
    }
    if let Some(choice) = &req.tool_choice {
        body["tool_choice"] = Value::String(choice.clone());
    }
    if !req.include.is_empty() {
        body["include"] = serde_json::json!(req.include);
    }
    if let Some(binding) = &req.schema {
        body["text"] = serde_json::json!({
            "format": {
                "type": "json_schema",
                "name": binding.name,
                "schema": binding.schema,
                "strict": true,
            }
        });
    }
    if let Some(effort) = &req.reasoning_effort {
        body["reasoning"] = serde_json::json!({ "effort": effort });
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Concatenate the assistant text from raw output items.
pub fn extract_output_text(output: &[Value]) -> String {
    let mut chunks: Vec<&str> = Vec::new();
    for item in output {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        match item.get("content") {
            Some(Value::Array(parts)) => {
                for part in parts {
                    if part.get("type").and_then(Value::as_str) == Some("output_text") {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            chunks.push(text);
                        }
                    }
                }
            }
            Some(Value::String(text)) => chunks.push(text),
            _ => {}
        }
    }
    chunks.join("\n").trim().to_string()
}

fn parse_usage(body: &Value) -> TokenUsage {
    let usage = body.get("usage");
    TokenUsage {
        input_tokens: usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}

/// Decode a responses-API body into a [`ModelTurn`]. `bind_schema` controls
/// whether the output text is additionally decoded as JSON.
pub fn parse_model_turn(body: &Value, bind_schema: bool) -> ModelTurn {
    let output = body
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let output_text = extract_output_text(&output);
    let parsed = if bind_schema && !output_text.is_empty() {
        serde_json::from_str(&output_text).ok()
    } else {
        None
    };
    ModelTurn {
        id: body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        output,
        output_text,
        parsed,
        usage: parse_usage(body),
    }
}

fn parse_batch_job(body: &Value) -> BatchJob {
    let counts = body.get("request_counts");
    let completed = counts
        .and_then(|c| c.get("completed").or_else(|| c.get("succeeded")))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total = counts
        .and_then(|c| c.get("total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    BatchJob {
        id: body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: BatchStatus::from_wire(
            body.get("status").and_then(Value::as_str).unwrap_or(""),
        ),
        completed,
        total,
        output_file_id: body
            .get("output_file_id")
            .and_then(Value::as_str)
            .map(String::from),
        error_file_id: body
            .get("error_file_id")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LmClient for HttpLmClient {
    async fn respond(&self, req: &ResponseRequest) -> Result<ModelTurn> {
        let url = format!("{}/responses", self.base_url);
        let body = response_request_body(req);
        tracing::debug!(model = %req.model, "responses request");
        let resp = self.post_json(&url, &body).await?;
        Ok(parse_model_turn(&resp, req.schema.is_some()))
    }

    async fn upload_batch_input(&self, jsonl: &str) -> Result<String> {
        let url = format!("{}/files", self.base_url);
        let part = reqwest::multipart::Part::text(jsonl.to_string())
            .file_name("batch.jsonl")
            .mime_str("application/jsonl")
            .map_err(from_reqwest)?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);
        let resp = self
            .authed(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;
        let body = Self::json_or_error(resp).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| Error::Provider {
                provider: "llm".into(),
                message: "file upload returned no id".into(),
            })
    }

    async fn create_batch(&self, input_file_id: &str, endpoint: &str) -> Result<String> {
        let url = format!("{}/batches", self.base_url);
        let body = serde_json::json!({
            "input_file_id": input_file_id,
            "endpoint": endpoint,
            "completion_window": "24h",
            "metadata": { "job": "pipeline" },
        });
        let resp = self.post_json(&url, &body).await?;
        resp.get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| Error::Provider {
                provider: "llm".into(),
                message: "batch create returned no id".into(),
            })
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob> {
        let url = format!("{}/batches/{batch_id}", self.base_url);
        Ok(parse_batch_job(&self.get_json(&url).await?))
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        let url = format!("{}/batches/{batch_id}/cancel", self.base_url);
        self.post_json(&url, &serde_json::json!({})).await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<String> {
        let url = format!("{}/files/{file_id}/content", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "llm".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_text_from_message_items() {
        let output = vec![
            json!({"type": "function_call", "name": "web_search", "arguments": "{}"}),
            json!({"type": "message", "content": [
                {"type": "output_text", "text": "first"},
                {"type": "output_text", "text": "second"},
            ]}),
        ];
        assert_eq!(extract_output_text(&output), "first\nsecond");
    }

    #[test]
    fn parses_turn_with_schema_binding() {
        let body = json!({
            "id": "resp_1",
            "model": "gpt-5-mini",
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"verdict\": \"complete\"}"}
                ]}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 3},
        });
        let turn = parse_model_turn(&body, true);
        assert_eq!(turn.id, "resp_1");
        assert_eq!(turn.parsed, Some(json!({"verdict": "complete"})));
        assert_eq!(turn.usage.input_tokens, 10);
        assert_eq!(turn.usage.output_tokens, 3);

        let unbound = parse_model_turn(&body, false);
        assert!(unbound.parsed.is_none());
    }

    #[test]
    fn batch_job_progress_and_terminal_states() {
        let body = json!({
            "id": "batch_1",
            "status": "in_progress",
            "request_counts": {"total": 50, "completed": 10},
        });
        let job = parse_batch_job(&body);
        assert_eq!(job.status, BatchStatus::InProgress);
        assert_eq!(job.progress(), Some(0.2));
        assert!(!job.status.is_terminal());

        for (wire, status) in [
            ("completed", BatchStatus::Completed),
            ("expired", BatchStatus::Expired),
            ("cancelled", BatchStatus::Cancelled),
            ("failed", BatchStatus::Failed),
        ] {
            assert_eq!(BatchStatus::from_wire(wire), status);
            assert!(status.is_terminal());
        }
        assert_eq!(BatchStatus::from_wire("validating"), BatchStatus::InProgress);
    }

    #[test]
    fn schema_binding_shapes_request_body() {
        let req = ResponseRequest::text("gpt-5-mini", "hello").with_schema(
            "Out",
            json!({"type": "object", "properties": {}, "required": [], "additionalProperties": false}),
        );
        let body = response_request_body(&req);
        assert_eq!(body["text"]["format"]["type"], json!("json_schema"));
        assert_eq!(body["text"]["format"]["name"], json!("Out"));
        assert_eq!(body["text"]["format"]["strict"], json!(true));
        assert!(body.get("tools").is_none());
    }
}
