use serde::{Deserialize, Serialize};
use serde_json::Value;

use cw_domain::model::LmLog;
use cw_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named JSON schema the response must conform to. Schemas are passed
/// through the strict sanitizer before they reach the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaBinding {
    pub name: String,
    pub schema: Value,
}

/// A provider-agnostic synchronous model request (Mode B and the tool
/// loop both speak this).
#[derive(Debug, Clone, Default)]
pub struct ResponseRequest {
    pub model: String,
    /// Conversation items in the provider's input shape: role messages,
    /// model output items, and `function_call_output` records.
    pub input: Vec<Value>,
    /// Function-tool definitions the model may invoke.
    pub tools: Vec<Value>,
    pub tool_choice: Option<String>,
    /// Extra response content to request (e.g. search sources).
    pub include: Vec<String>,
    /// When set, the response binds to this schema and `ModelTurn::parsed`
    /// carries the decoded object.
    pub schema: Option<SchemaBinding>,
    pub reasoning_effort: Option<String>,
}

impl ResponseRequest {
    /// A single-user-message request.
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> ResponseRequest {
        ResponseRequest {
            model: model.into(),
            input: vec![serde_json::json!({ "role": "user", "content": prompt.into() })],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> ResponseRequest {
        self.input.insert(
            0,
            serde_json::json!({ "role": "system", "content": system.into() }),
        );
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> ResponseRequest {
        self.schema = Some(SchemaBinding {
            name: name.into(),
            schema,
        });
        self
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completed model call.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub id: String,
    pub model: String,
    /// Raw output items, appendable to a conversation as-is.
    pub output: Vec<Value>,
    /// Concatenated assistant text.
    pub output_text: String,
    /// Decoded structured output when the request bound a schema and the
    /// text parsed as JSON.
    pub parsed: Option<Value>,
    pub usage: TokenUsage,
}

impl ModelTurn {
    /// Provenance record for whatever this call produced.
    pub fn lm_log(&self, called_from: &str) -> LmLog {
        LmLog {
            api_type: "responses".into(),
            call_id: self.id.clone(),
            called_from: called_from.into(),
            model_name: self.model.clone(),
            system_tokens: 0,
            user_tokens: self.usage.input_tokens,
            response_tokens: self.usage.output_tokens,
        }
    }
}

/// Either a validated structured result or the raw narrative text when
/// validation kept failing. Callers branch: `Parsed` flows straight into
/// typed logic, `Unparsed` goes through the heuristic classifier.
#[derive(Debug, Clone)]
pub enum LmOutput<T> {
    Parsed(T),
    Unparsed(String),
}

impl<T> LmOutput<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            LmOutput::Parsed(t) => Some(t),
            LmOutput::Unparsed(_) => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch job state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    InProgress,
    Completed,
    Expired,
    Cancelled,
    Failed,
}

impl BatchStatus {
    /// Map the provider's status string; anything unknown counts as still
    /// running so the watchdog keeps polling.
    pub fn from_wire(s: &str) -> BatchStatus {
        match s {
            "completed" => BatchStatus::Completed,
            "expired" => BatchStatus::Expired,
            "cancelled" | "cancelling" => BatchStatus::Cancelled,
            "failed" => BatchStatus::Failed,
            _ => BatchStatus::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::InProgress)
    }
}

/// Snapshot of a bulk job, as returned by `retrieve_batch`.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    pub completed: u64,
    pub total: u64,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
}

impl BatchJob {
    /// Completion ratio, when the total is known.
    pub fn progress(&self) -> Option<f64> {
        (self.total > 0).then(|| self.completed as f64 / self.total as f64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The provider capabilities the engine requires: a synchronous
/// structured-output call, and the bulk-async workflow (upload request
/// lines, create a job, poll it, download per-request results).
///
/// Implementations are wire adapters; everything above this trait is
/// provider-agnostic, and tests substitute a stub.
#[async_trait::async_trait]
pub trait LmClient: Send + Sync {
    /// One synchronous model call.
    async fn respond(&self, req: &ResponseRequest) -> Result<ModelTurn>;

    /// Upload newline-delimited request lines; returns the input artifact id.
    async fn upload_batch_input(&self, jsonl: &str) -> Result<String>;

    /// Submit a bulk job over a previously uploaded artifact (24h window);
    /// returns the batch id.
    async fn create_batch(&self, input_file_id: &str, endpoint: &str) -> Result<String>;

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob>;

    async fn cancel_batch(&self, batch_id: &str) -> Result<()>;

    /// Fetch the content of an output/error artifact.
    async fn download_file(&self, file_id: &str) -> Result<String>;
}
