//! LLM dispatcher: the provider seam ([`LmClient`]), the HTTP adapter,
//! the two execution modes (bulk-async with a progress watchdog, and
//! synchronous per-item with bounded parse retries), strict-schema
//! plumbing, and per-task model selection.

pub mod batch;
pub mod dispatcher;
pub mod http;
pub mod model_select;
pub mod schema;
pub mod traits;
mod util;

pub use batch::{BatchOutputLine, BatchRequestLine, CHAT_COMPLETIONS_ENDPOINT, RESPONSES_ENDPOINT};
pub use dispatcher::{respond_parsed, run_bulk, WatchdogConfig, MAX_VALIDATION_RETRIES};
pub use http::{extract_output_text, parse_model_turn, response_request_body, HttpLmClient};
pub use model_select::{model_table, select_model, Difficulty, ModelChoice, TaskKind};
pub use schema::{compact_outline, sanitize_strict, strict_schema_for};
pub use traits::{
    BatchJob, BatchStatus, LmClient, LmOutput, ModelTurn, ResponseRequest, SchemaBinding,
    TokenUsage,
};
