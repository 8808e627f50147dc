//! Per-task model selection.
//!
//! A static, total table maps `{task, difficulty}` to a model and
//! reasoning effort; a tiny selector model picks the difficulty. Any
//! failure along the way falls back to `medium`.

use serde::Deserialize;

use crate::schema::strict_schema_for;
use crate::traits::{LmClient, ResponseRequest};

/// Model used to pick the difficulty tier.
pub const SELECTOR_MODEL: &str = "gpt-5-nano";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Tool-using research tasks.
    Agent,
    /// Plain transformation/extraction tasks.
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    High,
    Medium,
    Low,
}

/// A concrete model choice: model name plus optional reasoning effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelChoice {
    pub model: &'static str,
    pub effort: Option<&'static str>,
}

/// The selection table. Pure and total: every `(task, difficulty)` pair
/// has an entry.
pub fn model_table(task: TaskKind, difficulty: Difficulty) -> ModelChoice {
    match (task, difficulty) {
        (TaskKind::Agent, Difficulty::High) => ModelChoice { model: "gpt-5-mini", effort: Some("high") },
        (TaskKind::Agent, Difficulty::Medium) => ModelChoice { model: "gpt-5-mini", effort: Some("medium") },
        (TaskKind::Agent, Difficulty::Low) => ModelChoice { model: "gpt-5-nano", effort: Some("low") },
        (TaskKind::Process, Difficulty::High) => ModelChoice { model: "gpt-5-mini", effort: Some("low") },
        (TaskKind::Process, Difficulty::Medium) => ModelChoice { model: "gpt-5-mini", effort: None },
        (TaskKind::Process, Difficulty::Low) => ModelChoice { model: "gpt-5-nano", effort: None },
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SelectorResponse {
    quality: Difficulty,
}

/// Ask the selector model how hard `prompt` is and look the answer up in
/// the table. Falls back to `medium` when the call or the parse fails.
pub async fn select_model(client: &dyn LmClient, task: TaskKind, prompt: &str) -> ModelChoice {
    let task_name = match task {
        TaskKind::Agent => "agent",
        TaskKind::Process => "process",
    };
    let req = ResponseRequest {
        model: SELECTOR_MODEL.into(),
        input: vec![
            serde_json::json!({
                "role": "system",
                "content": "You are a model selection assistant. Given a task description, \
                            select the appropriate model quality level for the task from the \
                            following options: high, medium, low. Respond with only one of \
                            these options.",
            }),
            serde_json::json!({
                "role": "user",
                "content": format!(
                    "Task description: {prompt}\n\nBased on the above task description, select \
                     the appropriate model quality level (high, medium, low) for a {task_name} task."
                ),
            }),
        ],
        schema: Some(crate::traits::SchemaBinding {
            name: "SelectorResponse".into(),
            schema: strict_schema_for::<SelectorResponse>(),
        }),
        ..Default::default()
    };

    let difficulty = match client.respond(&req).await {
        Ok(turn) => turn
            .parsed
            .and_then(|v| serde_json::from_value::<SelectorResponse>(v).ok())
            .map(|r| r.quality)
            .unwrap_or(Difficulty::Medium),
        Err(e) => {
            tracing::warn!(error = %e, "model selector call failed; using medium");
            Difficulty::Medium
        }
    };

    model_table(task, difficulty)
}
