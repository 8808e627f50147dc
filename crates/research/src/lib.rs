//! The agentic research loop.
//!
//! Two strictly separate phases: a tool loop that lets the model search
//! and fetch freely (no schema binding, so tools can iterate), and a
//! parse-only pass that binds the accumulated conversation to the
//! requested structured type. Page fetches feed a deduplicated source
//! list; search results alone do not count as sources.
//!
//! Bounds: at most [`MAX_TURNS`] tool turns per attempt, at most
//! [`MAX_ATTEMPTS`] whole-loop retries when the final text comes back
//! empty, one explicit finalize prompt before giving up on an attempt.

use serde_json::{json, Value};

use cw_domain::model::LmLog;
use cw_domain::Result;
use cw_providers::{compact_outline, LmClient, ModelTurn, ResponseRequest, SchemaBinding};
use cw_tools::{counts_as_source, dispatch, tool_definitions, ToolContext, ToolSet};

/// Maximum tool-loop turns before the loop is forced to finalize.
pub const MAX_TURNS: usize = 8;
/// Whole-loop retries on empty final output.
pub const MAX_ATTEMPTS: usize = 3;

const SYSTEM_PROMPT: &str = "\
You are an expert news analyst and researcher.
The system will give a well-defined task. Use your available tools to complete the task as described.
This task is automatic: do not ask clarifying questions, engage in further discussion, or prompt the system for more information.
Provide a comprehensive report that fully meets the instructions. Do not include suggestions for next steps or use conversational language.";

/// Input to one research run.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub input: String,
    pub model: String,
    pub reasoning_effort: Option<String>,
    /// Task-specific system prompt layered under the standing directives.
    pub task_system: Option<String>,
    pub tools: Vec<ToolSet>,
    /// When set, the parse phase binds the conversation to this schema.
    pub schema: Option<SchemaBinding>,
}

/// A deduplicated evidence source (currently only fetched pages).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Result of a research run.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub text: String,
    pub parsed: Option<Value>,
    pub sources: Vec<Source>,
    pub conversation: Vec<Value>,
    pub lm_log: Option<LmLog>,
}

fn add_source(sources: &mut Vec<Source>, result: &Value) {
    let Some(url) = result.get("url").and_then(Value::as_str) else {
        return;
    };
    if result.get("error").is_some() || sources.iter().any(|s| s.url == url) {
        return;
    }
    let snippet: String = result
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .take(200)
        .collect();
    sources.push(Source {
        title: url.to_string(),
        url: url.to_string(),
        snippet,
    });
}

fn base_conversation(req: &ResearchRequest) -> Vec<Value> {
    let mut conversation = match &req.task_system {
        Some(task_system) if !task_system.trim().is_empty() => vec![
            json!({ "role": "developer", "content": SYSTEM_PROMPT }),
            json!({ "role": "system", "content": task_system.trim() }),
        ],
        _ => vec![json!({ "role": "system", "content": SYSTEM_PROMPT })],
    };
    conversation.push(json!({ "role": "user", "content": req.input }));
    conversation
}

fn request_for(req: &ResearchRequest, conversation: &[Value], tools: &[Value]) -> ResponseRequest {
    ResponseRequest {
        model: req.model.clone(),
        input: conversation.to_vec(),
        tools: tools.to_vec(),
        tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
        include: Vec::new(),
        schema: None,
        reasoning_effort: req.reasoning_effort.clone(),
    }
}

/// Phase 1: run the tool loop, mutating the conversation and source list.
/// Returns the last model turn.
async fn tool_phase(
    client: &dyn LmClient,
    ctx: &ToolContext,
    req: &ResearchRequest,
    conversation: &mut Vec<Value>,
    sources: &mut Vec<Source>,
    lm_log: &mut Option<LmLog>,
) -> Result<ModelTurn> {
    let tools = tool_definitions(&req.tools);
    let mut last_turn = ModelTurn::default();

    for turn_idx in 0..MAX_TURNS {
        let turn = client
            .respond(&request_for(req, conversation, &tools))
            .await?;
        if lm_log.is_none() {
            *lm_log = Some(turn.lm_log("research::run_with_search"));
        }
        conversation.extend(turn.output.iter().cloned());

        let mut had_tool_call = false;
        for item in &turn.output {
            if item.get("type").and_then(Value::as_str) != Some("function_call") {
                continue;
            }
            had_tool_call = true;
            let name = item.get("name").and_then(Value::as_str).unwrap_or("");
            let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or("");
            let args: Value = item
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| json!({}));

            tracing::debug!(turn = turn_idx, tool = name, "tool call");
            let result = dispatch(ctx, name, &args).await;
            if counts_as_source(name) {
                add_source(sources, &result);
            }
            conversation.push(json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": result.to_string(),
            }));
        }

        last_turn = turn;
        if !had_tool_call {
            break;
        }
    }

    Ok(last_turn)
}

/// Phase 2: bind the accumulated conversation to the requested schema.
async fn parse_phase(
    client: &dyn LmClient,
    req: &ResearchRequest,
    conversation: &[Value],
    binding: &SchemaBinding,
    lm_log: &mut Option<LmLog>,
) -> Option<Value> {
    let outline = compact_outline(&binding.schema);
    let mut input = conversation.to_vec();
    input.push(json!({
        "role": "user",
        "content": format!(
            "Return ONLY the requested structured output using the conversation above. \
             Match this structure and type hints; do not include prose outside it.\n{outline}"
        ),
    }));

    let parse_req = ResponseRequest {
        model: req.model.clone(),
        input,
        schema: Some(binding.clone()),
        reasoning_effort: req.reasoning_effort.clone(),
        ..Default::default()
    };
    match client.respond(&parse_req).await {
        Ok(turn) => {
            if turn.parsed.is_some() {
                *lm_log = Some(turn.lm_log("research::parse"));
            }
            turn.parsed
        }
        Err(e) => {
            tracing::warn!(error = %e, "structured parse pass failed; falling back to text");
            None
        }
    }
}

/// One explicit "answer as text, no tools" nudge for attempts whose tool
/// loop ended with empty output.
async fn finalize_phase(
    client: &dyn LmClient,
    req: &ResearchRequest,
    conversation: &mut Vec<Value>,
    lm_log: &mut Option<LmLog>,
) -> Result<String> {
    conversation.push(json!({
        "role": "user",
        "content": "Provide the final answer now as text. Do not call tools.",
    }));
    let finalize_req = ResponseRequest {
        model: req.model.clone(),
        input: conversation.clone(),
        reasoning_effort: req.reasoning_effort.clone(),
        ..Default::default()
    };
    let turn = client.respond(&finalize_req).await?;
    conversation.extend(turn.output.iter().cloned());
    *lm_log = Some(turn.lm_log("research::finalize"));
    Ok(turn.output_text)
}

/// Run the research loop. See the module docs for the protocol.
pub async fn run_with_search(
    client: &dyn LmClient,
    ctx: &ToolContext,
    req: &ResearchRequest,
) -> Result<SearchOutcome> {
    let mut last_outcome = SearchOutcome::default();

    for attempt in 1..=MAX_ATTEMPTS {
        let mut conversation = base_conversation(req);
        let mut sources: Vec<Source> = Vec::new();
        let mut lm_log: Option<LmLog> = None;

        let last_turn = tool_phase(client, ctx, req, &mut conversation, &mut sources, &mut lm_log).await?;
        let mut final_text = last_turn.output_text.clone();

        let mut parsed = match &req.schema {
            Some(binding) => parse_phase(client, req, &conversation, binding, &mut lm_log).await,
            None => None,
        };

        // Empty text with no parse: nudge once, then re-parse.
        if final_text.trim().is_empty() && parsed.is_none() {
            match finalize_phase(client, req, &mut conversation, &mut lm_log).await {
                Ok(text) => {
                    final_text = text;
                    if let Some(binding) = &req.schema {
                        parsed = parse_phase(client, req, &conversation, binding, &mut lm_log).await;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "finalize prompt failed"),
            }
        }

        let outcome = SearchOutcome {
            text: final_text.trim().to_string(),
            parsed,
            sources,
            conversation,
            lm_log,
        };

        if outcome.parsed.is_some() || !outcome.text.is_empty() {
            return Ok(outcome);
        }

        tracing::warn!(attempt, max = MAX_ATTEMPTS, "empty research output; retrying loop");
        last_outcome = outcome;
    }

    Ok(last_outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_domain::Result;
    use cw_providers::{BatchJob, TokenUsage};
    use parking_lot::Mutex;

    /// Scripted LmClient: pops canned turns in order.
    struct ScriptedLm {
        turns: Mutex<Vec<ModelTurn>>,
        calls: Mutex<Vec<ResponseRequest>>,
    }

    impl ScriptedLm {
        fn new(turns: Vec<ModelTurn>) -> Self {
            ScriptedLm {
                turns: Mutex::new(turns),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LmClient for ScriptedLm {
        async fn respond(&self, req: &ResponseRequest) -> Result<ModelTurn> {
            self.calls.lock().push(req.clone());
            let mut turns = self.turns.lock();
            if turns.is_empty() {
                return Ok(ModelTurn::default());
            }
            Ok(turns.remove(0))
        }

        async fn upload_batch_input(&self, _jsonl: &str) -> Result<String> {
            unreachable!("research loop never uploads batches")
        }
        async fn create_batch(&self, _f: &str, _e: &str) -> Result<String> {
            unreachable!()
        }
        async fn retrieve_batch(&self, _id: &str) -> Result<BatchJob> {
            unreachable!()
        }
        async fn cancel_batch(&self, _id: &str) -> Result<()> {
            unreachable!()
        }
        async fn download_file(&self, _id: &str) -> Result<String> {
            unreachable!()
        }
    }

    fn text_turn(text: &str) -> ModelTurn {
        ModelTurn {
            id: "resp".into(),
            model: "test".into(),
            output: vec![json!({
                "type": "message",
                "content": [{ "type": "output_text", "text": text }],
            })],
            output_text: text.into(),
            parsed: None,
            usage: TokenUsage::default(),
        }
    }

    fn tool_call_turn(name: &str, args: Value) -> ModelTurn {
        ModelTurn {
            id: "resp".into(),
            model: "test".into(),
            output: vec![json!({
                "type": "function_call",
                "name": name,
                "call_id": "call_1",
                "arguments": args.to_string(),
            })],
            output_text: String::new(),
            parsed: None,
            usage: TokenUsage::default(),
        }
    }

    fn request(schema: Option<SchemaBinding>) -> ResearchRequest {
        ResearchRequest {
            input: "Summarize the rule status.".into(),
            model: "test".into(),
            reasoning_effort: None,
            task_system: None,
            tools: vec![ToolSet::WebSearch],
            schema,
        }
    }

    #[tokio::test]
    async fn plain_text_answer_ends_loop() {
        let lm = ScriptedLm::new(vec![text_turn("the rule was published")]);
        let ctx = ToolContext::new(None);
        let out = run_with_search(&lm, &ctx, &request(None)).await.unwrap();
        assert_eq!(out.text, "the rule was published");
        assert!(out.parsed.is_none());
        assert!(out.sources.is_empty());
        assert_eq!(lm.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn tool_call_gets_output_appended_then_loop_continues() {
        // An unknown tool still produces a function_call_output record.
        let lm = ScriptedLm::new(vec![
            tool_call_turn("no_such_tool", json!({})),
            text_turn("done"),
        ]);
        let ctx = ToolContext::new(None);
        let out = run_with_search(&lm, &ctx, &request(None)).await.unwrap();
        assert_eq!(out.text, "done");

        let calls = lm.calls.lock();
        assert_eq!(calls.len(), 2);
        let followup_input = &calls[1].input;
        assert!(followup_input.iter().any(|item| {
            item.get("type").and_then(Value::as_str) == Some("function_call_output")
                && item.get("call_id").and_then(Value::as_str) == Some("call_1")
        }));
    }

    #[tokio::test]
    async fn parse_phase_binds_schema() {
        let mut parse_turn = text_turn("{\"title\": \"T\", \"text\": \"B\"}");
        parse_turn.parsed = Some(json!({"title": "T", "text": "B"}));
        let lm = ScriptedLm::new(vec![text_turn("narrative"), parse_turn]);
        let ctx = ToolContext::new(None);
        let binding = SchemaBinding {
            name: "Out".into(),
            schema: json!({"type": "object", "properties": {"title": {"type": "string"}}}),
        };
        let out = run_with_search(&lm, &ctx, &request(Some(binding))).await.unwrap();
        assert_eq!(out.parsed, Some(json!({"title": "T", "text": "B"})));
        assert_eq!(out.text, "narrative");

        // The parse call must carry the schema; the tool call must not.
        let calls = lm.calls.lock();
        assert!(calls[0].schema.is_none());
        assert!(calls[1].schema.is_some());
    }

    #[tokio::test]
    async fn empty_output_triggers_finalize_prompt() {
        let lm = ScriptedLm::new(vec![text_turn(""), text_turn("recovered answer")]);
        let ctx = ToolContext::new(None);
        let out = run_with_search(&lm, &ctx, &request(None)).await.unwrap();
        assert_eq!(out.text, "recovered answer");

        let calls = lm.calls.lock();
        let finalize_input = &calls[1].input;
        let last = finalize_input.last().unwrap();
        assert!(last["content"]
            .as_str()
            .unwrap()
            .contains("Do not call tools"));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        // Every attempt: empty tool turn + empty finalize = 2 calls/attempt.
        let lm = ScriptedLm::new(vec![]);
        let ctx = ToolContext::new(None);
        let out = run_with_search(&lm, &ctx, &request(None)).await.unwrap();
        assert!(out.text.is_empty());
        assert_eq!(lm.calls.lock().len(), MAX_ATTEMPTS * 2);
    }

    #[test]
    fn sources_dedupe_by_url_and_skip_errors() {
        let mut sources = Vec::new();
        add_source(&mut sources, &json!({"url": "https://a.gov", "text": "body"}));
        add_source(&mut sources, &json!({"url": "https://a.gov", "text": "again"}));
        add_source(&mut sources, &json!({"url": "https://b.gov", "error": "boom"}));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://a.gov");
    }
}
