//! Shared test support: a scripted in-memory provider that exercises
//! both dispatcher modes without a network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{json, Value};

use cw_domain::dates::now_fixed;
use cw_domain::model::{Article, Claim, ClaimPriority, ClaimType, DocId};
use cw_domain::Result;
use cw_providers::{BatchJob, BatchStatus, LmClient, ModelTurn, ResponseRequest, TokenUsage};

pub type BodyFn = Box<dyn Fn(&Value) -> Value + Send + Sync>;
pub type RespondFn = Box<dyn Fn(&ResponseRequest) -> ModelTurn + Send + Sync>;

/// Scripted provider. Bulk jobs answer each uploaded request line through
/// `bulk_responder`; synchronous calls go through `responder`. With
/// `stall` set, bulk jobs never advance, driving the watchdog failover.
pub struct StubLm {
    pub bulk_responder: BodyFn,
    pub responder: RespondFn,
    pub stall: bool,
    files: Mutex<HashMap<String, String>>,
    batches: Mutex<HashMap<String, String>>,
    counter: AtomicU64,
    pub respond_calls: AtomicU64,
}

impl StubLm {
    pub fn new(bulk_responder: BodyFn, responder: RespondFn) -> StubLm {
        StubLm {
            bulk_responder,
            responder,
            stall: false,
            files: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            respond_calls: AtomicU64::new(0),
        }
    }

    pub fn stalled(bulk_responder: BodyFn, responder: RespondFn) -> StubLm {
        let mut stub = Self::new(bulk_responder, responder);
        stub.stall = true;
        stub
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl LmClient for StubLm {
    async fn respond(&self, req: &ResponseRequest) -> Result<ModelTurn> {
        self.respond_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.responder)(req))
    }

    async fn upload_batch_input(&self, jsonl: &str) -> Result<String> {
        let id = self.next_id("file");
        self.files.lock().insert(id.clone(), jsonl.to_string());
        Ok(id)
    }

    async fn create_batch(&self, input_file_id: &str, _endpoint: &str) -> Result<String> {
        let id = self.next_id("batch");
        self.batches.lock().insert(id.clone(), input_file_id.to_string());
        Ok(id)
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob> {
        let file_id = self.batches.lock().get(batch_id).cloned().unwrap_or_default();
        let total = self
            .files
            .lock()
            .get(&file_id)
            .map(|jsonl| jsonl.lines().filter(|l| !l.trim().is_empty()).count() as u64)
            .unwrap_or(0);
        if self.stall {
            return Ok(BatchJob {
                id: batch_id.to_string(),
                status: BatchStatus::InProgress,
                completed: 0,
                total,
                output_file_id: None,
                error_file_id: None,
            });
        }
        Ok(BatchJob {
            id: batch_id.to_string(),
            status: BatchStatus::Completed,
            completed: total,
            total,
            output_file_id: Some(format!("out::{batch_id}")),
            error_file_id: None,
        })
    }

    async fn cancel_batch(&self, _batch_id: &str) -> Result<()> {
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<String> {
        let batch_id = file_id.strip_prefix("out::").unwrap_or(file_id);
        let input_file = self.batches.lock().get(batch_id).cloned().unwrap_or_default();
        let jsonl = self.files.lock().get(&input_file).cloned().unwrap_or_default();

        let mut out = String::new();
        for line in jsonl.lines().filter(|l| !l.trim().is_empty()) {
            let request: Value = serde_json::from_str(line).expect("request line is JSON");
            let body = (self.bulk_responder)(&request);
            let record = json!({
                "custom_id": request["custom_id"],
                "response": { "status_code": 200, "body": body },
            });
            out.push_str(&record.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response body builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat-completions body whose content is `payload` serialized.
pub fn chat_body(payload: &Value) -> Value {
    json!({
        "id": "chatcmpl-test",
        "model": "gpt-5-mini",
        "choices": [ { "message": { "content": payload.to_string() } } ],
        "usage": { "prompt_tokens": 100, "completion_tokens": 20 },
    })
}

/// A responses-API body whose output text is `payload` serialized.
pub fn responses_body(payload: &Value) -> Value {
    json!({
        "id": "resp-test",
        "model": "gpt-5-mini",
        "output": [
            { "type": "message", "content": [
                { "type": "output_text", "text": payload.to_string() }
            ] }
        ],
        "usage": { "input_tokens": 100, "output_tokens": 20 },
    })
}

/// A synchronous turn that parsed to `payload`.
pub fn parsed_turn(payload: Value) -> ModelTurn {
    ModelTurn {
        id: "resp-test".into(),
        model: "gpt-5-mini".into(),
        output: vec![json!({
            "type": "message",
            "content": [ { "type": "output_text", "text": payload.to_string() } ],
        })],
        output_text: payload.to_string(),
        parsed: Some(payload),
        usage: TokenUsage { input_tokens: 100, output_tokens: 20 },
    }
}

/// A plain-text synchronous turn.
pub fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        id: "resp-test".into(),
        model: "gpt-5-mini".into(),
        output: vec![json!({
            "type": "message",
            "content": [ { "type": "output_text", "text": text } ],
        })],
        output_text: text.to_string(),
        parsed: None,
        usage: TokenUsage { input_tokens: 100, output_tokens: 20 },
    }
}

/// Route a synchronous request by the name of the schema it binds.
pub fn schema_name(req: &ResponseRequest) -> &str {
    req.schema.as_ref().map(|s| s.name.as_str()).unwrap_or("")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A raw ingested article. Links point at an unroutable local port so
/// accidental fetches fail instantly instead of reaching the network.
pub fn article(slug: &str, date: &str, raw_content: &str) -> Article {
    Article {
        id: DocId::default(),
        title: format!("Press release {slug}"),
        date: chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        ingested_at: now_fixed(),
        link: format!("http://localhost:9/{slug}"),
        tags: vec!["agency".into()],
        raw_content: raw_content.to_string(),
        clean_markdown: None,
        summary_paragraph: None,
        key_takeaways: None,
        priority: None,
        follow_up_questions: None,
        follow_up_question_groups: None,
        follow_up_answers: None,
        enrichment_lm_log: None,
        follow_up_answers_lm_log: None,
        claim_processed: None,
        locks: Default::default(),
    }
}

pub fn statement_claim(text: &str, article_date: &str) -> Claim {
    Claim {
        id: DocId::default(),
        claim: text.to_string(),
        verbatim_claim: format!("\"{text}\""),
        kind: ClaimType::Statement,
        completion_condition: "statement is accurate".into(),
        completion_condition_date: None,
        event_date: None,
        follow_up_worthy: true,
        priority: ClaimPriority::Medium,
        mechanism: None,
        article_date: chrono::NaiveDate::parse_from_str(article_date, "%Y-%m-%d").unwrap(),
        article_id: DocId::from("a-stmt"),
        article_link: "http://localhost:9/a-stmt".into(),
        date_past: false,
    }
}
