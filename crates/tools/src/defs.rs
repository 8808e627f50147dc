//! Function-tool definitions and dispatch.
//!
//! Tool results are JSON values appended to the conversation as
//! `function_call_output` items by the research loop. Only page fetches
//! count toward the deduplicated `sources` list; search results alone do
//! not.

use chrono::NaiveDate;
use serde_json::{json, Value};

use cw_store::Stores;

use crate::fetch::{fetch_url, FetchCache};
use crate::internal::internal_search;
use crate::search::{news_search, web_search, SearchHit};

/// The bounded toolset a caller can expose to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSet {
    WebSearch,
    NewsSearch,
    FetchUrl,
    InternalSearch,
}

impl ToolSet {
    pub fn name(self) -> &'static str {
        match self {
            ToolSet::WebSearch => "web_search",
            ToolSet::NewsSearch => "news_search",
            ToolSet::FetchUrl => "fetch_url",
            ToolSet::InternalSearch => "internal_search",
        }
    }
}

/// The default toolset for verification research.
pub const DEFAULT_TOOLS: [ToolSet; 3] = [ToolSet::WebSearch, ToolSet::NewsSearch, ToolSet::FetchUrl];

/// Shared state the tools run against.
pub struct ToolContext {
    pub http: reqwest::Client,
    /// Present when the internal-search tool is exposed.
    pub stores: Option<Stores>,
    pub fetch_cache: FetchCache,
}

impl ToolContext {
    pub fn new(stores: Option<Stores>) -> ToolContext {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        ToolContext {
            http,
            stores,
            fetch_cache: FetchCache::default(),
        }
    }
}

fn search_def(name: &str, description: &str) -> Value {
    json!({
        "type": "function",
        "name": name,
        "description": description,
        "strict": true,
        "parameters": {
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural language query" },
                "max_results": { "type": ["integer", "null"], "minimum": 1, "maximum": 25 },
            },
            "required": ["query", "max_results"],
            "additionalProperties": false,
        },
    })
}

/// Build the function-tool definitions for the selected toolset.
pub fn tool_definitions(tools: &[ToolSet]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| match tool {
            ToolSet::WebSearch => search_def(
                "web_search",
                "Search the public web for a query and return relevant links with snippets.",
            ),
            ToolSet::NewsSearch => search_def(
                "news_search",
                "Search recent news coverage for a query and return relevant links with snippets.",
            ),
            ToolSet::FetchUrl => json!({
                "type": "function",
                "name": "fetch_url",
                "description": "Fetch the readable content of a URL and return plain text.",
                "strict": true,
                "parameters": {
                    "type": "object",
                    "properties": {
                        "url": { "type": "string", "description": "URL to fetch" },
                        "max_chars": { "type": ["integer", "null"], "minimum": 500, "maximum": 200000 },
                    },
                    "required": ["url", "max_chars"],
                    "additionalProperties": false,
                },
            }),
            ToolSet::InternalSearch => json!({
                "type": "function",
                "name": "internal_search",
                "description": "Search the internal article and claim corpus. Matched claims \
                                include their most recent verification verdict.",
                "strict": true,
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Text to match" },
                        "date_from": { "type": ["string", "null"], "description": "ISO date lower bound" },
                        "date_to": { "type": ["string", "null"], "description": "ISO date upper bound" },
                    },
                    "required": ["query", "date_from", "date_to"],
                    "additionalProperties": false,
                },
            }),
        })
        .collect()
}

/// Whether results from this tool contribute to the `sources` list.
pub fn counts_as_source(tool_name: &str) -> bool {
    tool_name == "fetch_url"
}

fn hits_json(hits: Vec<SearchHit>) -> Value {
    json!({ "results": hits })
}

fn parse_date_arg(args: &Value, key: &str) -> Option<NaiveDate> {
    args.get(key)
        .and_then(Value::as_str)
        .and_then(cw_domain::dates::coerce_date)
}

/// Execute one tool call. Unknown tools and bad arguments come back as
/// error payloads for the model, never as process failures.
pub async fn dispatch(ctx: &ToolContext, name: &str, args: &Value) -> Value {
    match name {
        "web_search" | "news_search" => {
            let query = args.get("query").and_then(Value::as_str).unwrap_or("").trim();
            if query.is_empty() {
                return json!({ "error": "missing query" });
            }
            let max_results = args
                .get("max_results")
                .and_then(Value::as_u64)
                .unwrap_or(5)
                .clamp(1, 25) as usize;
            let hits = if name == "web_search" {
                web_search(&ctx.http, query, max_results).await
            } else {
                news_search(&ctx.http, query, max_results).await
            };
            hits_json(hits)
        }
        "fetch_url" => {
            let url = args.get("url").and_then(Value::as_str).unwrap_or("");
            if url.is_empty() {
                return json!({ "error": "missing url" });
            }
            let max_chars = args
                .get("max_chars")
                .and_then(Value::as_u64)
                .unwrap_or(50_000) as usize;
            fetch_url(&ctx.http, &ctx.fetch_cache, url, max_chars).await
        }
        "internal_search" => {
            let Some(stores) = &ctx.stores else {
                return json!({ "error": "internal search is not available here" });
            };
            let query = args.get("query").and_then(Value::as_str).unwrap_or("");
            let from = parse_date_arg(args, "date_from");
            let to = parse_date_arg(args, "date_to");
            internal_search(stores, query, from, to, 20)
        }
        other => json!({ "error": format!("Unknown tool {other}") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_strict_and_closed() {
        let defs = tool_definitions(&[
            ToolSet::WebSearch,
            ToolSet::NewsSearch,
            ToolSet::FetchUrl,
            ToolSet::InternalSearch,
        ]);
        assert_eq!(defs.len(), 4);
        for def in &defs {
            assert_eq!(def["strict"], json!(true));
            assert_eq!(def["parameters"]["additionalProperties"], json!(false));
            let props = def["parameters"]["properties"].as_object().unwrap();
            let required = def["parameters"]["required"].as_array().unwrap();
            assert_eq!(props.len(), required.len());
        }
    }

    #[test]
    fn only_fetch_counts_as_source() {
        assert!(counts_as_source("fetch_url"));
        assert!(!counts_as_source("web_search"));
        assert!(!counts_as_source("news_search"));
        assert!(!counts_as_source("internal_search"));
    }

    #[tokio::test]
    async fn unknown_tool_reports_error() {
        let ctx = ToolContext::new(None);
        let out = dispatch(&ctx, "nope", &json!({})).await;
        assert!(out["error"].as_str().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn internal_search_requires_stores() {
        let ctx = ToolContext::new(None);
        let out = dispatch(&ctx, "internal_search", &json!({"query": "x"})).await;
        assert!(out.get("error").is_some());
    }

    #[tokio::test]
    async fn missing_query_is_a_tool_error() {
        let ctx = ToolContext::new(None);
        let out = dispatch(&ctx, "web_search", &json!({"max_results": 3})).await;
        assert_eq!(out, json!({ "error": "missing query" }));
    }
}
