//! Page fetching and deterministic HTML conversion.
//!
//! The converter is a single-pass tag scanner: scripts, styles and
//! noscript blocks are dropped, block-level tags break lines, entities are
//! decoded, whitespace is normalized. No headless browser, no external
//! parser — the output only has to be stable and readable, and identical
//! input must always produce identical output (enrichment overwrites the
//! model's markdown with this).

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;

/// In-process URL → text cache shared across tool invocations.
#[derive(Default)]
pub struct FetchCache {
    inner: Mutex<HashMap<String, String>>,
}

impl FetchCache {
    pub fn get(&self, url: &str) -> Option<String> {
        self.inner.lock().get(url).cloned()
    }

    pub fn put(&self, url: &str, text: &str) {
        self.inner.lock().insert(url.to_string(), text.to_string());
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "li"
            | "tr"
            | "br"
            | "article"
            | "section"
            | "header"
            | "footer"
            | "blockquote"
            | "ul"
            | "ol"
            | "table"
    )
}

enum Emit {
    Text,
    Markdown,
}

fn convert_html(html: &str, emit: Emit) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut in_noscript = false;
    let mut tag_buf = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag_lower = tag_buf.to_lowercase();
                let name = tag_lower
                    .trim_start_matches('/')
                    .split([' ', '\t', '\n', '/'])
                    .next()
                    .unwrap_or("");

                match name {
                    "script" => in_script = !tag_lower.starts_with('/'),
                    "style" => in_style = !tag_lower.starts_with('/'),
                    "noscript" => in_noscript = !tag_lower.starts_with('/'),
                    _ => {}
                }

                if is_block_tag(name) && !out.ends_with('\n') {
                    out.push('\n');
                }
                if let Emit::Markdown = emit {
                    if !tag_lower.starts_with('/') {
                        match name {
                            "h1" => out.push_str("# "),
                            "h2" => out.push_str("## "),
                            "h3" => out.push_str("### "),
                            "h4" | "h5" | "h6" => out.push_str("#### "),
                            "li" => out.push_str("- "),
                            _ => {}
                        }
                    }
                }
            }
            _ if in_tag => tag_buf.push(ch),
            _ if in_script || in_style || in_noscript => {}
            _ => out.push(ch),
        }
    }

    let decoded = decode_entities(&out);
    match emit {
        // Tool contract: whitespace-normalized single-line text.
        Emit::Text => decoded.split_whitespace().collect::<Vec<_>>().join(" "),
        // Markdown keeps line structure; blank runs collapse.
        Emit::Markdown => {
            let mut lines: Vec<&str> = Vec::new();
            let mut blank = false;
            for line in decoded.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    if !blank && !lines.is_empty() {
                        lines.push("");
                    }
                    blank = true;
                } else {
                    lines.push(trimmed);
                    blank = false;
                }
            }
            lines.join("\n").trim().to_string()
        }
    }
}

/// HTML to whitespace-normalized plain text (the page-fetch tool contract).
pub fn html_to_text(html: &str) -> String {
    convert_html(html, Emit::Text)
}

/// HTML to minimal markdown: headings and list items keep their markers,
/// block structure becomes line breaks.
pub fn html_to_markdown(html: &str) -> String {
    convert_html(html, Emit::Markdown)
}

/// Fetch a URL and return `{url, text}` or `{url, error}` per the tool
/// contract. Text is truncated to `max_chars`. Successful fetches are
/// cached by URL.
pub async fn fetch_url(
    client: &reqwest::Client,
    cache: &FetchCache,
    url: &str,
    max_chars: usize,
) -> Value {
    if let Some(text) = cache.get(url) {
        return json!({ "url": url, "text": truncate(&text, max_chars) });
    }

    match fetch_text(client, url).await {
        Ok(text) => {
            cache.put(url, &text);
            json!({ "url": url, "text": truncate(&text, max_chars) })
        }
        Err(e) => json!({ "url": url, "error": e }),
    }
}

/// Fetch a URL and convert to markdown, for the enrichment stage. Falls
/// back to `fallback` (the stored raw content) when the fetch fails.
pub async fn fetch_markdown(client: &reqwest::Client, url: &str, fallback: &str) -> String {
    match fetch_html(client, url).await {
        Ok(html) => {
            let md = html_to_markdown(&html);
            if md.trim().is_empty() {
                fallback.to_string()
            } else {
                md
            }
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "markdown fetch failed; using stored content");
            fallback.to_string()
        }
    }
}

async fn fetch_html(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let resp = client
        .get(url)
        .header("User-Agent", "Mozilla/5.0")
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    resp.text().await.map_err(|e| e.to_string())
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, String> {
    fetch_html(client, url).await.map(|html| html_to_text(&html))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
