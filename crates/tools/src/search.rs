//! DuckDuckGo-backed web and news search.
//!
//! Scrapes the HTML endpoints (`/html/`, lite fallback) rather than an
//! API. Every outbound query gets `-site:` suffixes for the fixed
//! blacklist of low-quality news domains; user modifiers (`-site:`,
//! quoted phrases, `filetype:`) pass through untouched.

use regex::Regex;
use reqwest::Url;
use serde::Serialize;

use crate::fetch::html_to_text;

/// Domains excluded from every outbound search.
pub const SEARCH_BLACKLIST: [&str; 4] = [
    "prnewswire.com",
    "globenewswire.com",
    "newsbreak.com",
    "msn.com",
];

/// Append `-site:` modifiers for the blacklist.
pub fn apply_blacklist(query: &str) -> String {
    let mut out = query.trim().to_string();
    for domain in SEARCH_BLACKLIST {
        let modifier = format!("-site:{domain}");
        if !out.contains(&modifier) {
            out.push(' ');
            out.push_str(&modifier);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Unwrap DuckDuckGo redirect links (`/l/?uddg=…`) to the target URL and
/// drop DDG-internal links.
fn extract_href(href: &str, base: &Url) -> Option<String> {
    let absolute = if href.starts_with("http://") || href.starts_with("https://") {
        Url::parse(href).ok()?
    } else {
        base.join(href).ok()?
    };

    let host = absolute.host_str()?;
    if host.ends_with("duckduckgo.com") {
        let target = absolute
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?;
        return Some(target);
    }
    Some(absolute.into())
}

fn parse_results(html: &str, base: &Url, max_results: usize) -> Vec<SearchHit> {
    // Anchors carrying result links; titles are the anchor bodies.
    let anchor_re = Regex::new(r#"(?s)<a[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("static regex");
    let snippet_re =
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>|class="result-snippet"[^>]*>(.*?)</td>"#)
            .expect("static regex");

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| html_to_text(m.as_str()))
        .collect();

    let mut hits: Vec<SearchHit> = Vec::new();
    for cap in anchor_re.captures_iter(html) {
        let href = &cap[1];
        let Some(url) = extract_href(href, base) else {
            continue;
        };
        if hits.iter().any(|h| h.url == url) {
            continue;
        }
        let title = html_to_text(&cap[2]);
        if title.is_empty() {
            continue;
        }
        let snippet = snippets.get(hits.len()).cloned().unwrap_or_default();
        hits.push(SearchHit { title, url, snippet });
        if hits.len() >= max_results {
            break;
        }
    }
    hits
}

async fn search_endpoint(
    client: &reqwest::Client,
    endpoint: &str,
    query: &str,
    extra: &str,
    max_results: usize,
) -> Vec<SearchHit> {
    let base = match Url::parse(endpoint) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let url = format!(
        "{endpoint}?q={}{extra}",
        urlencode(query),
    );
    let resp = client
        .get(&url)
        .header("User-Agent", "Mozilla/5.0")
        .send()
        .await;
    match resp {
        Ok(r) if r.status().is_success() => match r.text().await {
            Ok(html) => parse_results(&html, &base, max_results),
            Err(_) => Vec::new(),
        },
        Ok(r) => {
            tracing::debug!(status = r.status().as_u16(), endpoint, "search endpoint refused");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, endpoint, "search request failed");
            Vec::new()
        }
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Web search: blacklist-filtered query against the primary HTML endpoint,
/// lite endpoint as fallback. Best effort — failures return an empty list.
pub async fn web_search(client: &reqwest::Client, query: &str, max_results: usize) -> Vec<SearchHit> {
    let query = apply_blacklist(query);
    let hits = search_endpoint(client, "https://duckduckgo.com/html/", &query, "", max_results).await;
    if !hits.is_empty() {
        return hits;
    }
    search_endpoint(client, "https://lite.duckduckgo.com/lite/", &query, "", max_results).await
}

/// News search: same shape, news-indexed backend.
pub async fn news_search(client: &reqwest::Client, query: &str, max_results: usize) -> Vec<SearchHit> {
    let query = apply_blacklist(query);
    search_endpoint(
        client,
        "https://duckduckgo.com/html/",
        &query,
        "&iar=news&ia=news",
        max_results,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_is_appended_once() {
        let q = apply_blacklist("fema flood rule");
        for domain in SEARCH_BLACKLIST {
            assert!(q.contains(&format!("-site:{domain}")));
        }
        let again = apply_blacklist(&q);
        assert_eq!(q, again);
    }

    #[test]
    fn user_modifiers_pass_through() {
        let q = apply_blacklist("\"flood insurance\" filetype:pdf -site:example.com");
        assert!(q.starts_with("\"flood insurance\" filetype:pdf -site:example.com"));
    }

    #[test]
    fn redirect_links_unwrap_uddg() {
        let base = Url::parse("https://duckduckgo.com/html/").unwrap();
        let href = "/l/?uddg=https%3A%2F%2Fexample.gov%2Frule&rut=abc";
        assert_eq!(
            extract_href(href, &base).as_deref(),
            Some("https://example.gov/rule")
        );
    }

    #[test]
    fn internal_links_without_uddg_are_dropped() {
        let base = Url::parse("https://duckduckgo.com/html/").unwrap();
        assert!(extract_href("/settings", &base).is_none());
        assert!(extract_href("https://duckduckgo.com/about", &base).is_none());
    }

    #[test]
    fn absolute_links_pass_through() {
        let base = Url::parse("https://duckduckgo.com/html/").unwrap();
        assert_eq!(
            extract_href("https://example.gov/rule", &base).as_deref(),
            Some("https://example.gov/rule")
        );
    }

    #[test]
    fn parses_result_anchors() {
        let html = r#"
            <div class="result">
              <a class="result__a" href="/l/?uddg=https%3A%2F%2Fexample.gov%2Fa">Agency <b>rule</b></a>
              <a class="result__snippet" href="/l/?uddg=https%3A%2F%2Fexample.gov%2Fa">The agency announced a rule.</a>
            </div>
        "#;
        let base = Url::parse("https://duckduckgo.com/html/").unwrap();
        let hits = parse_results(html, &base, 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.gov/a");
        assert_eq!(hits[0].title, "Agency rule");
    }

    #[test]
    fn urlencode_basic() {
        assert_eq!(urlencode("a b&c"), "a+b%26c");
    }
}
