//! Function tools for the research loop: web/news search with a domain
//! blacklist, page fetch with caching and deterministic HTML conversion,
//! and internal corpus search.

pub mod defs;
pub mod fetch;
pub mod internal;
pub mod search;

pub use defs::{counts_as_source, dispatch, tool_definitions, ToolContext, ToolSet, DEFAULT_TOOLS};
pub use fetch::{fetch_markdown, html_to_markdown, html_to_text, FetchCache};
pub use search::{apply_blacklist, news_search, web_search, SearchHit, SEARCH_BLACKLIST};
