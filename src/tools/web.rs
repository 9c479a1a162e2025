//! Web Tools
//!
//! A lightweight search tool backed by the DuckDuckGo HTML endpoint and a
//! page fetcher that reduces HTML to readable text and serves it in
//! windows, so a stage can page through long documents with `start_index`.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::types::PipelineTool;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_MAX_RESULTS: usize = 5;
const DEFAULT_FETCH_LENGTH: usize = 5000;

/// Pull result URLs out of a DuckDuckGo HTML results page.
///
/// Result links are redirect anchors carrying the real target in a `uddg=`
/// query parameter; plain external anchors are kept as a fallback. Results
/// are deduplicated in page order and duckduckgo's own links dropped.
pub fn extract_result_urls(html: &str, max_results: usize) -> Vec<String> {
    let href = Regex::new(r#"href="([^"]+)""#).expect("href pattern is valid");
    let uddg = Regex::new(r"[?&]uddg=([^&]+)").expect("uddg pattern is valid");

    let mut urls: Vec<String> = Vec::new();
    for cap in href.captures_iter(html) {
        let anchor = &cap[1];
        let candidate = if anchor.contains("uddg=") || anchor.starts_with("/l/") {
            match uddg.captures(anchor) {
                Some(m) => urlencoding::decode(&m[1])
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| anchor.to_string()),
                None => anchor.to_string(),
            }
        } else {
            anchor.to_string()
        };

        if candidate.starts_with("http")
            && !candidate.contains("duckduckgo.com")
            && !urls.contains(&candidate)
        {
            urls.push(candidate);
        }
        if urls.len() >= max_results {
            break;
        }
    }
    urls
}

fn looks_like_html(body: &str, content_type: &str) -> bool {
    if content_type.to_lowercase().contains("text/html") {
        return true;
    }
    let head: String = body.chars().take(500).collect();
    head.to_lowercase().contains("<html")
}

/// Reduce an HTML document to plain text: drop script/style/head subtrees,
/// strip the remaining tags, decode the common entities, and collapse
/// whitespace runs.
pub fn html_to_text(html: &str) -> String {
    let subtree =
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<head\b.*?</head>")
            .expect("subtree pattern");
    let tag = Regex::new(r"(?s)<[^>]+>").expect("tag pattern");
    let blank_runs = Regex::new(r"\n\s*\n\s*\n+").expect("blank run pattern");

    let without_subtrees = subtree.replace_all(html, " ");
    let without_tags = tag.replace_all(&without_subtrees, "\n");

    let decoded = without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let trimmed_lines: Vec<&str> = decoded
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    blank_runs
        .replace_all(&trimmed_lines.join("\n"), "\n\n")
        .into_owned()
}

/// Take a character window out of reduced page content. When the window is
/// full and more content remains, a continuation hint tells the caller
/// which `start_index` to pass next.
pub fn window_content(content: &str, start_index: usize, max_length: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let total = chars.len();
    if start_index >= total {
        return "<error>No more content available.</error>".to_string();
    }
    let end = (start_index + max_length).min(total);
    let mut window: String = chars[start_index..end].iter().collect();
    if end - start_index == max_length && end < total {
        window.push_str(&format!(
            "\n\n<error>Content truncated. Call fetch with start_index={} to continue.</error>",
            end
        ));
    }
    window
}

// ─── web_search ──────────────────────────────────────────────────

pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return a list of result URLs for a query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "number", "description": "Default 5" }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        let max_results = args["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        debug!(query, max_results, "running web search");
        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", query)])
            .header("User-Agent", BROWSER_UA)
            .header("Referer", "https://duckduckgo.com/")
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;

        let urls = extract_result_urls(&html, max_results);
        Ok(json!({ "urls": urls }))
    }
}

// ─── fetch ───────────────────────────────────────────────────────

pub struct FetchTool {
    client: reqwest::Client,
}

impl FetchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineTool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its readable text. Long pages are windowed; \
         pass start_index from the truncation hint to continue reading."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "max_length": { "type": "number", "description": "Window size in characters (default 5000)" },
                "start_index": { "type": "number", "description": "Window start offset (default 0)" },
                "raw": { "type": "boolean", "description": "Skip HTML reduction" }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'url' argument"))?;
        let max_length = args["max_length"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_FETCH_LENGTH);
        let start_index = args["start_index"].as_u64().unwrap_or(0) as usize;
        let raw = args["raw"].as_bool().unwrap_or(false);
        if max_length == 0 {
            anyhow::bail!("'max_length' must be positive");
        }

        debug!(url, start_index, "fetching page");
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(err) => {
                return Ok(json!({ "url": url, "error": format!("Fetch failed: {err}") }));
            }
        };
        let status = response.status();
        if !status.is_success() {
            return Ok(json!({
                "url": url,
                "error": format!("HTTP {} while fetching.", status.as_u16()),
            }));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        let (content, prefix) = if !raw && looks_like_html(&body, &content_type) {
            (html_to_text(&body), String::new())
        } else {
            let ctype = if content_type.is_empty() {
                "unknown".to_string()
            } else {
                content_type
            };
            (body, format!("Content-Type: {ctype} (raw)\n\n"))
        };

        Ok(json!({
            "url": url,
            "prefix": prefix,
            "content": window_content(&content, start_index, max_length),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
        <html><body>
        <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpricing&rut=abc">Example</a>
        <a class="result__a" href="/l/?uddg=https%3A%2F%2Frivals.io%2Fplans">Rivals</a>
        <a href="https://duckduckgo.com/about">About</a>
        <a href="https://plain.example.org/page">Plain</a>
        <a class="result__a" href="/l/?uddg=https%3A%2F%2Fexample.com%2Fpricing">Dup</a>
        </body></html>"#;

    #[test]
    fn test_extract_decodes_redirect_urls() {
        let urls = extract_result_urls(RESULTS_PAGE, 10);
        assert_eq!(
            urls,
            vec![
                "https://example.com/pricing",
                "https://rivals.io/plans",
                "https://plain.example.org/page",
            ]
        );
    }

    #[test]
    fn test_extract_respects_max_results() {
        let urls = extract_result_urls(RESULTS_PAGE, 1);
        assert_eq!(urls, vec!["https://example.com/pricing"]);
    }

    #[test]
    fn test_extract_skips_duckduckgo_links() {
        let urls = extract_result_urls(RESULTS_PAGE, 10);
        assert!(urls.iter().all(|u| !u.contains("duckduckgo.com")));
    }

    #[test]
    fn test_html_to_text_strips_script_and_tags() {
        let html = "<html><head><title>x</title></head><body>\
                    <script>var a = 1;</script><p>Hello &amp; welcome</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Hello & welcome"));
        assert!(!text.contains("var a"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_window_content_full_window_gets_hint() {
        let content = "abcdefghij";
        let window = window_content(content, 0, 4);
        assert!(window.starts_with("abcd"));
        assert!(window.contains("start_index=4"));
    }

    #[test]
    fn test_window_content_final_window_has_no_hint() {
        let window = window_content("abcdefghij", 8, 4);
        assert_eq!(window, "ij");
    }

    #[test]
    fn test_window_content_past_end() {
        let window = window_content("abc", 10, 4);
        assert_eq!(window, "<error>No more content available.</error>");
    }

    #[test]
    fn test_looks_like_html_by_header_or_body() {
        assert!(looks_like_html("anything", "text/html; charset=utf-8"));
        assert!(looks_like_html("<!doctype html><HTML>", ""));
        assert!(!looks_like_html("{\"a\":1}", "application/json"));
    }
}
