//! Web search adapter
//!
//! Scrapes the DuckDuckGo HTML endpoint. Result links arrive wrapped in a
//! redirect (`/l/?uddg=<target>`) which is unwrapped before use.

use crate::error::AssistantError;
use crate::models::Source;
use crate::tools::{SearchHit, SearchProvider, SearchQuery};
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONTENT_PREVIEW_CHARS: usize = 1500;
const SNIPPET_CHARS: usize = 200;

lazy_static! {
    static ref RESULT_LINK: Regex =
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    static ref RESULT_SNIPPET: Regex =
        Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).unwrap();
    static ref SCRIPT_OR_STYLE: Regex =
        Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").unwrap();
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64)")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch_page_text(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(truncate_chars(&strip_html(&body), CONTENT_PREVIEW_CHARS))
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        debug!(query = %query.query, "Searching the web");

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query.query.as_str())])
            .send()
            .await
            .map_err(|e| AssistantError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Search(format!(
                "search endpoint returned {}",
                status
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AssistantError::Search(e.to_string()))?;

        let mut hits = parse_results(&html, query.max_results);

        if query.fetch_content {
            for hit in hits.iter_mut() {
                match self.fetch_page_text(&hit.url).await {
                    Ok(text) if !text.is_empty() => hit.snippet = text,
                    Ok(_) => {}
                    Err(e) => warn!(url = %hit.url, error = %e, "Page fetch failed, keeping snippet"),
                }
            }
        }

        Ok(hits)
    }
}

/// Extract result titles, targets and snippets from a results page
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let snippets: Vec<String> = RESULT_SNIPPET
        .captures_iter(html)
        .map(|c| clean_fragment(&c[1]))
        .collect();

    RESULT_LINK
        .captures_iter(html)
        .enumerate()
        .filter_map(|(i, c)| {
            let url = unwrap_redirect(&c[1])?;
            Some(SearchHit {
                title: clean_fragment(&c[2]),
                url,
                snippet: snippets.get(i).cloned().unwrap_or_default(),
            })
        })
        .take(max_results)
        .collect()
}

/// Resolve a result href, following the `uddg` redirect parameter
fn unwrap_redirect(href: &str) -> Option<String> {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href
    };

    let url = Url::parse(&absolute).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    Some(url.to_string())
}

fn clean_fragment(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, "");
    WHITESPACE
        .replace_all(&decode_entities(&text), " ")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

/// Visible text of an HTML page
pub fn strip_html(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_code, " ");
    WHITESPACE
        .replace_all(&decode_entities(&without_tags), " ")
        .trim()
        .to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Numbered listing fed to the synthesis prompt
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "{}. {}\n   {}\n   {}...",
                i + 1,
                hit.title,
                hit.url,
                truncate_chars(&hit.snippet, SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn hits_to_sources(hits: &[SearchHit]) -> Vec<Source> {
    hits.iter()
        .map(|hit| Source {
            title: hit.title.clone(),
            url: hit.url.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.reuters.com%2Fnvidia&amp;rut=abc">NVIDIA <b>earnings</b> beat</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Data-center revenue &amp; margins rose.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://example.com/direct">Direct link</a>
  <a class="result__snippet" href="https://example.com/direct">Second snippet</a>
</div>
"#;

    #[test]
    fn test_parse_results_unwraps_redirects() {
        let hits = parse_results(RESULTS_PAGE, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "NVIDIA earnings beat");
        assert_eq!(hits[0].url, "https://www.reuters.com/nvidia");
        assert_eq!(hits[0].snippet, "Data-center revenue & margins rose.");
        assert_eq!(hits[1].url, "https://example.com/direct");
    }

    #[test]
    fn test_parse_results_respects_limit() {
        assert_eq!(parse_results(RESULTS_PAGE, 1).len(), 1);
        assert!(parse_results("<html></html>", 5).is_empty());
    }

    #[test]
    fn test_strip_html_and_truncate() {
        let page = "<html><head><style>p{}</style><script>var x=1;</script></head><body><p>Hello&nbsp;<b>world</b></p></body></html>";
        assert_eq!(strip_html(page), "Hello world");

        let long = "é".repeat(CONTENT_PREVIEW_CHARS + 10);
        assert_eq!(truncate_chars(&long, CONTENT_PREVIEW_CHARS).chars().count(), CONTENT_PREVIEW_CHARS);
    }

    #[test]
    fn test_format_hits() {
        assert_eq!(format_hits(&[]), "No results found.");

        let hits = vec![SearchHit {
            title: "Headline".to_string(),
            url: "https://example.com".to_string(),
            snippet: "Body".to_string(),
        }];
        assert_eq!(format_hits(&hits), "1. Headline\n   https://example.com\n   Body...");
        assert_eq!(hits_to_sources(&hits)[0].title, "Headline");
    }
}
