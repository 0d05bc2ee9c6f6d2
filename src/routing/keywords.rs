//! Keyword routing fallback
//!
//! Deterministic tool selection used whenever the model router is
//! unavailable or its answer cannot be parsed.

use crate::models::ToolKind;
use lazy_static::lazy_static;
use regex::Regex;

/// Static keyword lists, checked in priority order
const MARKET_KEYWORDS: &[&str] = &["fetch", "price", "stock"];
const SEARCH_KEYWORDS: &[&str] = &["search", "news", "why", "research"];
const CHART_KEYWORDS: &[&str] = &["chart", "graph", "plot", "visualize", "visualise"];
const EMAIL_KEYWORDS: &[&str] = &["email", "send"];

/// Words that count as an explicit request for a visual
const CHART_REQUEST_WORDS: &[&str] = &[
    "show", "chart", "visualize", "visualise", "graph", "plot", "draw", "display",
];
const CHART_WORD_SUFFIXES: &[&str] = &["", "s", "d", "n", "ed", "ing", "ted", "ting"];

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "how are you", "good morning",
    "good evening", "bye", "ok", "cool",
];

lazy_static! {
    static ref TICKER: Regex = Regex::new(r"\b([A-Z]{2,5}(?:-[A-Z]+)?)\b").unwrap();
    static ref EMAIL: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}").unwrap();
    static ref WORD: Regex = Regex::new(r"[a-z]+").unwrap();
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// Route step text to a tool by keyword class, in priority order
pub fn route_by_keywords(step: &str) -> ToolKind {
    let lowered = step.to_lowercase();

    if contains_any(&lowered, MARKET_KEYWORDS) {
        ToolKind::Market
    } else if contains_any(&lowered, SEARCH_KEYWORDS) {
        ToolKind::Search
    } else if contains_any(&lowered, CHART_KEYWORDS) {
        ToolKind::Chart
    } else if contains_any(&lowered, EMAIL_KEYWORDS) {
        ToolKind::Email
    } else {
        ToolKind::Logic
    }
}

/// First token that looks like a ticker (`NVDA`, `BTC-USD`)
pub fn extract_ticker(text: &str) -> Option<String> {
    TICKER.captures(text).map(|c| c[1].to_string())
}

/// Every distinct ticker-looking token, in order of appearance
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for cap in TICKER.captures_iter(text) {
        let ticker = cap[1].to_string();
        if !tickers.contains(&ticker) {
            tickers.push(ticker);
        }
    }
    tickers
}

pub fn extract_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_string())
}

pub fn is_email_address(text: &str) -> bool {
    EMAIL
        .find(text.trim())
        .map(|m| m.as_str().len() == text.trim().len())
        .unwrap_or(false)
}

/// Whole-word check for an explicit chart request
pub fn requests_chart(text: &str) -> bool {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered).any(|w| {
        let word = w.as_str();
        CHART_REQUEST_WORDS.iter().any(|kw| {
            word.strip_prefix(kw)
                .map(|suffix| CHART_WORD_SUFFIXES.contains(&suffix))
                .unwrap_or(false)
        })
    })
}

/// Whole-word check for the chart tool vocabulary, regardless of what else
/// the text mentions
pub fn mentions_chart_tool(text: &str) -> bool {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered).any(|w| {
        CHART_KEYWORDS.iter().any(|kw| {
            w.as_str()
                .strip_prefix(kw)
                .map(|suffix| CHART_WORD_SUFFIXES.contains(&suffix))
                .unwrap_or(false)
        })
    })
}

pub fn mentions_email(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("email") || lowered.contains("e-mail") || lowered.contains("mail me")
}

/// Pure small talk: a short greeting with no ticker and no financial words
pub fn is_small_talk(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    let stripped = lowered.trim_end_matches(|c: char| !c.is_alphanumeric());

    !stripped.is_empty()
        && stripped.len() <= 30
        && extract_ticker(text).is_none()
        && GREETINGS
            .iter()
            .any(|g| stripped == *g || stripped.starts_with(&format!("{} ", g)))
        && !contains_any(&lowered, MARKET_KEYWORDS)
        && !contains_any(&lowered, SEARCH_KEYWORDS)
}

/// Split "NVDA, AMD" style parameter strings
pub fn split_tickers(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}
