//! Per-step tool routing
//!
//! Structured plan steps route deterministically. Free-text steps go through
//! a model router whose JSON answer is constrained to the `ToolCall` variant
//! set; anything unparseable falls back to keyword matching.

use crate::error::AssistantError;
use crate::llm::{parse_json_reply, CompletionRequest, LanguageModel};
use crate::models::{PlanStep, RouteSource, ToolCall, ToolKind};
use crate::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod keywords;

pub use keywords::{extract_email, extract_ticker, route_by_keywords};

const ROUTER_PROMPT: &str = r#"You are a tool router. Given a task step, decide which tool to use.

AVAILABLE TOOLS:
- market: Fetch stock/crypto price data (params: "ticker", comma-separated for several)
- search: Search the web for information (params: "query")
- chart: Generate a price visualization (params: "ticker")
- logic: Calculations (params: "expression")
- email: Send the report via email (params: "recipient", "subject")

Respond with JSON only:
{"tool": "market|search|chart|logic|email", "params": {...}}"#;

pub const DEFAULT_EMAIL_SUBJECT: &str = "Financial Analysis Report";

/// Outcome of routing one step
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub call: ToolCall,
    pub source: RouteSource,
}

/// Raw router answer before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawToolCall {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

pub struct StepRouter {
    model: Arc<dyn LanguageModel>,
}

impl StepRouter {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn route(&self, step: &PlanStep) -> RoutingDecision {
        if let Some(call) = &step.call {
            return RoutingDecision {
                call: call.clone(),
                source: RouteSource::Planner,
            };
        }

        match self.route_with_model(&step.description).await {
            Ok(call) => {
                debug!(tool = %call.label(), "Model routed step");
                RoutingDecision {
                    call,
                    source: RouteSource::Model,
                }
            }
            Err(e) => {
                warn!(error = %e, step = %step.description, "Router unavailable, using keyword fallback");
                RoutingDecision {
                    call: keyword_call(&step.description),
                    source: RouteSource::Keywords,
                }
            }
        }
    }

    async fn route_with_model(&self, step: &str) -> Result<ToolCall> {
        let request = CompletionRequest::new()
            .system(ROUTER_PROMPT)
            .user(format!("TASK STEP: {}", step))
            .temperature(0.0)
            .max_output_tokens(256);

        let reply = self.model.complete(request).await?;
        let raw: RawToolCall = parse_json_reply(&reply)
            .map_err(|e| AssistantError::Routing(format!("unreadable router reply: {}", e)))?;
        Ok(resolve_call(&raw, step))
    }
}

/// Keyword state machine result, with parameters pulled from the step text
pub fn keyword_call(step: &str) -> ToolCall {
    let raw = RawToolCall {
        tool: route_by_keywords(step).as_str().to_string(),
        params: Map::new(),
    };
    resolve_call(&raw, step)
}

/// Validate a loosely-typed routing answer into a `ToolCall`
pub fn resolve_call(raw: &RawToolCall, step: &str) -> ToolCall {
    let Some(kind) = ToolKind::from_tag(&raw.tool) else {
        return ToolCall::Unsupported {
            tool: raw.tool.clone(),
        };
    };

    match kind {
        ToolKind::Market => ToolCall::Market {
            tickers: tickers_or_extract(&raw.params, step),
        },
        ToolKind::Chart => ToolCall::Chart {
            tickers: tickers_or_extract(&raw.params, step),
        },
        ToolKind::Search => ToolCall::Search {
            query: string_param(&raw.params, &["query", "q"]).unwrap_or_else(|| step.to_string()),
        },
        ToolKind::Email => ToolCall::Email {
            recipient: string_param(&raw.params, &["recipient", "to", "email"])
                .filter(|r| keywords::is_email_address(r))
                .or_else(|| extract_email(step)),
            subject: string_param(&raw.params, &["subject"]),
        },
        ToolKind::Logic => ToolCall::Logic {
            expression: string_param(&raw.params, &["expression", "code"]),
        },
    }
}

fn string_param(params: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Ticker parameters accept "NVDA", "NVDA, AMD" or ["NVDA", "AMD"]
pub fn tickers_from_params(params: &Map<String, Value>) -> Vec<String> {
    let mut tickers = Vec::new();
    for key in ["tickers", "ticker", "symbols", "symbol"] {
        match params.get(key) {
            Some(Value::String(s)) => tickers.extend(keywords::split_tickers(s)),
            Some(Value::Array(items)) => tickers.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .flat_map(keywords::split_tickers),
            ),
            _ => {}
        }
    }
    let mut unique: Vec<String> = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        if !unique.contains(&ticker) {
            unique.push(ticker);
        }
    }
    unique
}

fn tickers_or_extract(params: &Map<String, Value>, step: &str) -> Vec<String> {
    let tickers = tickers_from_params(params);
    if !tickers.is_empty() {
        return tickers;
    }
    extract_ticker(step).into_iter().collect()
}
