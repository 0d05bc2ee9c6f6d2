//! Core data models for the research assistant

use crate::tools::chart::ChartArtifact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Intent =================
//

/// Three-way classification of a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    /// Small talk with no financial content
    Chat,
    /// Financial, but missing something only the user can supply
    Vague,
    Actionable,
}

impl Intent {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "CHAT" => Intent::Chat,
            "VAGUE" => Intent::Vague,
            _ => Intent::Actionable,
        }
    }
}

//
// ================= Tools =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Market,
    Search,
    Chart,
    Email,
    Logic,
}

impl ToolKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "market" => Some(ToolKind::Market),
            "search" => Some(ToolKind::Search),
            "chart" => Some(ToolKind::Chart),
            "email" => Some(ToolKind::Email),
            "logic" => Some(ToolKind::Logic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Market => "market",
            ToolKind::Search => "search",
            ToolKind::Chart => "chart",
            ToolKind::Email => "email",
            ToolKind::Logic => "logic",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully-resolved instruction for one plan step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "tool", content = "params", rename_all = "lowercase")]
pub enum ToolCall {
    Market { tickers: Vec<String> },
    Search { query: String },
    Chart { tickers: Vec<String> },
    Email {
        recipient: Option<String>,
        subject: Option<String>,
    },
    Logic { expression: Option<String> },
    Unsupported { tool: String },
}

impl ToolCall {
    pub fn kind(&self) -> Option<ToolKind> {
        match self {
            ToolCall::Market { .. } => Some(ToolKind::Market),
            ToolCall::Search { .. } => Some(ToolKind::Search),
            ToolCall::Chart { .. } => Some(ToolKind::Chart),
            ToolCall::Email { .. } => Some(ToolKind::Email),
            ToolCall::Logic { .. } => Some(ToolKind::Logic),
            ToolCall::Unsupported { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ToolCall::Unsupported { tool } => tool.clone(),
            other => other.kind().map(|k| k.to_string()).unwrap_or_default(),
        }
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub description: String,
    /// Set when the planner emitted a structured instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<ToolCall>,
}

impl PlanStep {
    pub fn text(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            call: None,
        }
    }

    pub fn structured(description: impl Into<String>, call: ToolCall) -> Self {
        Self {
            description: description.into(),
            call: Some(call),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.description.clone()).collect()
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

/// Where a step's tool decision came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Planner,
    Model,
    Keywords,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based position in the plan
    pub index: usize,
    pub description: String,
    pub tool: String,
    pub route: RouteSource,
    pub status: ExecutionStatus,
    pub output: String,
    pub execution_time_ms: u64,
}

impl StepResult {
    /// Markdown rendering used for synthesis prompts and the raw fallback
    pub fn render(&self) -> String {
        format!("### Step {}: {}\n\n{}", self.index, self.description, self.output)
    }
}

/// Concatenate step results the way the raw fallback report does
pub fn render_results(results: &[StepResult]) -> String {
    results
        .iter()
        .map(StepResult::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    Model,
    Retried,
    RawFallback,
    Skipped,
}

/// Terminal output of one executed turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub text: String,
    pub charts: Vec<ChartArtifact>,
    pub sources: Vec<Source>,
    pub steps: Vec<StepResult>,
    pub synthesis: SynthesisMode,
}
