//! Model-backed planner
//!
//! One classification call per turn. The model answers CHAT, VAGUE or
//! ACTIONABLE; plan entries may be plain text or structured tool calls.

use crate::error::AssistantError;
use crate::llm::{parse_json_reply, CompletionRequest, LanguageModel};
use crate::memory::ConversationHistory;
use crate::models::{Intent, PlanStep};
use crate::planner::{PlanNormalizer, Planner, PlannerOutcome, REPHRASE_QUESTION};
use crate::routing::{resolve_call, RawToolCall};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

const HISTORY_WINDOW: usize = 20;
const DEFAULT_CHAT_REPLY: &str = "Hello! How can I help?";
const DEFAULT_VAGUE_QUESTION: &str =
    "Could you tell me which stock, crypto or market topic you'd like me to look into?";

const PLANNER_PROMPT: &str = r#"You are a Financial Intelligence Planner with access to these tools:
- market: Fetch stock/crypto prices (params: "ticker", comma-separated for several)
- search: Find news, analysis, trends (params: "query")
- chart: Create price visualizations (params: "ticker")
- logic: Run calculations (params: "expression")
- email: Send the report (params: "recipient", "subject")

YOUR PRIMARY DIRECTIVE: TAKE ACTION.
If the user mentions ANY financial topic (stock, crypto, market, company), BUILD A PLAN.

CLASSIFICATION:
1. CHAT - Pure small talk with NO financial content ("Hi", "Thanks", "How are you")
2. VAGUE - A financial request missing something only the user can supply
   (e.g. "email me the report" with no email address anywhere in the conversation)
3. ACTIONABLE - Everything else, even loosely worded financial questions

RESPONSE FORMAT (JSON only):
{
  "intent": "CHAT|VAGUE|ACTIONABLE",
  "response": "reply or clarifying question (CHAT and VAGUE only)",
  "plan": ["step 1", {"step": "step 2", "tool": "market", "params": {"ticker": "NVDA"}}]
}
Plan entries may be plain strings or objects naming the tool directly.

EXAMPLES:
User: "How is NVIDIA stock doing recently?"
{"intent": "ACTIONABLE", "plan": ["Fetch market data for NVDA", "Search for NVIDIA stock recent news"]}

User: "Bitcoin"
{"intent": "ACTIONABLE", "plan": ["Fetch market data for BTC-USD", "Search for Bitcoin news"]}

User: "Show me TSLA vs RIVN"
{"intent": "ACTIONABLE", "plan": [{"step": "Fetch market data for TSLA and RIVN", "tool": "market", "params": {"ticker": "TSLA, RIVN"}}, {"step": "Chart TSLA vs RIVN", "tool": "chart", "params": {"ticker": "TSLA, RIVN"}}]}

User: "Hi"
{"intent": "CHAT", "response": "Hello! I can help with stock analysis, market research, crypto, calculations, and more. What would you like to explore?"}

KEY RULES:
- Look at the conversation history for context (ticker names, topics, email addresses)
- If the user mentioned a ticker or an email address earlier, use it
- NEVER ask "which ticker?" if it was already mentioned
- CHART RULE: only include chart steps when the user explicitly says show, chart,
  visualize, graph, plot, draw or display. "Analyze NVDA" gets NO chart.

Output ONLY valid JSON."#;

#[derive(Debug, Deserialize)]
struct PlannerReply {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    plan: Vec<RawPlanEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlanEntry {
    Text(String),
    Structured {
        step: String,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        params: Map<String, Value>,
    },
}

impl RawPlanEntry {
    fn into_step(self) -> PlanStep {
        match self {
            RawPlanEntry::Text(text) => PlanStep::text(text.trim()),
            RawPlanEntry::Structured {
                step,
                tool: Some(tool),
                params,
            } => {
                let call = resolve_call(&RawToolCall { tool, params }, &step);
                PlanStep::structured(step.trim(), call)
            }
            RawPlanEntry::Structured { step, .. } => PlanStep::text(step.trim()),
        }
    }
}

pub struct LlmPlanner {
    model: Arc<dyn LanguageModel>,
    normalizer: PlanNormalizer,
}

impl LlmPlanner {
    pub fn new(model: Arc<dyn LanguageModel>, max_steps: usize) -> Self {
        Self {
            model,
            normalizer: PlanNormalizer::new(max_steps),
        }
    }

    async fn classify(&self, history: &ConversationHistory) -> Result<PlannerReply> {
        let request = CompletionRequest::new()
            .system(PLANNER_PROMPT)
            .history(history, HISTORY_WINDOW)
            .temperature(0.0);

        let reply = self.model.complete(request).await?;
        parse_json_reply(&reply)
            .map_err(|e| AssistantError::Planning(format!("unreadable planner reply: {}", e)))
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, history: &ConversationHistory) -> Result<PlannerOutcome> {
        if !history.has_user_turn() {
            return Err(AssistantError::InvalidInput(
                "conversation has no user message to plan from".to_string(),
            ));
        }

        let reply = match self.classify(history).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Planner classification failed");
                return Ok(PlannerOutcome::Ambiguous {
                    intent: Intent::Vague,
                    question: REPHRASE_QUESTION.to_string(),
                });
            }
        };

        let intent = reply
            .intent
            .as_deref()
            .map(Intent::parse)
            .unwrap_or(Intent::Actionable);

        let response = reply
            .response
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let outcome = match intent {
            Intent::Chat => PlannerOutcome::Ambiguous {
                intent,
                question: response.unwrap_or_else(|| DEFAULT_CHAT_REPLY.to_string()),
            },
            Intent::Vague => PlannerOutcome::Ambiguous {
                intent,
                question: response.unwrap_or_else(|| DEFAULT_VAGUE_QUESTION.to_string()),
            },
            Intent::Actionable => {
                let steps = reply.plan.into_iter().map(RawPlanEntry::into_step).collect();
                self.normalizer.normalize(steps, history)
            }
        };

        info!(
            intent = ?outcome.intent(),
            steps = outcome.plan().map(|p| p.len()).unwrap_or(0),
            "Planner decision"
        );
        Ok(outcome)
    }
}
