//! Offline planner
//!
//! Heuristic plans from the latest user message, used when no model key is
//! configured. Same normalisation as the model planner.

use crate::error::AssistantError;
use crate::memory::ConversationHistory;
use crate::models::{Intent, PlanStep, ToolCall};
use crate::planner::{PlanNormalizer, Planner, PlannerOutcome};
use crate::routing::keywords::{
    extract_email, extract_tickers, is_small_talk, mentions_email, requests_chart,
};
use crate::Result;
use async_trait::async_trait;
use tracing::info;

const GREETING: &str = "Hello! I can help with stock and crypto prices, market news, charts, and emailed reports. What would you like to explore?";

pub struct KeywordPlanner {
    normalizer: PlanNormalizer,
}

impl KeywordPlanner {
    pub fn new(max_steps: usize) -> Self {
        Self {
            normalizer: PlanNormalizer::new(max_steps),
        }
    }

    fn draft(message: &str) -> Vec<PlanStep> {
        let tickers = extract_tickers(message);
        let mut steps = Vec::new();

        if tickers.is_empty() {
            steps.push(PlanStep::structured(
                format!("Search web for {}", message),
                ToolCall::Search {
                    query: message.to_string(),
                },
            ));
        } else {
            let joined = tickers.join(", ");
            steps.push(PlanStep::structured(
                format!("Fetch market data for {}", joined),
                ToolCall::Market {
                    tickers: tickers.clone(),
                },
            ));
            let query = format!("{} stock recent news", tickers.join(" "));
            steps.push(PlanStep::structured(
                format!("Search for {}", query),
                ToolCall::Search { query },
            ));
            if requests_chart(message) {
                steps.push(PlanStep::structured(
                    format!("Generate a chart for {}", joined),
                    ToolCall::Chart { tickers },
                ));
            }
        }

        if mentions_email(message) {
            steps.push(PlanStep::structured(
                "Email the report",
                ToolCall::Email {
                    recipient: extract_email(message),
                    subject: None,
                },
            ));
        }

        steps
    }
}

impl Default for KeywordPlanner {
    fn default() -> Self {
        Self {
            normalizer: PlanNormalizer::default(),
        }
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn plan(&self, history: &ConversationHistory) -> Result<PlannerOutcome> {
        let message = history
            .last_user_message()
            .map(|m| m.content.trim().to_string())
            .ok_or_else(|| {
                AssistantError::InvalidInput(
                    "conversation has no user message to plan from".to_string(),
                )
            })?;

        let outcome = if is_small_talk(&message) {
            PlannerOutcome::Ambiguous {
                intent: Intent::Chat,
                question: GREETING.to_string(),
            }
        } else {
            self.normalizer.normalize(Self::draft(&message), history)
        };

        info!(
            intent = ?outcome.intent(),
            steps = outcome.plan().map(|p| p.len()).unwrap_or(0),
            "Keyword planner decision"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageRole;
    use crate::models::ToolKind;

    fn history(text: &str) -> ConversationHistory {
        ConversationHistory::from_pairs(vec![(MessageRole::User, text)])
    }

    fn kinds(outcome: &PlannerOutcome) -> Vec<Option<ToolKind>> {
        outcome
            .plan()
            .map(|p| {
                p.steps
                    .iter()
                    .map(|s| s.call.as_ref().and_then(ToolCall::kind))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_greeting_is_chat() {
        let outcome = KeywordPlanner::default().plan(&history("Hello")).await.unwrap();
        assert_eq!(outcome.intent(), Intent::Chat);
        assert!(outcome.plan().is_none());
    }

    #[tokio::test]
    async fn test_analyze_has_fetch_and_search_only() {
        let outcome = KeywordPlanner::default()
            .plan(&history("Analyze NVDA stock"))
            .await
            .unwrap();
        assert_eq!(
            kinds(&outcome),
            vec![Some(ToolKind::Market), Some(ToolKind::Search)]
        );
    }

    #[tokio::test]
    async fn test_show_adds_chart() {
        let outcome = KeywordPlanner::default()
            .plan(&history("Show me NVDA chart"))
            .await
            .unwrap();
        assert_eq!(
            kinds(&outcome),
            vec![Some(ToolKind::Market), Some(ToolKind::Search), Some(ToolKind::Chart)]
        );
    }

    #[tokio::test]
    async fn test_email_request_without_address_is_vague() {
        let outcome = KeywordPlanner::default()
            .plan(&history("Analyze AMD and email me the results"))
            .await
            .unwrap();
        assert_eq!(outcome.intent(), Intent::Vague);
    }

    #[tokio::test]
    async fn test_topic_without_ticker_searches() {
        let outcome = KeywordPlanner::default()
            .plan(&history("how is the bond market today"))
            .await
            .unwrap();
        assert_eq!(
            outcome.plan().unwrap().descriptions(),
            vec!["Search web for how is the bond market today"]
        );
    }
}
