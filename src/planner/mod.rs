//! Planner trait and implementations
//!
//! A planner reads the conversation and either asks the user something
//! (small talk, or a request missing information only the user has) or
//! produces a non-empty ordered plan for the supervisor. Both planners feed
//! their raw steps through `PlanNormalizer`, so the plan invariants hold no
//! matter where the steps came from.

use crate::memory::ConversationHistory;
use crate::models::{Intent, Plan, PlanStep, ToolCall, ToolKind};
use crate::routing::keywords::{
    extract_email, extract_tickers, mentions_chart_tool, mentions_email, requests_chart,
    route_by_keywords,
};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

pub mod keyword;
pub mod llm;

pub use keyword::KeywordPlanner;
pub use llm::LlmPlanner;

pub const DEFAULT_MAX_PLAN_STEPS: usize = 8;
pub const REPHRASE_QUESTION: &str =
    "I had trouble understanding. Could you rephrase your request?";
pub const EMAIL_RECIPIENT_QUESTION: &str = "Which email address should I send the report to?";

/// Result of planning one turn
#[derive(Debug, Clone)]
pub enum PlannerOutcome {
    /// Nothing to execute; `question` goes straight back to the user
    Ambiguous { intent: Intent, question: String },
    Actionable(Plan),
}

impl PlannerOutcome {
    pub fn intent(&self) -> Intent {
        match self {
            PlannerOutcome::Ambiguous { intent, .. } => *intent,
            PlannerOutcome::Actionable(_) => Intent::Actionable,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, PlannerOutcome::Ambiguous { .. })
    }

    pub fn plan(&self) -> Option<&Plan> {
        match self {
            PlannerOutcome::Actionable(plan) => Some(plan),
            PlannerOutcome::Ambiguous { .. } => None,
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self {
            PlannerOutcome::Ambiguous { question, .. } => Some(question),
            PlannerOutcome::Actionable(_) => None,
        }
    }
}

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan the latest turn. Errors only when the history has no user turn.
    async fn plan(&self, history: &ConversationHistory) -> Result<PlannerOutcome>;
}

/// Enforces the plan invariants shared by every planner
#[derive(Debug, Clone)]
pub struct PlanNormalizer {
    max_steps: usize,
}

impl Default for PlanNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PLAN_STEPS)
    }
}

impl PlanNormalizer {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    pub fn normalize(&self, steps: Vec<PlanStep>, history: &ConversationHistory) -> PlannerOutcome {
        let last_user = history
            .last_user_message()
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();

        let mut steps: Vec<PlanStep> = steps
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .take(self.max_steps)
            .collect();

        if !requests_chart(&last_user) {
            let before = steps.len();
            steps.retain(|s| !is_chart_step(s));
            if steps.len() != before {
                debug!(removed = before - steps.len(), "Dropped chart steps without an explicit request");
            }
        }

        for step in steps.iter_mut().filter(|s| is_email_step(s)) {
            match resolve_recipient(step, history) {
                Some(recipient) => {
                    let subject = match &step.call {
                        Some(ToolCall::Email { subject, .. }) => subject.clone(),
                        _ => None,
                    };
                    step.call = Some(ToolCall::Email {
                        recipient: Some(recipient),
                        subject,
                    });
                }
                None => {
                    return PlannerOutcome::Ambiguous {
                        intent: Intent::Vague,
                        question: EMAIL_RECIPIENT_QUESTION.to_string(),
                    };
                }
            }
        }

        let mut steps = insert_missing_fetches(steps);

        if steps.is_empty() {
            steps.push(PlanStep::structured(
                format!("Search web for {}", last_user),
                ToolCall::Search { query: last_user },
            ));
        }

        PlannerOutcome::Actionable(Plan::new(steps))
    }
}

/// Kind a step will most likely route to, without calling a model
fn step_kind(step: &PlanStep) -> Option<ToolKind> {
    match &step.call {
        Some(call) => call.kind(),
        None => Some(route_by_keywords(&step.description)),
    }
}

/// Chart steps are recognised by vocabulary, not by routing priority, so a
/// step like "Plot NVDA stock price" still counts
fn is_chart_step(step: &PlanStep) -> bool {
    match &step.call {
        Some(call) => call.kind() == Some(ToolKind::Chart),
        None => {
            route_by_keywords(&step.description) == ToolKind::Chart
                || mentions_chart_tool(&step.description)
        }
    }
}

/// A free-text step that routes to market, search or chart keeps that routing
/// even when it mentions email
fn is_email_step(step: &PlanStep) -> bool {
    match &step.call {
        Some(call) => call.kind() == Some(ToolKind::Email),
        None => match route_by_keywords(&step.description) {
            ToolKind::Email => true,
            ToolKind::Logic => mentions_email(&step.description),
            ToolKind::Market | ToolKind::Search | ToolKind::Chart => false,
        },
    }
}

/// Recipient from the step itself, else the newest address in the conversation
fn resolve_recipient(step: &PlanStep, history: &ConversationHistory) -> Option<String> {
    if let Some(ToolCall::Email {
        recipient: Some(recipient),
        ..
    }) = &step.call
    {
        return Some(recipient.clone());
    }

    extract_email(&step.description).or_else(|| {
        let messages: Vec<_> = history.messages().collect();
        messages
            .iter()
            .rev()
            .find_map(|m| extract_email(&m.content))
    })
}

fn step_tickers(step: &PlanStep) -> Vec<String> {
    match &step.call {
        Some(ToolCall::Market { tickers }) | Some(ToolCall::Chart { tickers }) => tickers.clone(),
        Some(_) => Vec::new(),
        None => extract_tickers(&step.description),
    }
}

/// Put a market fetch in front of any chart whose tickers nothing fetched yet
fn insert_missing_fetches(steps: Vec<PlanStep>) -> Vec<PlanStep> {
    let mut fetched: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(steps.len());

    for step in steps {
        match (is_chart_step(&step), step_kind(&step)) {
            (false, Some(ToolKind::Market)) => fetched.extend(step_tickers(&step)),
            (true, _) => {
                let missing: Vec<String> = step_tickers(&step)
                    .into_iter()
                    .filter(|t| !fetched.contains(t))
                    .collect();
                if !missing.is_empty() {
                    debug!(tickers = ?missing, "Inserting market fetch before chart");
                    out.push(PlanStep::structured(
                        format!("Fetch market data for {}", missing.join(", ")),
                        ToolCall::Market {
                            tickers: missing.clone(),
                        },
                    ));
                    fetched.extend(missing);
                }
            }
            _ => {}
        }
        out.push(step);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageRole;

    fn history(text: &str) -> ConversationHistory {
        ConversationHistory::from_pairs(vec![(MessageRole::User, text)])
    }

    fn actionable(outcome: PlannerOutcome) -> Plan {
        match outcome {
            PlannerOutcome::Actionable(plan) => plan,
            other => panic!("expected a plan, got {:?}", other),
        }
    }

    #[test]
    fn test_chart_steps_dropped_without_chart_word() {
        let normalizer = PlanNormalizer::default();
        let plan = actionable(normalizer.normalize(
            vec![
                PlanStep::text("Fetch market data for NVDA"),
                PlanStep::text("Search for NVIDIA news"),
                PlanStep::text("Generate a chart for NVDA"),
            ],
            &history("Analyze NVDA stock"),
        ));
        assert_eq!(plan.len(), 2);
        assert!(plan.steps.iter().all(|s| !is_chart_step(s)));
    }

    #[test]
    fn test_chart_gets_preceding_fetch() {
        let normalizer = PlanNormalizer::default();
        let plan = actionable(normalizer.normalize(
            vec![PlanStep::structured(
                "Chart NVDA",
                ToolCall::Chart {
                    tickers: vec!["NVDA".to_string()],
                },
            )],
            &history("Show me NVDA chart"),
        ));
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.steps[0].call,
            Some(ToolCall::Market {
                tickers: vec!["NVDA".to_string()]
            })
        );
        assert_eq!(plan.steps[0].description, "Fetch market data for NVDA");
    }

    #[test]
    fn test_covered_chart_is_left_alone() {
        let normalizer = PlanNormalizer::default();
        let plan = actionable(normalizer.normalize(
            vec![
                PlanStep::text("Fetch market data for TSLA"),
                PlanStep::text("Plot a chart comparing TSLA"),
            ],
            &history("plot TSLA"),
        ));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_email_without_address_is_vague() {
        let normalizer = PlanNormalizer::default();
        let outcome = normalizer.normalize(
            vec![PlanStep::text("Email the report")],
            &history("Email me the NVDA analysis"),
        );
        assert_eq!(outcome.intent(), Intent::Vague);
        assert_eq!(outcome.question(), Some(EMAIL_RECIPIENT_QUESTION));
        assert!(outcome.plan().is_none());
    }

    #[test]
    fn test_email_address_carried_from_history() {
        let history = ConversationHistory::from_pairs(vec![
            (MessageRole::User, "my address is ann@example.com"),
            (MessageRole::Assistant, "Noted."),
            (MessageRole::User, "Email me the NVDA analysis"),
        ]);
        let plan = actionable(
            PlanNormalizer::default().normalize(vec![PlanStep::text("Email the report")], &history),
        );
        assert_eq!(
            plan.steps[0].call,
            Some(ToolCall::Email {
                recipient: Some("ann@example.com".to_string()),
                subject: None
            })
        );
    }

    #[test]
    fn test_search_step_mentioning_email_keeps_its_routing() {
        let plan = actionable(PlanNormalizer::default().normalize(
            vec![
                PlanStep::text("Search for NVIDIA news to include in the email"),
                PlanStep::text("Email the report to ann@example.com"),
            ],
            &history("Research NVIDIA news and email ann@example.com"),
        ));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].call, None);
        assert_eq!(
            plan.steps[1].call,
            Some(ToolCall::Email {
                recipient: Some("ann@example.com".to_string()),
                subject: None
            })
        );
    }

    #[test]
    fn test_chart_step_with_market_words_dropped_without_chart_request() {
        let plan = actionable(PlanNormalizer::default().normalize(
            vec![
                PlanStep::text("Fetch market data for NVDA"),
                PlanStep::text("Plot NVDA stock price trend"),
            ],
            &history("Analyze NVDA stock"),
        ));
        assert_eq!(plan.descriptions(), vec!["Fetch market data for NVDA"]);
    }

    #[test]
    fn test_chart_step_with_market_words_kept_on_request() {
        let plan = actionable(PlanNormalizer::default().normalize(
            vec![PlanStep::text("Plot NVDA stock price trend")],
            &history("plot NVDA for me"),
        ));
        assert_eq!(
            plan.descriptions(),
            vec!["Fetch market data for NVDA", "Plot NVDA stock price trend"]
        );
    }

    #[test]
    fn test_empty_plan_becomes_search() {
        let plan = actionable(
            PlanNormalizer::default().normalize(vec![PlanStep::text("   ")], &history("IT market")),
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].description, "Search web for IT market");
    }

    #[test]
    fn test_plan_capped() {
        let steps = (0..12)
            .map(|i| PlanStep::text(format!("Search for topic {}", i)))
            .collect();
        let plan = actionable(PlanNormalizer::new(3).normalize(steps, &history("research")));
        assert_eq!(plan.len(), 3);
    }
}
