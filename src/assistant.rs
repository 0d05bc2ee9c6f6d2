//! Session-level turn handling
//!
//! Loads the session, appends the user message, runs the graph, stores the
//! reply and the updated cache. Turns on one session are serialised by the
//! session lock.

use crate::config::AppConfig;
use crate::execution::Supervisor;
use crate::graph::{GraphEvent, ResearchGraph, TurnResult};
use crate::llm::{GeminiClient, LanguageModel};
use crate::memory::ConversationMessage;
use crate::planner::{KeywordPlanner, LlmPlanner, Planner};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::tools::file_parser::parse_uploaded_file;
use crate::tools::Toolbox;
use crate::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use uuid::Uuid;

/// What an uploaded file contributed to the session
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSummary {
    pub name: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// Ticker key when the table was cached as a price series
    pub cached_as: Option<String>,
}

pub struct ResearchAssistant {
    graph: ResearchGraph,
    sessions: Arc<dyn SessionStore>,
}

impl ResearchAssistant {
    pub fn new(graph: ResearchGraph, sessions: Arc<dyn SessionStore>) -> Self {
        Self { graph, sessions }
    }

    /// Wire live adapters. Without a model key the keyword planner is used
    /// and synthesis degrades to the raw step results.
    pub fn from_config(config: &AppConfig, offline: bool) -> Self {
        let model: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(
            config.llm.api_key.clone(),
            config.llm.model.clone(),
        ));

        let planner: Box<dyn Planner> = if config.has_llm_key() && !offline {
            Box::new(LlmPlanner::new(model.clone(), config.max_plan_steps))
        } else {
            warn!("No model key configured, using the offline keyword planner");
            Box::new(KeywordPlanner::new(config.max_plan_steps))
        };

        let supervisor = Supervisor::new(model, Toolbox::from_config(config), config.supervisor());
        Self::new(
            ResearchGraph::new(planner, supervisor),
            Arc::new(InMemorySessionStore::new()),
        )
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }

    pub async fn handle_message(&self, session_id: Uuid, message: &str) -> Result<TurnResult> {
        self.handle_message_with_events(session_id, message, None)
            .await
    }

    pub async fn handle_message_with_events(
        &self,
        session_id: Uuid,
        message: &str,
        events: Option<&UnboundedSender<GraphEvent>>,
    ) -> Result<TurnResult> {
        let handle = self.sessions.open(session_id).await?;
        let mut session = handle.lock().await;

        session.history.push_user(message.trim());
        info!(session = %session_id, messages = session.history.message_count(), "Handling turn");

        let result = match self
            .graph
            .run_turn_with_events(&session.history, session.context.clone(), events)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(session = %session_id, error = %e, "Turn failed");
                session
                    .history
                    .push_assistant(format!("Sorry, I could not complete that request: {}", e));
                return Err(e);
            }
        };

        session.context = result.context.clone();
        session.history.push_assistant(history_entry(&result));
        Ok(result)
    }

    /// Parse an uploaded file into the session's history and cache
    pub async fn attach_file(&self, session_id: Uuid, path: &Path) -> Result<AttachmentSummary> {
        let table = parse_uploaded_file(path).await?;

        let handle = self.sessions.open(session_id).await?;
        let mut session = handle.lock().await;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        session.history.push_user(format!(
            "Uploaded file {}:\n{}",
            file_name,
            table.summarize_for_llm()
        ));

        let cached_as = if table.has_price_columns() {
            match table.to_price_series() {
                Ok(series) => {
                    let key = series.ticker.clone();
                    session.context.insert_series(series);
                    Some(key)
                }
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Table has price columns but no usable rows");
                    None
                }
            }
        } else {
            None
        };

        info!(session = %session_id, file = %file_name, rows = table.row_count, ?cached_as, "File attached");
        Ok(AttachmentSummary {
            name: table.name,
            row_count: table.row_count,
            columns: table.columns,
            cached_as,
        })
    }

    pub async fn history(&self, session_id: Uuid) -> Result<Option<Vec<ConversationMessage>>> {
        let Some(handle) = self.sessions.get(session_id).await? else {
            return Ok(None);
        };
        let session = handle.lock().await;
        Ok(Some(session.history.messages().cloned().collect()))
    }

    pub async fn reset(&self, session_id: Uuid) -> Result<bool> {
        self.sessions.remove(session_id).await
    }
}

/// Assistant message recorded in history; chart-only turns get a short note
fn history_entry(result: &TurnResult) -> String {
    let reply = result.reply().trim();
    if !reply.is_empty() {
        return reply.to_string();
    }

    match result.report() {
        Some(report) if !report.charts.is_empty() => {
            let titles: Vec<&str> = report.charts.iter().map(|c| c.title.as_str()).collect();
            format!("[Displayed charts: {}]", titles.join(", "))
        }
        _ => "[No findings to report]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::llm::ScriptedModel;
    use crate::graph::TurnOutcome;
    use crate::error::AssistantError;
    use crate::memory::{ConversationHistory, MessageRole};
    use crate::models::{FinalReport, Plan, SynthesisMode};
    use crate::planner::PlannerOutcome;
    use crate::session::SessionContext;
    use crate::testing::{CountingMarket, RecordingMailer, StaticSearch};

    fn assistant(model: ScriptedModel) -> (ResearchAssistant, Arc<CountingMarket>) {
        let market = Arc::new(CountingMarket::with_tickers(&["NVDA", "AMD"]));
        let tools = Toolbox::new(
            market.clone(),
            Arc::new(StaticSearch::default()),
            Arc::new(RecordingMailer::default()),
        );
        let supervisor = Supervisor::new(Arc::new(model), tools, SupervisorConfig::default());
        let graph = ResearchGraph::new(Box::new(KeywordPlanner::default()), supervisor);
        (
            ResearchAssistant::new(graph, Arc::new(InMemorySessionStore::new())),
            market,
        )
    }

    #[tokio::test]
    async fn test_turns_share_history_and_cache() {
        let (assistant, market) = assistant(ScriptedModel::new().reply("first").reply("second"));
        let id = Uuid::new_v4();

        assistant.handle_message(id, "Analyze NVDA stock").await.unwrap();
        let second = assistant.handle_message(id, "How is NVDA doing?").await.unwrap();

        assert_eq!(market.calls("NVDA"), 1);
        assert_eq!(second.report().unwrap().steps[0].output, "Using existing market data for NVDA");

        let history = assistant.history(id).await.unwrap().unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[3].content, "second");
    }

    #[tokio::test]
    async fn test_attached_prices_feed_chart() {
        let (assistant, market) = assistant(ScriptedModel::new());
        let id = Uuid::new_v4();
        let dir = std::env::temp_dir().join(format!("attach-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("msft.csv");
        tokio::fs::write(&path, "Date,Close\n2024-01-02,370.87\n2024-01-03,370.6\n")
            .await
            .unwrap();

        let summary = assistant.attach_file(id, &path).await.unwrap();
        assert_eq!(summary.cached_as.as_deref(), Some("MSFT"));
        assert_eq!(summary.row_count, 2);

        let result = assistant.handle_message(id, "plot MSFT").await.unwrap();
        let report = result.report().unwrap();
        assert_eq!(market.calls("MSFT"), 0);
        assert_eq!(report.charts.len(), 1);
        assert_eq!(report.charts[0].key, "MSFT");
        // no model replies scripted, so the report degrades to raw results
        assert_eq!(report.synthesis, SynthesisMode::RawFallback);

        let history = assistant.history(id).await.unwrap().unwrap();
        assert!(history[0].content.starts_with("Uploaded file msft.csv"));
        assert!(history.last().unwrap().content.starts_with("### Step 1"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_history_entry_for_chart_only_turn() {
        let chart = crate::tools::build_chart("NVDA", "Date,Close\n2024-01-02,1.0\n").unwrap();
        let result = TurnResult {
            outcome: TurnOutcome::Report {
                plan: Plan::new(Vec::new()),
                report: FinalReport {
                    text: String::new(),
                    charts: vec![chart],
                    sources: Vec::new(),
                    steps: Vec::new(),
                    synthesis: SynthesisMode::Skipped,
                },
            },
            context: SessionContext::new(),
            reasoning_trace: Vec::new(),
            execution_time_ms: 0,
        };
        assert_eq!(history_entry(&result), "[Displayed charts: NVDA Analysis (Line)]");
    }

    struct BrokenPlanner;

    #[async_trait::async_trait]
    impl Planner for BrokenPlanner {
        async fn plan(&self, _history: &ConversationHistory) -> Result<PlannerOutcome> {
            Err(AssistantError::Planning("planner offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_history_balanced() {
        let tools = Toolbox::new(
            Arc::new(CountingMarket::with_tickers(&["NVDA"])),
            Arc::new(StaticSearch::default()),
            Arc::new(RecordingMailer::default()),
        );
        let supervisor = Supervisor::new(
            Arc::new(ScriptedModel::new()),
            tools,
            SupervisorConfig::default(),
        );
        let assistant = ResearchAssistant::new(
            ResearchGraph::new(Box::new(BrokenPlanner), supervisor),
            Arc::new(InMemorySessionStore::new()),
        );
        let id = Uuid::new_v4();

        assert!(assistant.handle_message(id, "Analyze NVDA stock").await.is_err());

        let history = assistant.history(id).await.unwrap().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert!(history[1].content.contains("planner offline"));
    }

    #[tokio::test]
    async fn test_reset_forgets_session() {
        let (assistant, _) = assistant(ScriptedModel::new());
        let id = Uuid::new_v4();
        assistant.handle_message(id, "hello").await.unwrap();

        assert!(assistant.reset(id).await.unwrap());
        assert!(assistant.history(id).await.unwrap().is_none());
    }
}
