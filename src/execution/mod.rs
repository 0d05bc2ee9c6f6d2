//! Supervisor: sequential plan execution and final synthesis
//!
//! Steps run strictly in order against a session context that is passed in
//! and handed back. A failing step is recorded and the loop moves on; no
//! step failure aborts the plan.

use crate::config::SupervisorConfig;
use crate::error::AssistantError;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::{
    render_results, ExecutionStatus, FinalReport, Plan, PlanStep, Source, StepResult,
    SynthesisMode, ToolCall, ToolKind,
};
use crate::routing::{StepRouter, DEFAULT_EMAIL_SUBJECT};
use crate::session::SessionContext;
use crate::tools::search::{format_hits, hits_to_sources};
use crate::tools::{
    build_chart, build_comparison_chart, ChartArtifact, EmailAttachment, OutgoingEmail,
    SearchQuery, Toolbox,
};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const SYNTHESIS_PROMPT: &str = r#"You are a financial analyst. I've gathered the following information:

{findings}

Based on this data, write a clear, concise summary for the user. Include:
1. Key findings from the data
2. Important news highlights
3. Actionable insights

Write in a professional but conversational tone. Be specific with numbers.
Do not mention tool logs or data-collection mechanics such as "fetched N rows",
"using existing market data" or "chart generated"; charts are shown separately."#;

const EMAIL_BODY_PROMPT: &str = r#"Write the body of a short email report for a client based on these research findings.
Plain text, a greeting, three to six short paragraphs, no subject line, no tool logs.

{findings}"#;

const TRUNCATION_MARKER: &str = "\n\n[... additional results truncated]";
const NO_RECIPIENT_ERROR: &str =
    "Error: no recipient email address could be resolved for this step; email not sent.";

/// Progress notifications emitted while a plan runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    StepStarted {
        index: usize,
        total: usize,
        description: String,
    },
    StepCompleted(StepResult),
    Synthesizing,
}

/// What one tool dispatch produced
struct StepOutcome {
    status: ExecutionStatus,
    output: String,
}

impl StepOutcome {
    fn success(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: output.into(),
        }
    }

    fn failed(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output: output.into(),
        }
    }

    fn skipped(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Skipped,
            output: output.into(),
        }
    }
}

/// Accumulators scoped to one turn
#[derive(Default)]
struct Turn {
    results: Vec<StepResult>,
    sources: Vec<Source>,
    charts: Vec<ChartArtifact>,
}

impl Turn {
    fn add_sources(&mut self, sources: Vec<Source>) {
        for source in sources {
            if !self.sources.iter().any(|s| s.url == source.url) {
                self.sources.push(source);
            }
        }
    }
}

pub struct Supervisor {
    router: StepRouter,
    model: Arc<dyn LanguageModel>,
    tools: Toolbox,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Toolbox, config: SupervisorConfig) -> Self {
        Self {
            router: StepRouter::new(model.clone()),
            model,
            tools,
            config,
        }
    }

    pub async fn execute(&self, plan: &Plan, context: SessionContext) -> (FinalReport, SessionContext) {
        self.execute_with_events(plan, context, None).await
    }

    /// Run every step in order, then synthesize. Always yields one result per step.
    pub async fn execute_with_events(
        &self,
        plan: &Plan,
        mut context: SessionContext,
        events: Option<&UnboundedSender<ExecutionEvent>>,
    ) -> (FinalReport, SessionContext) {
        let emit = |event: ExecutionEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        let total = plan.len();
        let mut turn = Turn::default();

        info!(plan_id = %plan.plan_id, steps = total, "Executing plan");

        for (i, step) in plan.steps.iter().enumerate() {
            let index = i + 1;
            emit(ExecutionEvent::StepStarted {
                index,
                total,
                description: step.description.clone(),
            });

            let result = self.run_step(index, step, &mut context, &mut turn).await;
            emit(ExecutionEvent::StepCompleted(result.clone()));
            turn.results.push(result);
        }

        emit(ExecutionEvent::Synthesizing);
        let (text, synthesis) = self.synthesize(&turn).await;

        let report = FinalReport {
            text,
            charts: turn.charts,
            sources: turn.sources,
            steps: turn.results,
            synthesis,
        };
        (report, context)
    }

    async fn run_step(
        &self,
        index: usize,
        step: &PlanStep,
        context: &mut SessionContext,
        turn: &mut Turn,
    ) -> StepResult {
        let start = Instant::now();
        let decision = self.router.route(step).await;
        let label = decision.call.label();

        info!(step = index, tool = %label, route = ?decision.source, "Routing step");

        let outcome = match self.dispatch(&decision.call, context, turn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(step = index, tool = %label, error = %e, "Step failed");
                StepOutcome::failed(format!("Error: {}", e))
            }
        };

        debug!(step = index, status = ?outcome.status, "Step finished");

        StepResult {
            index,
            description: step.description.clone(),
            tool: label,
            route: decision.source,
            status: outcome.status,
            output: outcome.output,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        context: &mut SessionContext,
        turn: &mut Turn,
    ) -> Result<StepOutcome> {
        match call {
            ToolCall::Market { tickers } => Ok(self.run_market(tickers, context).await),
            ToolCall::Search { query } => self.run_search(query, turn).await,
            ToolCall::Chart { tickers } => self.run_chart(tickers, context, turn),
            ToolCall::Email { recipient, subject } => {
                self.run_email(recipient.as_deref(), subject.as_deref(), context, turn)
                    .await
            }
            ToolCall::Logic { .. } => Ok(StepOutcome::skipped("(Logic tool not yet implemented)")),
            ToolCall::Unsupported { tool } => {
                debug!(%tool, "No tool for routed tag");
                Ok(StepOutcome::skipped("(No suitable tool found for this step)"))
            }
        }
    }

    /// Fetch each ticker not already cached; per-ticker failures are inlined
    async fn run_market(&self, tickers: &[String], context: &mut SessionContext) -> StepOutcome {
        if tickers.is_empty() {
            return StepOutcome::failed("Error: No ticker found");
        }

        let mut sections = Vec::with_capacity(tickers.len());
        let mut any_ok = false;

        for ticker in tickers {
            if context.has_ticker(ticker) {
                debug!(%ticker, "Market data already cached");
                sections.push(format!("Using existing market data for {}", ticker));
                any_ok = true;
                continue;
            }

            info!(%ticker, provider = self.tools.market.name(), "Fetching market data");
            let fetched = self
                .tools
                .market
                .fetch_prices(ticker, self.config.lookback_days)
                .await
                .and_then(|series| series.to_csv().map(|csv| (series, csv)));

            match fetched {
                Ok((series, csv)) => {
                    sections.push(format!(
                        "Fetched {} days of price data for {}.\n{}\n\n{}",
                        series.len(),
                        ticker,
                        series.summary(),
                        csv.trim_end()
                    ));
                    context.insert_series(series);
                    any_ok = true;
                }
                Err(e) => {
                    warn!(%ticker, error = %e, "Market fetch failed");
                    sections.push(e.to_string());
                }
            }
        }

        let output = sections.join("\n\n");
        if any_ok {
            StepOutcome::success(output)
        } else {
            StepOutcome::failed(output)
        }
    }

    async fn run_search(&self, query: &str, turn: &mut Turn) -> Result<StepOutcome> {
        let request = SearchQuery {
            query: query.to_string(),
            max_results: self.config.search_max_results,
            fetch_content: self.config.search_fetch_content,
        };

        info!(query = %query, provider = self.tools.search.name(), "Searching");
        let hits = self.tools.search.search(&request).await?;
        turn.add_sources(hits_to_sources(&hits));
        Ok(StepOutcome::success(format_hits(&hits)))
    }

    /// Chart the requested tickers that are cached; several become one overlay
    fn run_chart(
        &self,
        tickers: &[String],
        context: &mut SessionContext,
        turn: &mut Turn,
    ) -> Result<StepOutcome> {
        let available: Vec<String> = if tickers.is_empty() {
            context.tickers()
        } else {
            tickers
                .iter()
                .filter(|t| context.has_ticker(t))
                .cloned()
                .collect()
        };

        if available.is_empty() {
            let wanted = if tickers.is_empty() {
                "any ticker".to_string()
            } else {
                tickers.join(", ")
            };
            return Ok(StepOutcome::skipped(format!(
                "Note: Chart skipped - no market data for {}",
                wanted
            )));
        }

        let mut tables = BTreeMap::new();
        for ticker in &available {
            if let Some(series) = context.market_data.get(ticker) {
                tables.insert(ticker.clone(), series.to_csv()?);
            }
        }

        let chart = if tables.len() > 1 {
            build_comparison_chart(&tables)?
        } else {
            let (ticker, csv) = tables
                .iter()
                .next()
                .ok_or_else(|| AssistantError::Chart("no cached table".to_string()))?;
            build_chart(ticker, csv)?
        };

        info!(key = %chart.key, kind = ?chart.kind, "Chart generated");
        let output = format!("Interactive chart generated for {}", chart.title);
        turn.charts.retain(|c| c.key != chart.key);
        turn.charts.push(chart.clone());
        context.add_chart(chart);
        Ok(StepOutcome::success(output))
    }

    async fn run_email(
        &self,
        recipient: Option<&str>,
        subject: Option<&str>,
        context: &SessionContext,
        turn: &Turn,
    ) -> Result<StepOutcome> {
        let Some(recipient) = recipient else {
            warn!("Email step has no recipient, not sending");
            return Ok(StepOutcome::failed(NO_RECIPIENT_ERROR));
        };

        let body = self.write_email_body(&turn.results).await;
        let email = OutgoingEmail {
            recipient: recipient.to_string(),
            subject: subject.unwrap_or(DEFAULT_EMAIL_SUBJECT).to_string(),
            body,
            attachments: session_attachments(context)?,
        };

        info!(%recipient, attachments = email.attachments.len(), "Sending email");
        let confirmation = self.tools.mailer.send(&email).await?;
        Ok(StepOutcome::success(confirmation))
    }

    async fn write_email_body(&self, results: &[StepResult]) -> String {
        let findings = render_results(results);
        if findings.is_empty() {
            return "Please find the requested financial analysis attached.".to_string();
        }

        let prompt = EMAIL_BODY_PROMPT.replace(
            "{findings}",
            &truncate(&findings, self.config.synthesis_max_chars),
        );
        match self
            .model
            .complete(CompletionRequest::new().user(prompt).temperature(0.3))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => findings,
            Err(e) => {
                warn!(error = %e, "Email body generation failed, sending raw findings");
                findings
            }
        }
    }

    /// Final narrative: one attempt, one shorter retry, then the raw results
    async fn synthesize(&self, turn: &Turn) -> (String, SynthesisMode) {
        if turn.results.is_empty() {
            return (String::new(), SynthesisMode::Skipped);
        }

        let has_findings = turn.results.iter().any(|r| {
            r.status == ExecutionStatus::Success
                && r.tool != ToolKind::Chart.as_str()
                && r.tool != ToolKind::Market.as_str()
        });
        if !turn.charts.is_empty() && !has_findings {
            info!(charts = turn.charts.len(), "Chart-only turn, skipping synthesis");
            return (String::new(), SynthesisMode::Skipped);
        }

        let findings = render_results(&turn.results);
        let limits = [
            (self.config.synthesis_max_chars, SynthesisMode::Model),
            ((self.config.synthesis_max_chars / 4).max(1), SynthesisMode::Retried),
        ];

        for (max_chars, mode) in limits {
            let prompt = SYNTHESIS_PROMPT.replace("{findings}", &truncate(&findings, max_chars));
            match self
                .model
                .complete(CompletionRequest::new().user(prompt).temperature(0.3).max_output_tokens(2048))
                .await
            {
                Ok(text) if !text.trim().is_empty() => {
                    info!(mode = ?mode, "Synthesis complete");
                    return (text.trim().to_string(), mode);
                }
                Ok(_) => warn!(mode = ?mode, "Synthesis returned empty text"),
                Err(e) => warn!(mode = ?mode, error = %e, "Synthesis failed"),
            }
        }

        warn!("Synthesis failed twice, returning raw step results");
        (findings, SynthesisMode::RawFallback)
    }
}

/// Every session chart as an HTML page and every cached series as CSV
fn session_attachments(context: &SessionContext) -> Result<Vec<EmailAttachment>> {
    let mut attachments = Vec::new();
    for chart in &context.charts {
        attachments.push(EmailAttachment {
            filename: chart.file_name(),
            content_type: "text/html; charset=utf-8".to_string(),
            body: chart.to_html().into_bytes(),
        });
    }
    for (ticker, series) in &context.market_data {
        attachments.push(EmailAttachment {
            filename: format!("{}_prices.csv", ticker),
            content_type: "text/csv".to_string(),
            body: series.to_csv()?.into_bytes(),
        });
    }
    Ok(attachments)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::RouteSource;
    use crate::testing::{sample_series, CountingMarket, RecordingMailer, StaticSearch};
    use crate::tools::ChartKind;

    struct Harness {
        market: Arc<CountingMarket>,
        mailer: Arc<RecordingMailer>,
        model: Arc<ScriptedModel>,
        supervisor: Supervisor,
    }

    fn harness(model: ScriptedModel) -> Harness {
        let market = Arc::new(CountingMarket::with_tickers(&["NVDA", "AMD"]));
        let mailer = Arc::new(RecordingMailer::default());
        let model = Arc::new(model);
        let tools = Toolbox::new(market.clone(), Arc::new(StaticSearch::default()), mailer.clone());
        let supervisor = Supervisor::new(model.clone(), tools, SupervisorConfig::default());
        Harness {
            market,
            mailer,
            model,
            supervisor,
        }
    }

    fn market(ticker: &str) -> PlanStep {
        PlanStep::structured(
            format!("Fetch market data for {}", ticker),
            ToolCall::Market {
                tickers: vec![ticker.to_string()],
            },
        )
    }

    fn chart(tickers: &[&str]) -> PlanStep {
        PlanStep::structured(
            "Generate a chart",
            ToolCall::Chart {
                tickers: tickers.iter().map(|t| t.to_string()).collect(),
            },
        )
    }

    #[tokio::test]
    async fn test_one_result_per_step_despite_failures() {
        let h = harness(ScriptedModel::new().reply("Summary"));
        let plan = Plan::new(vec![
            market("ZZZZ"),
            PlanStep::structured("Run the numbers", ToolCall::Logic { expression: None }),
            PlanStep::structured(
                "Do magic",
                ToolCall::Unsupported {
                    tool: "python".to_string(),
                },
            ),
            PlanStep::structured(
                "Email it",
                ToolCall::Email {
                    recipient: None,
                    subject: None,
                },
            ),
            market("NVDA"),
        ]);

        let (report, context) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.steps.len(), plan.len());
        let statuses: Vec<_> = report.steps.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Failed,
                ExecutionStatus::Skipped,
                ExecutionStatus::Skipped,
                ExecutionStatus::Failed,
                ExecutionStatus::Success,
            ]
        );
        assert!(report.steps[0].output.contains("No data found for 'ZZZZ'"));
        assert!(report.steps.iter().all(|r| r.route == RouteSource::Planner));
        assert!(context.has_ticker("NVDA"));
        assert_eq!(report.text, "Summary");
    }

    #[tokio::test]
    async fn test_cached_ticker_is_not_refetched() {
        let h = harness(ScriptedModel::new().reply("Summary"));
        let plan = Plan::new(vec![
            market("NVDA"),
            PlanStep::structured(
                "Search NVIDIA news",
                ToolCall::Search {
                    query: "NVIDIA news".to_string(),
                },
            ),
            market("NVDA"),
        ]);

        let (report, _) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(h.market.calls("NVDA"), 1);
        assert_eq!(report.steps[2].output, "Using existing market data for NVDA");
        assert_eq!(report.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_survives_across_turns() {
        let h = harness(ScriptedModel::new().reply("one").reply("two"));
        let plan = Plan::new(vec![market("AMD")]);

        let (_, context) = h.supervisor.execute(&plan, SessionContext::new()).await;
        let (_, context) = h.supervisor.execute(&plan, context).await;
        assert_eq!(h.market.calls("AMD"), 1);
        assert!(context.has_ticker("AMD"));
    }

    #[tokio::test]
    async fn test_email_without_recipient_never_sends() {
        let h = harness(ScriptedModel::new().reply("Summary"));
        let plan = Plan::new(vec![PlanStep::text("Email the report")]);

        let (report, _) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.steps[0].status, ExecutionStatus::Failed);
        assert!(report.steps[0].output.contains("no recipient"));
        assert_eq!(report.steps[0].route, RouteSource::Keywords);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_email_attaches_session_artifacts() {
        // email body, then synthesis
        let h = harness(ScriptedModel::new().reply("Dear client, NVDA rose.").reply("Summary"));
        let mut context = SessionContext::new();
        context.insert_series(sample_series("NVDA"));
        let plan = Plan::new(vec![
            chart(&["NVDA"]),
            PlanStep::structured(
                "Email the report",
                ToolCall::Email {
                    recipient: Some("ann@example.com".to_string()),
                    subject: None,
                },
            ),
        ]);

        let (report, _) = h.supervisor.execute(&plan, context).await;
        assert_eq!(report.steps[1].status, ExecutionStatus::Success);

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, DEFAULT_EMAIL_SUBJECT);
        assert_eq!(sent[0].body, "Dear client, NVDA rose.");
        let names: Vec<_> = sent[0].attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["NVDA_chart.html", "NVDA_prices.csv"]);
    }

    #[tokio::test]
    async fn test_chart_after_fetch_yields_single_artifact() {
        let h = harness(ScriptedModel::new());
        let plan = Plan::new(vec![market("NVDA"), chart(&["NVDA"])]);

        let (report, context) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.charts.len(), 1);
        assert_eq!(report.charts[0].key, "NVDA");
        assert_eq!(report.charts[0].kind, ChartKind::Line);
        assert_eq!(context.charts.len(), 1);
        // chart-only turn skips the narrative entirely
        assert_eq!(report.synthesis, SynthesisMode::Skipped);
        assert!(report.text.is_empty());
        assert_eq!(h.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_cached_tickers_make_comparison() {
        let h = harness(ScriptedModel::new());
        let plan = Plan::new(vec![
            PlanStep::structured(
                "Fetch both",
                ToolCall::Market {
                    tickers: vec!["NVDA".to_string(), "AMD".to_string()],
                },
            ),
            chart(&["NVDA", "AMD"]),
        ]);

        let (report, _) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.charts.len(), 1);
        assert_eq!(report.charts[0].kind, ChartKind::Comparison);
    }

    #[tokio::test]
    async fn test_chart_without_data_is_skipped() {
        let h = harness(ScriptedModel::new().reply("Nothing to chart."));
        let plan = Plan::new(vec![chart(&["TSLA"])]);

        let (report, _) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.steps[0].status, ExecutionStatus::Skipped);
        assert!(report.steps[0].output.contains("no market data for TSLA"));
        assert!(report.charts.is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_retries_with_shorter_prompt() {
        let h = harness(ScriptedModel::new().fail("too long").reply("Short summary"));
        let plan = Plan::new(vec![market("NVDA")]);

        let (report, _) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.text, "Short summary");
        assert_eq!(report.synthesis, SynthesisMode::Retried);
        assert_eq!(h.model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_failing_twice_returns_raw_results() {
        let h = harness(ScriptedModel::new().fail("down").fail("still down"));
        let plan = Plan::new(vec![
            market("NVDA"),
            PlanStep::structured(
                "Search NVIDIA news",
                ToolCall::Search {
                    query: "NVIDIA news".to_string(),
                },
            ),
        ]);

        let (report, _) = h.supervisor.execute(&plan, SessionContext::new()).await;
        assert_eq!(report.synthesis, SynthesisMode::RawFallback);
        assert_eq!(report.text, render_results(&report.steps));
        assert!(report.text.starts_with("### Step 1: Fetch market data for NVDA"));
    }

    #[tokio::test]
    async fn test_events_follow_step_order() {
        let h = harness(ScriptedModel::new().reply("Summary"));
        let plan = Plan::new(vec![market("NVDA"), market("AMD")]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        h.supervisor
            .execute_with_events(&plan, SessionContext::new(), Some(&tx))
            .await;
        drop(tx);

        let mut started = Vec::new();
        let mut saw_synthesis = false;
        while let Some(event) = rx.recv().await {
            match event {
                ExecutionEvent::StepStarted { index, total, .. } => {
                    assert_eq!(total, 2);
                    started.push(index);
                }
                ExecutionEvent::Synthesizing => saw_synthesis = true,
                ExecutionEvent::StepCompleted(_) => {}
            }
        }
        assert_eq!(started, vec![1, 2]);
        assert!(saw_synthesis);
    }

    #[test]
    fn test_truncate_marks_cut() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate("abcdef", 3);
        assert!(cut.starts_with("abc"));
        assert!(cut.ends_with("truncated]"));
    }
}
