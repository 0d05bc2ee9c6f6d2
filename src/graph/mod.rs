//! Control graph - one conversation turn
//!
//! PLAN → (ambiguous? → END) → EXECUTE → SYNTHESIZE → END

use crate::execution::{ExecutionEvent, Supervisor};
use crate::memory::ConversationHistory;
use crate::models::{FinalReport, Intent, Plan};
use crate::planner::{Planner, PlannerOutcome};
use crate::session::SessionContext;
use crate::Result;
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::info;

#[derive(Debug, Clone)]
pub enum GraphEvent {
    Planned { intent: Intent, steps: Vec<String> },
    Execution(ExecutionEvent),
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The planner answered directly (small talk or a clarifying question)
    Clarification { intent: Intent, question: String },
    Report { plan: Plan, report: FinalReport },
}

#[derive(Debug, Clone)]
pub struct TurnResult {
    pub outcome: TurnOutcome,
    /// Session cache to carry into the next turn
    pub context: SessionContext,
    pub reasoning_trace: Vec<String>,
    pub execution_time_ms: u64,
}

impl TurnResult {
    /// Text shown to the user for this turn
    pub fn reply(&self) -> &str {
        match &self.outcome {
            TurnOutcome::Clarification { question, .. } => question,
            TurnOutcome::Report { report, .. } => &report.text,
        }
    }

    pub fn report(&self) -> Option<&FinalReport> {
        match &self.outcome {
            TurnOutcome::Report { report, .. } => Some(report),
            TurnOutcome::Clarification { .. } => None,
        }
    }

    pub fn plan(&self) -> Option<&Plan> {
        match &self.outcome {
            TurnOutcome::Report { plan, .. } => Some(plan),
            TurnOutcome::Clarification { .. } => None,
        }
    }
}

pub struct ResearchGraph {
    planner: Box<dyn Planner>,
    supervisor: Supervisor,
}

impl ResearchGraph {
    pub fn new(planner: Box<dyn Planner>, supervisor: Supervisor) -> Self {
        Self {
            planner,
            supervisor,
        }
    }

    pub async fn run_turn(
        &self,
        history: &ConversationHistory,
        context: SessionContext,
    ) -> Result<TurnResult> {
        self.run_turn_with_events(history, context, None).await
    }

    pub async fn run_turn_with_events(
        &self,
        history: &ConversationHistory,
        context: SessionContext,
        events: Option<&UnboundedSender<GraphEvent>>,
    ) -> Result<TurnResult> {
        let start = Instant::now();
        let mut reasoning_trace = Vec::new();

        // === PLAN ===
        let outcome = self.planner.plan(history).await?;

        let plan = match outcome {
            PlannerOutcome::Ambiguous { intent, question } => {
                reasoning_trace.push(format!("PLAN: {:?} - answering without tools", intent));
                if let Some(tx) = events {
                    let _ = tx.send(GraphEvent::Planned {
                        intent,
                        steps: Vec::new(),
                    });
                }
                info!(?intent, "Turn ends at planner");
                return Ok(TurnResult {
                    outcome: TurnOutcome::Clarification { intent, question },
                    context,
                    reasoning_trace,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                });
            }
            PlannerOutcome::Actionable(plan) => plan,
        };

        reasoning_trace.push(format!("PLAN: {} steps", plan.len()));
        if let Some(tx) = events {
            let _ = tx.send(GraphEvent::Planned {
                intent: Intent::Actionable,
                steps: plan.descriptions(),
            });
        }

        // === EXECUTE + SYNTHESIZE ===
        let executed = match events {
            None => self.supervisor.execute(&plan, context).await,
            Some(outer) => self.execute_forwarding(&plan, context, outer).await,
        };

        Ok(finish(plan, executed, reasoning_trace, start))
    }

    /// Run the supervisor while relaying its progress as graph events
    async fn execute_forwarding(
        &self,
        plan: &Plan,
        context: SessionContext,
        outer: &UnboundedSender<GraphEvent>,
    ) -> (FinalReport, SessionContext) {
        let (tx, mut rx) = unbounded_channel();
        let run = async move {
            let result = self
                .supervisor
                .execute_with_events(plan, context, Some(&tx))
                .await;
            drop(tx);
            result
        };
        let forward = async {
            while let Some(event) = rx.recv().await {
                let _ = outer.send(GraphEvent::Execution(event));
            }
        };
        let (result, ()) = tokio::join!(run, forward);
        result
    }
}

fn finish(
    plan: Plan,
    (report, context): (FinalReport, SessionContext),
    mut reasoning_trace: Vec<String>,
    start: Instant,
) -> TurnResult {
    for step in &report.steps {
        reasoning_trace.push(format!(
            "EXECUTE: Step {} ({}) - {:?} in {} ms",
            step.index, step.tool, step.status, step.execution_time_ms
        ));
    }
    reasoning_trace.push(format!("SYNTHESIZE: {:?}", report.synthesis));

    let execution_time_ms = start.elapsed().as_millis() as u64;
    info!(
        plan_id = %plan.plan_id,
        steps = report.steps.len(),
        charts = report.charts.len(),
        execution_time_ms,
        "Turn complete"
    );

    TurnResult {
        outcome: TurnOutcome::Report { plan, report },
        context,
        reasoning_trace,
        execution_time_ms,
    }
}
