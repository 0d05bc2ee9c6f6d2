use clap::Parser;
use financial_research_assistant::{
    assistant::ResearchAssistant,
    config::AppConfig,
    execution::ExecutionEvent,
    graph::{GraphEvent, TurnResult},
    models::ExecutionStatus,
    stream::{stream_text, DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_DELAY},
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const WELCOME: &str = "Financial research assistant
Ask about stocks and crypto, request charts (\"show me NVDA chart\"), or have a report emailed.
Commands: /attach <file.csv>, /reset, quit";

#[derive(Parser, Debug)]
#[command(name = "assistant", about = "Interactive financial research assistant")]
struct Cli {
    /// Use the keyword planner even when a model key is configured
    #[arg(long)]
    offline: bool,

    /// Directory where chart pages are written
    #[arg(long, value_name = "DIR", default_value = "charts")]
    export_dir: PathBuf,

    /// Resume or name a session (defaults to a fresh one)
    #[arg(long)]
    session: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let assistant = ResearchAssistant::from_config(&config, cli.offline);
    let mut session_id = cli.session.unwrap_or_else(Uuid::new_v4);

    info!(session = %session_id, offline = cli.offline, "Assistant ready");
    println!("{}\n", WELCOME);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => break,
            "/reset" => {
                assistant.reset(session_id).await?;
                session_id = Uuid::new_v4();
                println!("Conversation cleared.\n");
            }
            _ if input.starts_with("/attach") => {
                let path = input.trim_start_matches("/attach").trim();
                if path.is_empty() {
                    println!("Usage: /attach <file.csv>\n");
                    continue;
                }
                match assistant.attach_file(session_id, Path::new(path)).await {
                    Ok(summary) => {
                        println!(
                            "Attached {} ({} rows, columns: {})",
                            summary.name,
                            summary.row_count,
                            summary.columns.join(", ")
                        );
                        if let Some(ticker) = summary.cached_as {
                            println!("Cached as price data for {}", ticker);
                        }
                        println!();
                    }
                    Err(e) => println!("Could not attach {}: {}\n", path, e),
                }
            }
            message => {
                if let Err(e) = run_turn(&assistant, session_id, message, &cli.export_dir).await {
                    error!(error = %e, "Turn failed");
                    println!("Sorry, something went wrong: {}\n", e);
                }
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn run_turn(
    assistant: &ResearchAssistant,
    session_id: Uuid,
    message: &str,
    export_dir: &Path,
) -> financial_research_assistant::Result<()> {
    let (tx, mut rx) = unbounded_channel();

    let turn = async {
        let result = assistant
            .handle_message_with_events(session_id, message, Some(&tx))
            .await;
        drop(tx);
        result
    };
    let progress = async {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    };
    let (result, ()) = tokio::join!(turn, progress);
    let result = result?;

    print_reply(&result).await;
    print_artifacts(&result, export_dir).await;
    Ok(())
}

fn print_event(event: &GraphEvent) {
    match event {
        GraphEvent::Planned { steps, .. } if !steps.is_empty() => {
            println!("\nPlan:");
            for (i, step) in steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        GraphEvent::Planned { .. } => {}
        GraphEvent::Execution(ExecutionEvent::StepStarted {
            index,
            total,
            description,
        }) => println!("  [{}/{}] {}", index, total, description),
        GraphEvent::Execution(ExecutionEvent::StepCompleted(step)) => {
            if step.status != ExecutionStatus::Success {
                println!("        {:?}: {}", step.status, first_line(&step.output));
            }
        }
        GraphEvent::Execution(ExecutionEvent::Synthesizing) => println!("  Writing the answer..."),
    }
}

async fn print_reply(result: &TurnResult) {
    println!();
    let mut chunks = stream_text(result.reply().to_string(), DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_DELAY);
    while let Some(chunk) = chunks.recv().await {
        print!("{}", chunk);
        let _ = std::io::stdout().flush();
    }
    println!("\n");
}

async fn print_artifacts(result: &TurnResult, export_dir: &Path) {
    let Some(report) = result.report() else {
        return;
    };

    for chart in &report.charts {
        match chart.write_html(export_dir).await {
            Ok(path) => println!("Chart: {} -> {}", chart.title, path.display()),
            Err(e) => println!("Chart: {} (could not write file: {})", chart.title, e),
        }
    }

    if !report.sources.is_empty() {
        println!("Sources:");
        for source in &report.sources {
            println!("  - {} ({})", source.title, source.url);
        }
    }

    if !report.charts.is_empty() || !report.sources.is_empty() {
        println!();
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
