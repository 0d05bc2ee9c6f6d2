use financial_research_assistant::{api::start_server, assistant::ResearchAssistant, config::AppConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    if !config.has_llm_key() {
        warn!("GEMINI_API_KEY not set, see .env.example");
    }
    if config.email.is_none() {
        warn!("EMAIL_USER / EMAIL_PASSWORD not set, email steps will report a configuration error");
    }

    info!("Financial research assistant - API server");
    info!("Port: {}", config.api_port);

    let assistant = Arc::new(ResearchAssistant::from_config(&config, false));
    start_server(assistant, config.api_port).await?;

    Ok(())
}
