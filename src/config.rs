//! Environment-driven configuration
//!
//! Binaries call `dotenv::dotenv().ok()` first, then `AppConfig::from_env()`.

use crate::error::AssistantError;
use crate::Result;
use std::env;
use std::str::FromStr;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_MARKET_API_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub base_url: String,
    pub lookback_days: u32,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub max_results: usize,
    pub fetch_content: bool,
}

/// SMTP settings. Only present when both user and password are set.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub synthesis_max_chars: usize,
    pub lookback_days: u32,
    pub search_max_results: usize,
    pub search_fetch_content: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            synthesis_max_chars: 12_000,
            lookback_days: 30,
            search_max_results: 5,
            search_fetch_content: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub market: MarketConfig,
    pub search: SearchConfig,
    pub email: Option<EmailConfig>,
    pub synthesis_max_chars: usize,
    pub max_plan_steps: usize,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (environment, map, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let llm = LlmConfig {
            api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        };

        let market = MarketConfig {
            base_url: get("MARKET_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MARKET_API_BASE_URL.to_string()),
            lookback_days: parse_or("MARKET_LOOKBACK_DAYS", get("MARKET_LOOKBACK_DAYS"), 30)?,
        };

        let search = SearchConfig {
            endpoint: get("SEARCH_ENDPOINT").unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
            max_results: parse_or("SEARCH_MAX_RESULTS", get("SEARCH_MAX_RESULTS"), 5)?,
            fetch_content: parse_bool(get("SEARCH_FETCH_CONTENT")),
        };

        let email = match (get("EMAIL_USER"), get("EMAIL_PASSWORD")) {
            (Some(username), Some(password)) => Some(EmailConfig {
                host: get("EMAIL_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                port: parse_or("EMAIL_PORT", get("EMAIL_PORT"), 587)?,
                sender: get("EMAIL_FROM").unwrap_or_else(|| username.clone()),
                username,
                password,
            }),
            _ => None,
        };

        let api_port = parse_or("PORT", get("PORT").or_else(|| get("API_PORT")), 8080)?;

        Ok(Self {
            llm,
            market,
            search,
            email,
            synthesis_max_chars: parse_or("SYNTHESIS_MAX_CHARS", get("SYNTHESIS_MAX_CHARS"), 12_000)?,
            max_plan_steps: parse_or("MAX_PLAN_STEPS", get("MAX_PLAN_STEPS"), 8)?,
            api_port,
        })
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            synthesis_max_chars: self.synthesis_max_chars,
            lookback_days: self.market.lookback_days,
            search_max_results: self.search.max_results,
            search_fetch_content: self.search.fetch_content,
        }
    }

    pub fn has_llm_key(&self) -> bool {
        !self.llm.api_key.is_empty() && self.llm.api_key != "your_gemini_api_key_here"
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.parse().map_err(|_| {
            AssistantError::Config(format!("{} has an invalid value: {}", key, raw))
        }),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
