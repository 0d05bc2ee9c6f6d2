//! Tool adapters
//!
//! Every external capability sits behind a trait so the supervisor can run
//! against live providers or deterministic fakes. Adapters return `Result`
//! values; the supervisor decides how failures surface in the report.

use crate::config::AppConfig;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod chart;
pub mod email;
pub mod file_parser;
pub mod market;
pub mod search;

pub use chart::{build_chart, build_comparison_chart, ChartArtifact, ChartKind};
pub use email::SmtpMailer;
pub use market::{PriceRow, PriceSeries, YahooMarketData};
pub use search::DuckDuckGoSearch;

/// Daily price history provider
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_prices(&self, ticker: &str, lookback_days: u32) -> Result<PriceSeries>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
    /// Fetch each result page and replace the snippet with its text
    pub fetch_content: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Outbound mail. Returns a human-readable confirmation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}

/// The adapters one supervisor runs with
#[derive(Clone)]
pub struct Toolbox {
    pub market: Arc<dyn MarketDataSource>,
    pub search: Arc<dyn SearchProvider>,
    pub mailer: Arc<dyn Mailer>,
}

impl Toolbox {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        search: Arc<dyn SearchProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            market,
            search,
            mailer,
        }
    }

    /// Live adapters built from configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            market: Arc::new(YahooMarketData::new(config.market.base_url.clone())),
            search: Arc::new(DuckDuckGoSearch::new(config.search.endpoint.clone())),
            mailer: Arc::new(SmtpMailer::new(config.email.clone())),
        }
    }
}
