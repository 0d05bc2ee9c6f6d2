//! Deterministic adapters for unit tests

use crate::error::AssistantError;
use crate::tools::{
    Mailer, MarketDataSource, OutgoingEmail, PriceRow, PriceSeries, SearchHit, SearchProvider,
    SearchQuery,
};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;

pub fn sample_series(ticker: &str) -> PriceSeries {
    let rows = [(2, 100.0, 1_000), (3, 104.5, 1_200), (4, 102.25, 900)]
        .iter()
        .map(|(day, close, volume)| PriceRow {
            date: NaiveDate::from_ymd_opt(2024, 1, *day).unwrap(),
            close: *close,
            volume: *volume,
        })
        .collect();
    PriceSeries::new(ticker, rows)
}

/// Serves `sample_series` for known tickers and counts every fetch
#[derive(Default)]
pub struct CountingMarket {
    known: Vec<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingMarket {
    pub fn with_tickers(tickers: &[&str]) -> Self {
        Self {
            known: tickers.iter().map(|t| t.to_string()).collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, ticker: &str) -> usize {
        self.calls.lock().unwrap().get(ticker).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataSource for CountingMarket {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn fetch_prices(&self, ticker: &str, _lookback_days: u32) -> Result<PriceSeries> {
        *self.calls.lock().unwrap().entry(ticker.to_string()).or_insert(0) += 1;
        if self.known.iter().any(|k| k == ticker) {
            Ok(sample_series(ticker))
        } else {
            Err(AssistantError::NoData {
                ticker: ticker.to_string(),
            })
        }
    }
}

/// Two canned hits per query
#[derive(Default)]
pub struct StaticSearch;

#[async_trait]
impl SearchProvider for StaticSearch {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        Ok(vec![
            SearchHit {
                title: format!("{} - Reuters", query.query),
                url: "https://www.reuters.com/markets/example".to_string(),
                snippet: "Shares rose after earnings beat expectations.".to_string(),
            },
            SearchHit {
                title: format!("{} - Bloomberg", query.query),
                url: "https://www.bloomberg.com/news/example".to_string(),
                snippet: "Analysts raised price targets.".to_string(),
            },
        ]
        .into_iter()
        .take(query.max_results)
        .collect())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(format!("Successfully sent email to {}", email.recipient))
    }
}
