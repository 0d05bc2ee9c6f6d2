//! Market data adapter
//!
//! Daily price history from the Yahoo Finance chart API, exposed as a
//! `Date,Close,Volume` table.

use crate::error::AssistantError;
use crate::tools::MarketDataSource;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One daily row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Volume")]
    pub volume: u64,
}

/// Price history for one ticker, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub rows: Vec<PriceRow>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, rows: Vec<PriceRow>) -> Self {
        Self {
            ticker: ticker.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AssistantError::Market(format!("CSV export failed: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| AssistantError::Market(format!("CSV export failed: {}", e)))
    }

    /// Parse a table with at least `Date` and `Close` columns
    pub fn from_csv(ticker: impl Into<String>, data: &str) -> Result<Self> {
        let ticker = ticker.into();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(data.as_bytes());

        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let (Some(date_idx), Some(close_idx)) = (position("Date"), position("Close")) else {
            return Err(AssistantError::Market(format!(
                "Table for {} needs Date and Close columns",
                ticker
            )));
        };
        let volume_idx = position("Volume");

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let date = record
                .get(date_idx)
                .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d), "%Y-%m-%d").ok());
            let close = record.get(close_idx).and_then(|c| c.parse::<f64>().ok());
            let volume = volume_idx
                .and_then(|i| record.get(i))
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v.max(0.0) as u64)
                .unwrap_or(0);

            if let (Some(date), Some(close)) = (date, close) {
                rows.push(PriceRow { date, close, volume });
            }
        }

        if rows.is_empty() {
            return Err(AssistantError::NoData { ticker });
        }

        Ok(Self { ticker, rows })
    }

    /// Short human-readable statistics for the synthesis prompt
    pub fn summary(&self) -> String {
        let (Some(first), Some(last)) = (self.rows.first(), self.rows.last()) else {
            return format!("No rows for {}", self.ticker);
        };

        let high = self.rows.iter().map(|r| r.close).fold(f64::MIN, f64::max);
        let low = self.rows.iter().map(|r| r.close).fold(f64::MAX, f64::min);
        let change_pct = if first.close.abs() > f64::EPSILON {
            (last.close - first.close) / first.close * 100.0
        } else {
            0.0
        };
        let avg_volume =
            self.rows.iter().map(|r| r.volume as f64).sum::<f64>() / self.rows.len() as f64;

        format!(
            "{} from {} to {}: close {:.2} -> {:.2} ({:+.2}%), range {:.2}-{:.2}, average volume {:.0}",
            self.ticker, first.date, last.date, first.close, last.close, change_pct, low, high, avg_volume
        )
    }
}

/// Yahoo Finance chart API client
pub struct YahooMarketData {
    client: Client,
    base_url: String,
}

impl YahooMarketData {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .user_agent("Mozilla/5.0")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MarketDataSource for YahooMarketData {
    fn name(&self) -> &'static str {
        "yahoo_finance"
    }

    async fn fetch_prices(&self, ticker: &str, lookback_days: u32) -> Result<PriceSeries> {
        let ticker = ticker.trim().to_uppercase();
        let end = Utc::now();
        let start = end - ChronoDuration::days(i64::from(lookback_days));

        let url = format!("{}/{}", self.base_url, ticker);
        debug!(%ticker, lookback_days, "Fetching price history");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", start.timestamp().to_string()),
                ("period2", end.timestamp().to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await
            .map_err(|e| AssistantError::Market(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::Market(e.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AssistantError::NoData { ticker });
        }
        if !status.is_success() {
            return Err(AssistantError::Market(format!(
                "quote API returned {} for {}",
                status, ticker
            )));
        }

        parse_chart_response(&ticker, &body)
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

/// Turn a chart API payload into a price series
pub fn parse_chart_response(ticker: &str, body: &str) -> Result<PriceSeries> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;

    if let Some(error) = envelope.chart.error {
        if error.code.eq_ignore_ascii_case("Not Found") {
            return Err(AssistantError::NoData {
                ticker: ticker.to_string(),
            });
        }
        return Err(AssistantError::Market(format!(
            "{} - {}",
            error.code, error.description
        )));
    }

    let no_data = || AssistantError::NoData {
        ticker: ticker.to_string(),
    };

    let data = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(no_data)?;
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().ok_or_else(no_data)?;

    let rows: Vec<PriceRow> = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = quote.close.get(i).copied().flatten()?;
            let date = DateTime::<Utc>::from_timestamp(*ts, 0)?.date_naive();
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0);
            Some(PriceRow {
                date,
                close: (close * 100.0).round() / 100.0,
                volume,
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(no_data());
    }

    Ok(PriceSeries::new(ticker, rows))
}
