//! Chart builder
//!
//! Turns a CSV-like table into a renderable chart artifact. Artifacts render
//! to a Plotly figure (JSON) and to a standalone HTML page used for email
//! attachments and exports.

use crate::error::AssistantError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const COMPARISON_KEY: &str = "comparison";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Candlestick,
    Comparison,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChartTrace {
    Line {
        name: String,
        x: Vec<String>,
        y: Vec<f64>,
    },
    Candlestick {
        name: String,
        x: Vec<String>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
    },
}

/// A renderable chart keyed by ticker or "comparison"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartArtifact {
    pub key: String,
    pub title: String,
    pub kind: ChartKind,
    pub traces: Vec<ChartTrace>,
}

impl ChartArtifact {
    /// Plotly figure (`data` + `layout`)
    pub fn to_plotly(&self) -> Value {
        let data: Vec<Value> = self
            .traces
            .iter()
            .map(|trace| match trace {
                ChartTrace::Line { name, x, y } => json!({
                    "type": "scatter",
                    "mode": "lines",
                    "name": name,
                    "x": x,
                    "y": y,
                }),
                ChartTrace::Candlestick {
                    name,
                    x,
                    open,
                    high,
                    low,
                    close,
                } => json!({
                    "type": "candlestick",
                    "name": name,
                    "x": x,
                    "open": open,
                    "high": high,
                    "low": low,
                    "close": close,
                }),
            })
            .collect();

        let mut layout = json!({
            "title": { "text": self.title },
            "template": "plotly_dark",
            "xaxis": { "title": { "text": "Date" } },
            "yaxis": { "title": { "text": if self.kind == ChartKind::Comparison { "Price (USD)" } else { "Price" } } },
        });
        if self.kind == ChartKind::Comparison {
            layout["hovermode"] = json!("x unified");
        }

        json!({ "data": data, "layout": layout })
    }

    /// Standalone page loading plotly.js from its CDN
    pub fn to_html(&self) -> String {
        let figure = self.to_plotly();
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="https://cdn.plot.ly/plotly-2.35.2.min.js"></script>
</head>
<body style="background:#111">
<div id="chart" style="width:100%;height:90vh"></div>
<script>
var figure = {figure};
Plotly.newPlot("chart", figure.data, figure.layout);
</script>
</body>
</html>
"#,
            title = html_escape(&self.title),
            figure = figure,
        )
    }

    pub fn file_name(&self) -> String {
        let safe: String = self
            .key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}_chart.html", safe)
    }

    pub async fn write_html(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, self.to_html()).await?;
        Ok(path)
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Parsed table: header row plus string cells
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(data: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(data.as_bytes());

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    fn text_column(&self, idx: usize) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.get(idx).cloned().unwrap_or_default())
            .collect()
    }

    /// Numeric column; `None` when any cell fails to parse
    fn numeric_column(&self, idx: usize) -> Option<Vec<f64>> {
        self.rows
            .iter()
            .map(|r| r.get(idx).and_then(|v| v.parse::<f64>().ok()))
            .collect()
    }
}

/// Build a single-ticker chart: candlestick for OHLC tables, line otherwise
pub fn build_chart(ticker: &str, data: &str) -> Result<ChartArtifact> {
    let table = Table::parse(data)?;

    if table.rows.is_empty() {
        return Err(AssistantError::Chart(format!(
            "No data available to chart for {}",
            ticker
        )));
    }

    let date = table.column("Date");
    let ohlc = (
        table.column("Open"),
        table.column("High"),
        table.column("Low"),
        table.column("Close"),
    );

    if let (Some(d), (Some(o), Some(h), Some(l), Some(c))) = (date, ohlc) {
        let numeric = |idx: usize, name: &str| {
            table.numeric_column(idx).ok_or_else(|| {
                AssistantError::Chart(format!("Non-numeric {} values for {}", name, ticker))
            })
        };
        return Ok(ChartArtifact {
            key: ticker.to_string(),
            title: format!("{} Analysis (Candlestick)", ticker),
            kind: ChartKind::Candlestick,
            traces: vec![ChartTrace::Candlestick {
                name: ticker.to_string(),
                x: table.text_column(d),
                open: numeric(o, "Open")?,
                high: numeric(h, "High")?,
                low: numeric(l, "Low")?,
                close: numeric(c, "Close")?,
            }],
        });
    }

    let (x_idx, y_idx) = match (date, ohlc.3) {
        (Some(d), Some(c)) => (d, c),
        _ => {
            let y_idx = (0..table.headers.len())
                .find(|i| table.numeric_column(*i).is_some())
                .ok_or_else(|| {
                    AssistantError::Chart(format!("No numeric data found in CSV for {}", ticker))
                })?;
            (0, y_idx)
        }
    };

    let y = table.numeric_column(y_idx).ok_or_else(|| {
        AssistantError::Chart(format!("Non-numeric Close values for {}", ticker))
    })?;

    Ok(ChartArtifact {
        key: ticker.to_string(),
        title: format!("{} Analysis (Line)", ticker),
        kind: ChartKind::Line,
        traces: vec![ChartTrace::Line {
            name: ticker.to_string(),
            x: table.text_column(x_idx),
            y,
        }],
    })
}

/// Overlay the Close series of several tickers on one chart
pub fn build_comparison_chart(tickers_data: &BTreeMap<String, String>) -> Result<ChartArtifact> {
    let mut traces = Vec::new();

    for (ticker, data) in tickers_data {
        let Ok(table) = Table::parse(data) else {
            continue;
        };
        let (Some(d), Some(c)) = (table.column("Date"), table.column("Close")) else {
            continue;
        };
        if table.rows.is_empty() {
            continue;
        }
        if let Some(y) = table.numeric_column(c) {
            traces.push(ChartTrace::Line {
                name: ticker.clone(),
                x: table.text_column(d),
                y,
            });
        }
    }

    if traces.is_empty() {
        return Err(AssistantError::Chart("No valid data to compare".to_string()));
    }

    let names: Vec<&str> = tickers_data.keys().map(String::as_str).collect();
    Ok(ChartArtifact {
        key: COMPARISON_KEY.to_string(),
        title: format!("Stock Comparison: {}", names.join(", ")),
        kind: ChartKind::Comparison,
        traces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOSE_TABLE: &str = "Date,Close,Volume\n2024-01-02,481.68,41125400\n2024-01-03,475.69,32230000\n";
    const OHLC_TABLE: &str =
        "Date,Open,High,Low,Close\n2024-01-02,492.4,492.9,475.9,481.7\n2024-01-03,474.8,481.8,473.0,475.7\n";

    #[test]
    fn test_close_table_builds_line_chart() {
        let chart = build_chart("NVDA", CLOSE_TABLE).unwrap();
        assert_eq!(chart.kind, ChartKind::Line);
        assert_eq!(chart.key, "NVDA");
        match &chart.traces[0] {
            ChartTrace::Line { x, y, .. } => {
                assert_eq!(x[0], "2024-01-02");
                assert_eq!(y, &vec![481.68, 475.69]);
            }
            other => panic!("unexpected trace {:?}", other),
        }
    }

    #[test]
    fn test_ohlc_table_builds_candlestick() {
        let chart = build_chart("NVDA", OHLC_TABLE).unwrap();
        assert_eq!(chart.kind, ChartKind::Candlestick);
        assert_eq!(chart.title, "NVDA Analysis (Candlestick)");
        let figure = chart.to_plotly();
        assert_eq!(figure["data"][0]["type"], "candlestick");
        assert_eq!(figure["layout"]["template"], "plotly_dark");
    }

    #[test]
    fn test_empty_table_is_error() {
        let err = build_chart("NVDA", "Date,Close\n").unwrap_err();
        assert!(err.to_string().contains("No data available to chart for NVDA"));
    }

    #[test]
    fn test_numeric_fallback_and_non_numeric_error() {
        let chart = build_chart("FUND", "Month,Label,Value\nJan,a,1.5\nFeb,b,2.5\n").unwrap();
        match &chart.traces[0] {
            ChartTrace::Line { x, y, .. } => {
                assert_eq!(x, &vec!["Jan".to_string(), "Feb".to_string()]);
                assert_eq!(y, &vec![1.5, 2.5]);
            }
            other => panic!("unexpected trace {:?}", other),
        }

        let err = build_chart("TXT", "Name,Note\nx,y\n").unwrap_err();
        assert!(err.to_string().contains("No numeric data"));
    }

    #[test]
    fn test_comparison_overlays_each_ticker() {
        let mut data = BTreeMap::new();
        data.insert("AMD".to_string(), CLOSE_TABLE.to_string());
        data.insert("NVDA".to_string(), CLOSE_TABLE.to_string());

        let chart = build_comparison_chart(&data).unwrap();
        assert_eq!(chart.key, COMPARISON_KEY);
        assert_eq!(chart.traces.len(), 2);
        assert_eq!(chart.title, "Stock Comparison: AMD, NVDA");
        assert_eq!(chart.to_plotly()["layout"]["hovermode"], "x unified");
    }

    #[test]
    fn test_comparison_without_valid_data() {
        let mut data = BTreeMap::new();
        data.insert("AMD".to_string(), "Date,Close\n".to_string());
        assert!(build_comparison_chart(&data).is_err());
    }

    #[test]
    fn test_html_export_embeds_figure() {
        let chart = build_chart("BTC-USD", CLOSE_TABLE).unwrap();
        let html = chart.to_html();
        assert!(html.contains("Plotly.newPlot"));
        assert!(html.contains("BTC-USD Analysis (Line)"));
        assert_eq!(chart.file_name(), "BTC-USD_chart.html");
    }
}
