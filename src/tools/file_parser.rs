//! Uploaded file parsing
//!
//! CSV is the only supported upload format. The parsed table is summarised
//! for the model, and tables with `Date` and `Close` columns can also be
//! cached as a price series.

use crate::error::AssistantError;
use crate::tools::PriceSeries;
use crate::Result;
use std::path::Path;

const PREVIEW_ROWS: usize = 10;
const SUMMARY_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    /// Upper-cased file stem, used as the series key
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub preview: Vec<Vec<String>>,
    /// Normalised CSV text of the whole table
    pub data: String,
}

impl ParsedTable {
    pub fn has_price_columns(&self) -> bool {
        let has = |name: &str| self.columns.iter().any(|c| c.eq_ignore_ascii_case(name));
        has("Date") && has("Close")
    }

    pub fn to_price_series(&self) -> Result<PriceSeries> {
        PriceSeries::from_csv(self.name.clone(), &self.data)
    }

    /// Short description for the model's context
    pub fn summarize_for_llm(&self) -> String {
        let mut summary = format!(
            "CSV file with {} rows and {} columns.\nColumns: {}\n\nFirst {} rows:\n",
            self.row_count,
            self.columns.len(),
            self.columns.join(", "),
            SUMMARY_ROWS.min(self.preview.len()),
        );

        for (i, row) in self.preview.iter().take(SUMMARY_ROWS).enumerate() {
            let cells: Vec<String> = self
                .columns
                .iter()
                .zip(row.iter())
                .map(|(col, val)| format!("{}: {}", col, val))
                .collect();
            summary.push_str(&format!("{}. {{{}}}\n", i + 1, cells.join(", ")));
        }
        summary
    }
}

pub fn parse_csv_str(name: impl Into<String>, data: &str) -> Result<ParsedTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err(AssistantError::InvalidInput(
            "Failed to parse CSV: no header row".to_string(),
        ));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;

    let mut preview = Vec::new();
    let mut row_count = 0;
    for record in reader.records() {
        let record = record?;
        writer.write_record(&record)?;
        if preview.len() < PREVIEW_ROWS {
            preview.push(record.iter().map(str::to_string).collect());
        }
        row_count += 1;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AssistantError::InvalidInput(format!("Failed to parse CSV: {}", e)))?;
    let data = String::from_utf8(bytes)
        .map_err(|e| AssistantError::InvalidInput(format!("Failed to parse CSV: {}", e)))?;

    Ok(ParsedTable {
        name: name.into(),
        columns,
        row_count,
        preview,
        data,
    })
}

pub async fn parse_csv(path: &Path) -> Result<ParsedTable> {
    let data = tokio::fs::read_to_string(path).await?;
    parse_csv_str(file_key(path), &data)
}

/// Dispatch on file extension
pub async fn parse_uploaded_file(path: &Path) -> Result<ParsedTable> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => parse_csv(path).await,
        "xlsx" | "xls" | "pdf" => Err(AssistantError::InvalidInput(format!(
            "Unsupported file type: .{} (upload the data as CSV)",
            extension
        ))),
        other => Err(AssistantError::InvalidInput(format!(
            "Unsupported file type: .{}",
            other
        ))),
    }
}

fn file_key(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("UPLOAD")
        .to_uppercase()
}
