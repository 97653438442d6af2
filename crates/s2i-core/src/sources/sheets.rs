//! Google Sheets worksheet reader.
//!
//! Reads a worksheet through the Sheets v4 values API and shapes it into an
//! all-string batch: the first row is the header, `processing_date` and
//! `rsa_type` are appended, columns are renamed to the declared names by
//! position, and mostly-empty rows are dropped.

use super::BatchSource;
use crate::config::SheetsConfig;
use crate::error::{ConfigError, Result, SourceError};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SOURCE_NAME: &str = "sheets";

/// Value appended as `rsa_type` to every row.
const RSA_TYPE_ADD: &str = "add";

/// Values API response.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// How worksheet rows become a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetBatchShape {
    /// Declared column names, including `processing_date` and `rsa_type`
    pub columns: Vec<String>,
    /// Data rows to skip after the header
    pub skip_rows: usize,
}

impl SheetBatchShape {
    /// Build the batch from raw worksheet rows, header first.
    pub fn build(&self, values: &[Vec<String>], processing_date: NaiveDate) -> Result<RecordBatch> {
        let (header, rows) = values.split_first().ok_or_else(|| SourceError::Decode {
            source_name: SOURCE_NAME,
            message: "worksheet has no header row".into(),
        })?;

        let width = header.len();
        let ncols = width + 2;
        if self.columns.len() != ncols {
            return Err(ConfigError::Invalid(format!(
                "Worksheet has {} columns plus processing_date and rsa_type, but {} columns are declared",
                width,
                self.columns.len()
            ))
            .into());
        }

        let threshold = ncols / 2;
        let kept: Vec<&Vec<String>> = rows
            .iter()
            .skip(self.skip_rows)
            .filter(|row| {
                // The two appended cells are never empty
                let filled = row.iter().take(width).filter(|c| !c.trim().is_empty()).count();
                filled + 2 >= threshold
            })
            .collect();
        let dropped = rows.len().saturating_sub(self.skip_rows) - kept.len();
        if dropped > 0 {
            debug!(dropped, threshold, "Dropped sparse worksheet rows");
        }

        let mut columns: Vec<ArrayRef> = (0..width)
            .map(|i| {
                let cells: StringArray = kept
                    .iter()
                    .map(|row| Some(row.get(i).map(String::as_str).unwrap_or("")))
                    .collect();
                Arc::new(cells) as ArrayRef
            })
            .collect();
        let date = processing_date.format("%Y-%m-%d").to_string();
        columns.push(Arc::new(StringArray::from(vec![date.as_str(); kept.len()])));
        columns.push(Arc::new(StringArray::from(vec![RSA_TYPE_ADD; kept.len()])));

        let schema = Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|name| Field::new(name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ));
        let options = RecordBatchOptions::new().with_row_count(Some(kept.len()));
        Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
    }
}

/// Cell text as the sheet displays it.
fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Reads one worksheet.
pub struct SheetSource {
    client: Client,
    base_uri: String,
    access_token: Option<String>,
    api_key: Option<String>,
    sheet_id: String,
    worksheet: String,
    shape: SheetBatchShape,
}

impl SheetSource {
    pub fn new(
        config: &SheetsConfig,
        sheet_id: String,
        worksheet: String,
        shape: SheetBatchShape,
    ) -> Result<Self> {
        if config.access_token.is_none() && config.api_key.is_none() {
            return Err(ConfigError::Invalid(
                "[sheets] requires access_token or api_key".into(),
            )
            .into());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_uri: config.base_uri.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            api_key: config.api_key.clone(),
            sheet_id,
            worksheet,
            shape,
        })
    }

    fn values_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_uri,
            urlencoding::encode(&self.sheet_id),
            urlencoding::encode(&self.worksheet)
        )
    }

    async fn fetch_values(&self) -> Result<Vec<Vec<String>>> {
        let mut request = self.client.get(self.values_url());
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        } else if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request.send().await.map_err(|e| SourceError::Request {
            source_name: SOURCE_NAME,
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                source_name: SOURCE_NAME,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let range: ValueRange = response.json().await.map_err(|e| SourceError::Decode {
            source_name: SOURCE_NAME,
            message: e.to_string(),
        })?;
        Ok(range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }
}

#[async_trait]
impl BatchSource for SheetSource {
    async fn read(&self) -> Result<RecordBatch> {
        let values = self.fetch_values().await?;
        let batch = self
            .shape
            .build(&values, chrono::Local::now().date_naive())?;

        info!(
            sheet_id = %self.sheet_id,
            worksheet = %self.worksheet,
            rows = batch.num_rows(),
            "Read worksheet"
        );
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("sheet {}/{}", self.sheet_id, self.worksheet)
    }
}
