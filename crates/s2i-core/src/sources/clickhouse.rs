//! ClickHouse query results over the HTTP interface.

use super::BatchSource;
use crate::config::ClickHouseConfig;
use crate::error::{ConfigError, Result, SourceError};
use arrow::compute::concat_batches;
use arrow::ipc::reader::StreamReader;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use reqwest::Client;
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SOURCE_NAME: &str = "clickhouse";

/// Runs one query and returns its result as a single batch.
pub struct ClickHouseSource {
    client: Client,
    url: String,
    user: String,
    password: Option<String>,
    database: Option<String>,
    query: String,
}

impl ClickHouseSource {
    pub fn new(config: &ClickHouseConfig, query: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            query,
        })
    }

    /// The query with the Arrow stream output format appended.
    fn statement(&self) -> String {
        format!(
            "{} FORMAT ArrowStream",
            self.query.trim().trim_end_matches(';').trim_end()
        )
    }
}

/// Decode an Arrow IPC stream into one batch.
fn decode_arrow_stream(body: &[u8]) -> Result<RecordBatch> {
    let decode = |message: String| SourceError::Decode {
        source_name: SOURCE_NAME,
        message,
    };
    if body.is_empty() {
        return Err(decode("empty response body".into()).into());
    }

    let reader = StreamReader::try_new(Cursor::new(body), None).map_err(|e| decode(e.to_string()))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| decode(e.to_string()))?;
    concat_batches(&schema, &batches).map_err(|e| decode(e.to_string()).into())
}

#[async_trait]
impl BatchSource for ClickHouseSource {
    async fn read(&self) -> Result<RecordBatch> {
        let start = Instant::now();
        let mut request = self
            .client
            .post(&self.url)
            .query(&[("output_format_arrow_string_as_string", "1")])
            .header("X-ClickHouse-User", &self.user);
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }
        if let Some(database) = &self.database {
            request = request.header("X-ClickHouse-Database", database);
        }

        debug!(url = %self.url, "Executing ClickHouse query");
        let response = request
            .body(self.statement())
            .send()
            .await
            .map_err(|e| SourceError::Request {
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

        let body = response.bytes().await.map_err(|e| SourceError::Request {
            source_name: SOURCE_NAME,
            message: e.to_string(),
        })?;
        let batch = decode_arrow_stream(&body)?;

        info!(
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetched rows from ClickHouse"
        );
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("clickhouse {}", self.url)
    }
}
