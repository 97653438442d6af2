//! CRM publishing client.
//!
//! Authenticates with an OAuth2 client-credentials grant and pushes
//! row-oriented JSON records in fixed-size chunks.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::config::CrmConfig;
use crate::error::{ConfigError, CrmError, Error, Result};
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One CRM record.
pub type Record = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushSummary {
    pub records: usize,
    pub requests: usize,
}

/// Destination for published records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn push(&self, records: &[Record]) -> Result<PushSummary>;
}

/// Client for the CRM push endpoint.
pub struct CrmClient {
    client: Client,
    config: CrmConfig,
    token: RwLock<Option<CachedToken>>,
    circuit_breaker: CircuitBreaker,
}

impl CrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
            token: RwLock::new(None),
            circuit_breaker: CircuitBreaker::new(
                CircuitBreakerConfig::new("crm")
                    .with_failure_threshold(3)
                    .with_reset_timeout(Duration::from_secs(60)),
            ),
        })
    }

    /// Cached access token, fetching a new one when missing or near expiry.
    async fn access_token(&self) -> Result<String> {
        let cached = self.token.read().clone();
        if let Some(cached) = cached.filter(|c| Instant::now() < c.expires_at) {
            return Ok(cached.token);
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *self.token.write() = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let mut form = vec![
            ("grant_type", self.config.grant_type.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CrmError::Auth(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CrmError::Auth(format!("token endpoint returned {}", response.status())).into());
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CrmError::Auth(e.to_string()))?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CrmError::Auth("token response carried no access_token".into()))?;

        // Refresh 60s early
        let expires_in = body.expires_in.unwrap_or(3600);
        debug!(expires_in, "CRM token fetched");
        Ok(CachedToken {
            token,
            expires_at: Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        })
    }

    /// Push `records` in chunks of `batch_size`. Stops at the first failed chunk.
    pub async fn push(&self, records: &[Record]) -> Result<PushSummary> {
        let mut summary = PushSummary::default();
        for chunk in records.chunks(self.config.batch_size.max(1)) {
            let result = self.circuit_breaker.execute(|| self.push_chunk(chunk)).await;
            match result {
                Ok(()) => {
                    summary.records += chunk.len();
                    summary.requests += 1;
                }
                Err(CircuitBreakerError::CircuitOpen) => return Err(CrmError::CircuitOpen.into()),
                Err(CircuitBreakerError::ServiceError(e)) => return Err(e),
            }
        }

        info!(
            records = summary.records,
            requests = summary.requests,
            endpoint = %self.config.push_url,
            "Pushed records to CRM"
        );
        Ok(summary)
    }

    async fn push_chunk(&self, chunk: &[Record]) -> std::result::Result<(), Error> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(&self.config.push_url)
            .bearer_auth(token)
            .json(chunk)
            .send()
            .await
            .map_err(|e| CrmError::Push(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            // Token revoked early; the next call fetches a new one
            *self.token.write() = None;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Push(format!("{}: {}", status, body)).into());
        }
        debug!(records = chunk.len(), "CRM chunk accepted");
        Ok(())
    }
}

#[async_trait]
impl RecordSink for CrmClient {
    async fn push(&self, records: &[Record]) -> Result<PushSummary> {
        CrmClient::push(self, records).await
    }
}

/// Row-oriented JSON records for every row of `batches`. Null cells are omitted.
pub fn records_from_batches(batches: &[RecordBatch]) -> Result<Vec<Record>> {
    if batches.iter().all(|b| b.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = ArrayWriter::new(Vec::new());
    writer.write_batches(&batches.iter().collect::<Vec<_>>())?;
    writer.finish()?;
    let buffer = writer.into_inner();
    Ok(serde_json::from_slice(&buffer)?)
}

/// Rename record fields per `mapping` (column → CRM field), dropping unmapped
/// fields. An empty mapping returns the records unchanged.
pub fn apply_field_mapping(records: Vec<Record>, mapping: &HashMap<String, String>) -> Vec<Record> {
    if mapping.is_empty() {
        return records;
    }
    records
        .into_iter()
        .map(|mut record| {
            mapping
                .iter()
                .filter_map(|(column, field)| record.remove(column).map(|v| (field.clone(), v)))
                .collect()
        })
        .collect()
}
