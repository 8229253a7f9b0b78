//! Downstream dispatch of event and dataset batches
//!
//! Batches are posted to `{base_url}/api/ingestion/{type}`. A rejected batch
//! comes back as a [`DispatchFailure`] carrying the downstream message and
//! whatever counts the service reported, so callers never parse error text.

use async_trait::async_trait;
use intake_common::IngestionType;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::batch::{BatchConsumer, BatchContext, BatchReport, IngestionBatch};
use crate::error::{IngestError, IngestResult};
use crate::reader::NormalizedRecord;

/// Build the JSON body for one batch.
///
/// `dataset` batches are wrapped under `items`; every other kind is sent as a
/// plain array under the kind's own key.
pub fn build_request_body(
    ingestion_type: IngestionType,
    ingestion_name: &str,
    records: &[NormalizedRecord],
) -> Value {
    let rows: Vec<Value> = records.iter().cloned().map(Value::Object).collect();
    let payload = match ingestion_type {
        IngestionType::Dataset => json!({ "items": rows }),
        _ => Value::Array(rows),
    };

    let mut body = serde_json::Map::new();
    body.insert(ingestion_type.name_key(), Value::String(ingestion_name.to_string()));
    body.insert(ingestion_type.as_str().to_string(), payload);
    Value::Object(body)
}

/// Why the downstream service did not accept a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}{}", http_suffix(.status))]
pub struct DispatchFailure {
    /// HTTP status, absent when the request never got a response
    pub status: Option<u16>,
    pub message: String,
    pub valid_record_count: u64,
    pub invalid_record_count: u64,
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl DispatchFailure {
    fn transport(err: &reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            valid_record_count: 0,
            invalid_record_count: 0,
        }
    }
}

/// Shape of a downstream error body; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<Value>,
    error: Option<Value>,
    #[serde(default)]
    valid_record_count: u64,
    #[serde(default)]
    invalid_record_count: u64,
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// HTTP client for the downstream ingestion API
#[derive(Clone)]
pub struct IngestionApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl IngestionApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, ingestion_type: IngestionType) -> String {
        format!("{}/api/ingestion/{}", self.base_url, ingestion_type)
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn post_batch(
        &self,
        ingestion_type: IngestionType,
        ingestion_name: &str,
        records: &[NormalizedRecord],
    ) -> Result<BatchReport, DispatchFailure> {
        let url = self.endpoint(ingestion_type);
        let body = build_request_body(ingestion_type, ingestion_name, records);

        debug!(url = %url, "Posting batch downstream");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchFailure::transport(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DispatchFailure::transport(&e))?;

        if status.is_success() {
            // An empty or non-JSON success body still means the batch landed.
            return Ok(serde_json::from_str::<BatchReport>(&text).unwrap_or_else(|_| BatchReport {
                message: text,
                ..BatchReport::default()
            }));
        }

        let parsed: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = parsed
            .message
            .or(parsed.error)
            .map(value_text)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                if text.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("downstream request failed")
                        .to_string()
                } else {
                    text.clone()
                }
            });

        Err(DispatchFailure {
            status: Some(status.as_u16()),
            message,
            valid_record_count: parsed.valid_record_count,
            invalid_record_count: parsed.invalid_record_count,
        })
    }
}

/// Consumer that forwards every batch to the downstream API.
pub struct HttpDispatcher {
    client: IngestionApiClient,
}

impl HttpDispatcher {
    pub fn new(client: IngestionApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchConsumer for HttpDispatcher {
    async fn consume(
        &mut self,
        ctx: &BatchContext,
        batch: IngestionBatch,
    ) -> IngestResult<BatchReport> {
        match self
            .client
            .post_batch(ctx.ingestion_type, &ctx.ingestion_name, &batch.records)
            .await
        {
            Ok(report) => {
                info!(
                    pid = ctx.pid,
                    batch = batch.sequence,
                    records = batch.len(),
                    valid = report.valid_record_count,
                    invalid = report.invalid_record_count,
                    "Batch accepted downstream"
                );
                Ok(report)
            },
            Err(failure) => {
                warn!(
                    pid = ctx.pid,
                    batch = batch.sequence,
                    is_final = batch.is_final,
                    status = ?failure.status,
                    error = %failure.message,
                    "Batch rejected downstream"
                );
                Err(IngestError::Dispatch {
                    batch: batch.sequence,
                    is_final: batch.is_final,
                    failure,
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn records() -> Vec<NormalizedRecord> {
        let mut a = NormalizedRecord::new();
        a.insert("school_id".into(), json!("101"));
        a.insert("students".into(), json!(40));
        let mut b = NormalizedRecord::new();
        b.insert("school_id".into(), json!("102"));
        b.insert("students".into(), json!(12));
        vec![a, b]
    }

    #[test]
    fn test_event_body_is_plain_array() {
        let body = build_request_body(IngestionType::Event, "attendance", &records());
        assert_eq!(body["event_name"], json!("attendance"));
        assert_eq!(body["event"].as_array().unwrap().len(), 2);
        assert_eq!(body["event"][0]["students"], json!(40));
    }

    #[test]
    fn test_dataset_body_wraps_items() {
        let body = build_request_body(IngestionType::Dataset, "enrolment", &records());
        assert_eq!(body["dataset_name"], json!("enrolment"));
        assert_eq!(body["dataset"]["items"].as_array().unwrap().len(), 2);
        assert!(body["dataset"].get("items").is_some());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = IngestionApiClient::new("http://ingest:3000/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint(IngestionType::Event),
            "http://ingest:3000/api/ingestion/event"
        );
    }

    #[tokio::test]
    async fn test_post_batch_parses_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ingestion/event"))
            .and(body_json(build_request_body(IngestionType::Event, "attendance", &records())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Event added successfully",
                "valid_record_count": 1,
                "invalid_record_count": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = IngestionApiClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let report = client
            .post_batch(IngestionType::Event, "attendance", &records())
            .await
            .unwrap();

        assert_eq!(report.valid_record_count, 1);
        assert_eq!(report.invalid_record_count, 1);
        assert_eq!(report.message, "Event added successfully");
    }

    #[tokio::test]
    async fn test_post_batch_structured_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "Invalid event name",
                "valid_record_count": 0,
                "invalid_record_count": 2
            })))
            .mount(&server)
            .await;

        let client = IngestionApiClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let failure = client
            .post_batch(IngestionType::Event, "missing", &records())
            .await
            .unwrap_err();

        assert_eq!(failure.status, Some(400));
        assert_eq!(failure.message, "Invalid event name");
        assert_eq!(failure.invalid_record_count, 2);
    }

    #[tokio::test]
    async fn test_post_batch_failure_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = IngestionApiClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let failure = client
            .post_batch(IngestionType::Dataset, "enrolment", &records())
            .await
            .unwrap_err();

        assert_eq!(failure.status, Some(503));
        assert_eq!(failure.message, "Service Unavailable");
        assert!(failure.to_string().contains("HTTP 503"));
    }
}
