//! SQL-over-HTTP backend.

use super::{ByteStream, QueryResult, RemoteSql};
use crate::codec::RowBatch;
use crate::config::{RetryConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::schema::FieldDescription;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::StreamExt;
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Wait used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

const SQL_PATH: &str = "api/v2/sql";
const JOB_PATH: &str = "api/v2/sql/job";
const COPY_TO_PATH: &str = "api/v2/sql/copyto";
const COPY_FROM_PATH: &str = "api/v2/sql/copyfrom";

/// Client for the SQL API, the Batch API and the COPY endpoints.
#[derive(Debug, Clone)]
pub struct SqlApiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
    polling: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    rows: Vec<Map<String, JsonValue>>,
    #[serde(default)]
    fields: Map<String, JsonValue>,
    #[serde(default)]
    notices: Vec<String>,
    #[serde(default)]
    total_rows: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failed_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CopyFromResponse {
    #[serde(default)]
    total_rows: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Many(Vec<String>),
    One(String),
}

impl ErrorField {
    fn into_message(self) -> String {
        match self {
            ErrorField::Many(messages) => messages.join("; "),
            ErrorField::One(message) => message,
        }
    }
}

impl SqlApiClient {
    /// Create a client for `base_url` (e.g. `https://user.carto.com`).
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| Error::config(format!("Invalid base URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("carto-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config_with_source("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            polling: RetryConfig::default(),
        })
    }

    /// Create a client from the `remote` and `retry` sections of `config`.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let base_url = config
            .remote
            .base_url
            .as_deref()
            .ok_or_else(|| Error::config("remote.base_url required for sql_api"))?;
        let api_key = config
            .remote
            .api_key
            .clone()
            .ok_or_else(|| Error::config("remote.api_key required for sql_api"))?;

        Ok(Self::new(base_url, api_key)?
            .with_timeout(config.remote.timeout()?)
            .with_polling(config.retry.clone()))
    }

    /// Timeout for regular statements. Copy streams are not bounded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backoff used while waiting for batch jobs.
    pub fn with_polling(mut self, polling: RetryConfig) -> Self {
        self.polling = polling;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::config(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[("api_key", self.api_key.as_str())])
    }

    async fn send(&self, request: RequestBuilder, query: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| Error::http("Request to SQL API failed", e))?;
        check_status(response, query).await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobResponse> {
        let url = self.endpoint(&format!("{}/{}", JOB_PATH, job_id))?;
        let response = self
            .send(self.client.get(url).timeout(self.timeout), job_id)
            .await?;
        response
            .json()
            .await
            .map_err(|e| Error::http("Invalid batch job response", e))
    }
}

/// Map an HTTP response to the error taxonomy.
async fn check_status(response: Response, query: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        let body = response.text().await.unwrap_or_default();
        return Err(Error::rate_limited(retry_after, error_message(&body, status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::http(format!("Failed to read error response ({})", status), e))?;
    Err(Error::remote(error_message(&body, status), Some(query)))
}

fn error_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => parsed.error.into_message(),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}

fn parse_fields(fields: Map<String, JsonValue>) -> Vec<FieldDescription> {
    fields
        .into_iter()
        .map(|(name, info)| {
            let kind = info.get("type").and_then(JsonValue::as_str);
            match (info.get("pgtype").and_then(JsonValue::as_str), kind) {
                (Some(pgtype), Some(kind)) => FieldDescription::new(name, pgtype).with_generic(kind),
                (Some(pgtype), None) => FieldDescription::new(name, pgtype),
                (None, Some(kind)) => FieldDescription::with_kind(name, kind),
                (None, None) => FieldDescription::with_kind(name, "string"),
            }
        })
        .collect()
}

/// Exponential backoff for batch job polling.
pub fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_backoff())
        .with_max_interval(config.max_backoff())
        .with_multiplier(config.multiplier)
        .with_max_elapsed_time(Some(config.max_poll()))
        .build()
}

#[async_trait]
impl RemoteSql for SqlApiClient {
    #[instrument(skip(self), fields(len = sql.len()))]
    async fn execute_statement(&self, sql: &str) -> Result<QueryResult> {
        let url = self.endpoint(SQL_PATH)?;
        let request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&json!({ "q": sql.trim() }));
        let response = self.send(request, sql).await?;

        let body: SqlResponse = response
            .json()
            .await
            .map_err(|e| Error::http("Invalid SQL API response", e))?;
        let total_rows = body.total_rows.unwrap_or(body.rows.len() as u64);
        Ok(QueryResult {
            rows: body.rows,
            fields: parse_fields(body.fields),
            notices: body.notices,
            total_rows,
        })
    }

    #[instrument(skip(self), fields(len = sql.len()))]
    async fn execute_long_running_statement(&self, sql: &str) -> Result<()> {
        let url = self.endpoint(JOB_PATH)?;
        let request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&json!({ "query": sql.trim() }));
        let job: JobResponse = self
            .send(request, sql)
            .await?
            .json()
            .await
            .map_err(|e| Error::http("Invalid batch job response", e))?;
        info!("Batch job {} created", job.job_id);

        let job_id = job.job_id.as_str();
        backoff::future::retry(create_backoff(&self.polling), move || async move {
            let job = self.job_status(&job_id).await.map_err(|e| {
                if e.is_rate_limited() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })?;
            match job.status.as_str() {
                "done" => Ok(()),
                "failed" | "canceled" | "unknown" => Err(backoff::Error::permanent(Error::remote(
                    job.failed_reason
                        .unwrap_or_else(|| format!("Batch job {} {}", job_id, job.status)),
                    Some(sql),
                ))),
                status => {
                    debug!("Batch job {} is {}", job_id, status);
                    Err(backoff::Error::transient(Error::remote(
                        format!("Batch job {} did not finish in time (last status: {})", job_id, status),
                        Some(sql),
                    )))
                }
            }
        })
        .await
    }

    #[instrument(skip(self), fields(len = sql.len()))]
    async fn copy_to_stream(&self, sql: &str) -> Result<ByteStream> {
        let url = self.endpoint(COPY_TO_PATH)?;
        let request = self.client.get(url).query(&[("q", sql)]);
        let response = self.send(request, sql).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::http("Interrupted COPY TO stream", e)))
            .boxed())
    }

    #[instrument(skip(self, rows), fields(len = sql.len(), rows = rows.total_rows()))]
    async fn copy_from(&self, sql: &str, rows: RowBatch) -> Result<u64> {
        let url = self.endpoint(COPY_FROM_PATH)?;

        // The transport only sees an io::Error; keep the encoder's own error.
        let encode_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let captured = encode_error.clone();
        let body = futures::stream::iter(rows).map(move |row| {
            row.map_err(|e| {
                let message = e.to_string();
                if let Ok(mut slot) = captured.lock() {
                    slot.get_or_insert(e);
                }
                std::io::Error::other(message)
            })
        });

        let request = self
            .client
            .post(url)
            .query(&[("q", sql)])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(body));

        let result = self.send(request, sql).await;
        if let Some(e) = encode_error.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(e);
        }

        let response: CopyFromResponse = result?
            .json()
            .await
            .map_err(|e| Error::http("Invalid COPY FROM response", e))?;
        Ok(response.total_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"error": ["relation \"x\" does not exist"]}"#, StatusCode::BAD_REQUEST),
            "relation \"x\" does not exist"
        );
        assert_eq!(
            error_message(r#"{"error": "permission denied"}"#, StatusCode::FORBIDDEN),
            "permission denied"
        );
        assert_eq!(error_message("", StatusCode::BAD_GATEWAY), "HTTP 502 Bad Gateway");
    }

    #[test]
    fn test_parse_fields_keeps_order() {
        let fields: Map<String, JsonValue> = serde_json::from_str(
            r#"{
                "cartodb_id": {"type": "number", "pgtype": "int4"},
                "the_geom": {"type": "geometry", "wkbtype": "Unknown"},
                "name": {"type": "string", "pgtype": "text"}
            }"#,
        )
        .unwrap();
        let parsed = parse_fields(fields);
        let names: Vec<&str> = parsed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["cartodb_id", "the_geom", "name"]);
        assert_eq!(parsed[1].kind.as_deref(), Some("geometry"));
        assert_eq!(parsed[0].type_name.as_deref(), Some("int4"));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = SqlApiClient::new("https://example.com/user/alice", "key").unwrap();
        assert_eq!(
            client.endpoint(SQL_PATH).unwrap().as_str(),
            "https://example.com/user/alice/api/v2/sql"
        );
    }

    #[test]
    fn test_backoff_from_config() {
        let config = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            max_poll_secs: 5,
            ..Default::default()
        };
        let backoff = create_backoff(&config);
        assert_eq!(backoff.initial_interval, Duration::from_millis(100));
        assert_eq!(backoff.max_interval, Duration::from_millis(1000));
        assert_eq!(backoff.max_elapsed_time, Some(Duration::from_secs(5)));
    }
}
