//! Remote SQL capability and its backends.
//!
//! The sync layer only needs four primitives from the remote service: run a
//! statement, run a long statement, stream a `COPY ... TO STDOUT` and feed a
//! `COPY ... FROM STDIN`. [`SqlApiClient`] provides them over HTTP and
//! [`PostgresRemote`] over a direct database connection.

mod postgres;
mod sql_api;

pub use postgres::PostgresRemote;
pub use sql_api::SqlApiClient;

use crate::codec::RowBatch;
use crate::config::{Backend, SyncConfig};
use crate::error::{Error, Result};
use crate::schema::FieldDescription;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::debug;

/// Bytes of a `COPY ... TO STDOUT` response.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Remaining storage in bytes for the current user.
pub const QUOTA_QUERY: &str = "SELECT (_CDB_UserQuotaInMB() * 1024 * 1024)::bigint \
     - CDB_UserDataSize(current_schema())::bigint AS remaining";

/// Result of a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Rows as JSON objects keyed by column name
    pub rows: Vec<Map<String, JsonValue>>,
    /// Column descriptions, in projection order
    pub fields: Vec<FieldDescription>,
    /// Server notices
    pub notices: Vec<String>,
    /// Rows returned or affected
    pub total_rows: u64,
}

impl QueryResult {
    /// Value of `column` in the first row.
    pub fn first(&self, column: &str) -> Option<&JsonValue> {
        self.rows.first().and_then(|row| row.get(column))
    }

    /// First-row value of `column` as an integer. Numeric strings are accepted.
    pub fn first_i64(&self, column: &str) -> Option<i64> {
        match self.first(column)? {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// First-row value of `column` as a float. Numeric strings are accepted.
    pub fn first_f64(&self, column: &str) -> Option<f64> {
        match self.first(column)? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// First-row value of `column` as a string.
    pub fn first_str(&self, column: &str) -> Option<&str> {
        self.first(column).and_then(JsonValue::as_str)
    }
}

/// The remote SQL service.
#[async_trait]
pub trait RemoteSql: Send + Sync {
    /// Execute one statement and return its rows.
    async fn execute_statement(&self, sql: &str) -> Result<QueryResult>;

    /// Execute a statement expected to outlive a regular request.
    async fn execute_long_running_statement(&self, sql: &str) -> Result<()>;

    /// Run a `COPY ... TO STDOUT` statement and stream the CSV response.
    async fn copy_to_stream(&self, sql: &str) -> Result<ByteStream>;

    /// Run a `COPY ... FROM STDIN` statement fed by `rows`. Returns rows copied.
    async fn copy_from(&self, sql: &str, rows: RowBatch) -> Result<u64>;

    /// Remaining storage quota in bytes, `None` when the service has no quota.
    async fn remaining_quota(&self) -> Result<Option<u64>> {
        match self.execute_statement(QUOTA_QUERY).await {
            Ok(result) => Ok(result
                .first_i64("remaining")
                .map(|remaining| remaining.max(0) as u64)),
            Err(Error::Remote { message, .. }) => {
                debug!("Quota unavailable, skipping check: {}", message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Connect the backend selected by `config`.
pub async fn connect(config: &SyncConfig) -> Result<Arc<dyn RemoteSql>> {
    match config.remote.backend {
        Backend::SqlApi => Ok(Arc::new(SqlApiClient::from_config(config)?)),
        Backend::Postgres => Ok(Arc::new(PostgresRemote::connect(&config.remote).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_with(value: JsonValue) -> QueryResult {
        let mut row = Map::new();
        row.insert("remaining".into(), value);
        QueryResult {
            rows: vec![row],
            total_rows: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_i64() {
        assert_eq!(result_with(json!(1024)).first_i64("remaining"), Some(1024));
        assert_eq!(result_with(json!("2048")).first_i64("remaining"), Some(2048));
        assert_eq!(result_with(json!(null)).first_i64("remaining"), None);
        assert_eq!(QueryResult::default().first_i64("remaining"), None);
    }

    #[test]
    fn test_first_f64() {
        assert_eq!(result_with(json!(-3.5)).first_f64("remaining"), Some(-3.5));
        assert_eq!(result_with(json!("12.25")).first_f64("remaining"), Some(12.25));
        assert_eq!(result_with(json!(null)).first_f64("remaining"), None);
    }

    #[test]
    fn test_first_str() {
        let mut row = Map::new();
        row.insert("current_schema".into(), json!("public"));
        let result = QueryResult {
            rows: vec![row],
            ..Default::default()
        };
        assert_eq!(result.first_str("current_schema"), Some("public"));
    }
}
