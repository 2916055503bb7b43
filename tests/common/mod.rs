//! In-memory remote used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use carto_sync::remote::{ByteStream, QUOTA_QUERY};
use carto_sync::schema::FieldDescription;
use carto_sync::{Error, QueryResult, RemoteSql, Result, RowBatch};
use futures::StreamExt;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One `COPY ... FROM STDIN` call with the rows it received.
#[derive(Debug, Clone)]
pub struct CopyCall {
    pub sql: String,
    pub rows: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Qualified names (`"public"."cities"`) the remote knows about
    pub tables: HashSet<String>,
    /// Fields returned by column introspection
    pub fields: Vec<FieldDescription>,
    /// Body served by `COPY ... TO STDOUT`
    pub copy_to_body: String,
    /// Remaining quota; `None` makes the quota query fail
    pub quota: Option<i64>,
    /// Number of rate-limited answers before copy calls succeed
    pub rate_limits: u32,
    /// Error message returned by `COPY ... TO STDOUT`
    pub copy_to_error: Option<String>,
    /// Long-running statements containing this text fail
    pub failing_statement: Option<String>,
    /// Tables reported by `CDB_QueryTablesText`
    pub query_tables: Vec<String>,
    /// Extent served to bounds queries, `[xmin, ymin, xmax, ymax]`
    pub extent: Option<[f64; 4]>,
    pub statements: Vec<String>,
    pub long_running: Vec<String>,
    /// Every statement and copy, in call order
    pub journal: Vec<String>,
    pub copy_to: Vec<String>,
    pub copies: Vec<CopyCall>,
}

#[derive(Debug, Default)]
pub struct MockRemote {
    pub state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_table(self: Arc<Self>, schema: &str, table: &str) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(format!("\"{}\".\"{}\"", schema, table));
        self
    }

    pub fn with_fields(self: Arc<Self>, fields: Vec<FieldDescription>) -> Arc<Self> {
        self.state.lock().unwrap().fields = fields;
        self
    }

    pub fn with_copy_to_body(self: Arc<Self>, body: &str) -> Arc<Self> {
        self.state.lock().unwrap().copy_to_body = body.to_string();
        self
    }

    pub fn with_quota(self: Arc<Self>, remaining: i64) -> Arc<Self> {
        self.state.lock().unwrap().quota = Some(remaining);
        self
    }

    pub fn with_rate_limits(self: Arc<Self>, count: u32) -> Arc<Self> {
        self.state.lock().unwrap().rate_limits = count;
        self
    }

    pub fn with_copy_to_error(self: Arc<Self>, message: &str) -> Arc<Self> {
        self.state.lock().unwrap().copy_to_error = Some(message.to_string());
        self
    }

    pub fn with_failing_statement(self: Arc<Self>, pattern: &str) -> Arc<Self> {
        self.state.lock().unwrap().failing_statement = Some(pattern.to_string());
        self
    }

    pub fn with_query_tables(self: Arc<Self>, tables: &[&str]) -> Arc<Self> {
        self.state.lock().unwrap().query_tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_extent(self: Arc<Self>, extent: [f64; 4]) -> Arc<Self> {
        self.state.lock().unwrap().extent = Some(extent);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn journal(&self) -> Vec<String> {
        self.state.lock().unwrap().journal.clone()
    }

    pub fn long_running(&self) -> Vec<String> {
        self.state.lock().unwrap().long_running.clone()
    }

    pub fn copy_to_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().copy_to.clone()
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.state.lock().unwrap().copies.clone()
    }

    fn take_rate_limit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.rate_limits > 0 {
            state.rate_limits -= 1;
            return Err(Error::rate_limited(Duration::ZERO, "You are over platform's limits"));
        }
        Ok(())
    }
}

fn single_row(column: &str, value: JsonValue) -> QueryResult {
    let mut row = Map::new();
    row.insert(column.to_string(), value);
    QueryResult {
        rows: vec![row],
        total_rows: 1,
        ..Default::default()
    }
}

#[async_trait]
impl RemoteSql for MockRemote {
    async fn execute_statement(&self, sql: &str) -> Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        state.journal.push(sql.to_string());

        if sql == "SELECT current_schema()" {
            return Ok(single_row("current_schema", json!("public")));
        }
        if sql == QUOTA_QUERY {
            return match state.quota {
                Some(remaining) => Ok(single_row("remaining", json!(remaining))),
                None => Err(Error::remote("function _cdb_userquotainmb() does not exist", Some(sql))),
            };
        }
        if let Some(query) = sql.strip_prefix("EXPLAIN ") {
            return if state.tables.iter().any(|t| query.contains(t.as_str())) {
                Ok(QueryResult::default())
            } else {
                Err(Error::remote("relation does not exist", Some(sql)))
            };
        }
        if sql.ends_with("LIMIT 0") {
            return Ok(QueryResult {
                fields: state.fields.clone(),
                ..Default::default()
            });
        }
        if sql.starts_with("SELECT COUNT(*)") {
            return Ok(single_row("count", json!(42)));
        }
        if sql.contains("ST_GeometryType") {
            return Ok(single_row("geom_type", json!("ST_MultiPolygon")));
        }
        if sql.contains("ST_Extent") {
            let mut row = Map::new();
            for (i, key) in ["xmin", "ymin", "xmax", "ymax"].iter().enumerate() {
                let value = state.extent.map_or(JsonValue::Null, |e| json!(e[i]));
                row.insert(key.to_string(), value);
            }
            return Ok(QueryResult {
                rows: vec![row],
                total_rows: 1,
                ..Default::default()
            });
        }
        if sql.contains("CDB_QueryTablesText") {
            return Ok(single_row("tables", json!(state.query_tables)));
        }
        if sql.starts_with("SELECT pg_try_advisory_lock") {
            return Ok(single_row("locked", json!(true)));
        }
        if sql.starts_with("SELECT pg_advisory_unlock") {
            return Ok(single_row("unlocked", json!(true)));
        }
        Ok(QueryResult::default())
    }

    async fn execute_long_running_statement(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.long_running.push(sql.to_string());
        state.journal.push(sql.to_string());
        match &state.failing_statement {
            Some(pattern) if sql.contains(pattern.as_str()) => {
                Err(Error::remote("column \"b\" cannot be cast", Some(sql)))
            }
            _ => Ok(()),
        }
    }

    async fn copy_to_stream(&self, sql: &str) -> Result<ByteStream> {
        self.state.lock().unwrap().copy_to.push(sql.to_string());
        self.take_rate_limit()?;
        if let Some(message) = self.state.lock().unwrap().copy_to_error.clone() {
            return Err(Error::remote(message, Some(sql)));
        }
        let body = Bytes::from(self.state.lock().unwrap().copy_to_body.clone());
        Ok(futures::stream::iter(vec![Ok(body)]).boxed())
    }

    async fn copy_from(&self, sql: &str, rows: RowBatch) -> Result<u64> {
        self.take_rate_limit()?;
        let rows = rows
            .map(|row| row.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .collect::<Result<Vec<_>>>()?;
        let copied = rows.len() as u64;
        let mut state = self.state.lock().unwrap();
        state.journal.push(sql.to_string());
        state.copies.push(CopyCall {
            sql: sql.to_string(),
            rows,
        });
        Ok(copied)
    }
}
