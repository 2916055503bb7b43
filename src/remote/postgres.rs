//! Direct PostgreSQL backend.

use super::{ByteStream, QueryResult, RemoteSql};
use crate::codec::RowBatch;
use crate::config::{RemoteConfig, SslMode};
use crate::error::{Error, Result};
use crate::schema::FieldDescription;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value as JsonValue};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Row};
use tracing::{debug, info, instrument};

#[cfg(feature = "tls-native")]
use native_tls::TlsConnector;
#[cfg(feature = "tls-native")]
use postgres_native_tls::MakeTlsConnector;

/// Encoded rows buffered before each write to the COPY sink.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Remote backed by a single PostgreSQL connection.
pub struct PostgresRemote {
    client: Client,
}

impl std::fmt::Debug for PostgresRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRemote").finish_non_exhaustive()
    }
}

impl PostgresRemote {
    /// Connect to PostgreSQL.
    #[instrument(skip(config), fields(url = %config.postgres_url.as_deref().map(mask_url).unwrap_or_default()))]
    pub async fn connect(config: &RemoteConfig) -> Result<Self> {
        let url = config
            .postgres_url
            .as_deref()
            .ok_or_else(|| Error::config("remote.postgres_url required for postgres"))?;
        info!("Connecting to PostgreSQL...");

        let client = match config.ssl_mode {
            SslMode::Disable => {
                let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
                    .await
                    .map_err(|e| Error::postgres("Failed to connect", e))?;
                spawn_connection(connection);
                client
            }
            #[cfg(feature = "tls-native")]
            mode => {
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(mode == SslMode::Prefer)
                    .build()
                    .map_err(|e| Error::config_with_source("TLS setup failed", e))?;
                let (client, connection) =
                    tokio_postgres::connect(url, MakeTlsConnector::new(connector))
                        .await
                        .map_err(|e| Error::postgres("Failed to connect", e))?;
                spawn_connection(connection);
                client
            }
            #[cfg(not(feature = "tls-native"))]
            SslMode::Prefer => {
                let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
                    .await
                    .map_err(|e| Error::postgres("Failed to connect", e))?;
                spawn_connection(connection);
                client
            }
            #[cfg(not(feature = "tls-native"))]
            SslMode::Require => {
                return Err(Error::config(
                    "ssl_mode = \"require\" needs the tls-native feature",
                ));
            }
        };

        info!("Connected to PostgreSQL");
        Ok(Self { client })
    }

    /// Wrap an already connected client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn spawn_connection<C>(connection: C)
where
    C: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>>
        + Send
        + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });
}

/// Server-side failures are remote errors; everything else is transport.
fn map_error(e: tokio_postgres::Error, sql: &str) -> Error {
    match e.as_db_error() {
        Some(db) => Error::remote(db.message().to_string(), Some(sql)),
        None => Error::postgres("Query failed", e),
    }
}

/// Whether `sql` holds more than one statement. Quoted `;` are ignored.
fn is_compound(sql: &str) -> bool {
    let body = sql.trim().trim_end_matches(';');
    let mut in_quote = false;
    for c in body.chars() {
        match c {
            '\'' => in_quote = !in_quote,
            ';' if !in_quote => return true,
            _ => {}
        }
    }
    false
}

/// Undecoded column value, used for types without a native mapping.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// How a column of a given type is rendered to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    /// Single-byte `"char"`, read as `i8`
    Char,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    /// EWKB and bytea, rendered as hex like the HTTP API does
    Hex,
    Unsupported,
}

fn json_kind(type_name: &str) -> JsonKind {
    match type_name {
        "bool" => JsonKind::Bool,
        "int2" => JsonKind::Int2,
        "int4" => JsonKind::Int4,
        "int8" => JsonKind::Int8,
        "float4" => JsonKind::Float4,
        "float8" => JsonKind::Float8,
        "text" | "varchar" | "name" | "bpchar" => JsonKind::Text,
        "char" => JsonKind::Char,
        "date" => JsonKind::Date,
        "timestamp" => JsonKind::Timestamp,
        "timestamptz" => JsonKind::TimestampTz,
        "json" | "jsonb" => JsonKind::Json,
        "geometry" | "bytea" => JsonKind::Hex,
        _ => JsonKind::Unsupported,
    }
}

/// Read column `i`, logging and nulling values the driver cannot convert.
fn get_opt<'a, T: FromSql<'a>>(row: &'a Row, i: usize) -> Option<T> {
    match row.try_get::<_, Option<T>>(i) {
        Ok(value) => value,
        Err(e) => {
            debug!("Failed to read column {}: {}", i, e);
            None
        }
    }
}

/// Convert a PostgreSQL row to a JSON map.
fn row_to_json(row: &Row) -> Map<String, JsonValue> {
    let mut map = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let type_name = column.type_().name();
        let value = match json_kind(type_name) {
            JsonKind::Bool => get_opt::<bool>(row, i).map(JsonValue::Bool),
            JsonKind::Int2 => get_opt::<i16>(row, i).map(|v| JsonValue::Number(v.into())),
            JsonKind::Int4 => get_opt::<i32>(row, i).map(|v| JsonValue::Number(v.into())),
            JsonKind::Int8 => get_opt::<i64>(row, i).map(|v| JsonValue::Number(v.into())),
            JsonKind::Float4 => get_opt::<f32>(row, i)
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(JsonValue::Number),
            JsonKind::Float8 => get_opt::<f64>(row, i)
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number),
            JsonKind::Text => get_opt::<String>(row, i).map(JsonValue::String),
            JsonKind::Char => get_opt::<i8>(row, i).map(|v| JsonValue::String(char_to_string(v))),
            JsonKind::Date => get_opt::<chrono::NaiveDate>(row, i)
                .map(|d| JsonValue::String(d.to_string())),
            JsonKind::Timestamp => get_opt::<chrono::NaiveDateTime>(row, i)
                .map(|d| JsonValue::String(d.to_string())),
            JsonKind::TimestampTz => get_opt::<chrono::DateTime<chrono::Utc>>(row, i)
                .map(|d| JsonValue::String(d.to_rfc3339())),
            JsonKind::Json => get_opt::<JsonValue>(row, i),
            JsonKind::Hex => get_opt::<RawValue>(row, i)
                .map(|raw| JsonValue::String(hex::encode_upper(raw.0))),
            JsonKind::Unsupported => {
                debug!("Unsupported type '{}' for column '{}'", type_name, name);
                None
            }
        };

        map.insert(name.to_string(), value.unwrap_or(JsonValue::Null));
    }

    map
}

/// `"char"` values are single bytes, e.g. `pg_class.relkind`.
fn char_to_string(v: i8) -> String {
    char::from(v as u8).to_string()
}

#[async_trait]
impl RemoteSql for PostgresRemote {
    #[instrument(skip(self), fields(len = sql.len()))]
    async fn execute_statement(&self, sql: &str) -> Result<QueryResult> {
        if is_compound(sql) {
            self.client
                .batch_execute(sql)
                .await
                .map_err(|e| map_error(e, sql))?;
            return Ok(QueryResult::default());
        }

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| map_error(e, sql))?;
        let fields = statement
            .columns()
            .iter()
            .map(|c| FieldDescription::new(c.name(), c.type_().name()))
            .collect();

        let rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(|e| map_error(e, sql))?;

        Ok(QueryResult {
            total_rows: rows.len() as u64,
            rows: rows.iter().map(row_to_json).collect(),
            fields,
            notices: Vec::new(),
        })
    }

    #[instrument(skip(self), fields(len = sql.len()))]
    async fn execute_long_running_statement(&self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| map_error(e, sql))
    }

    #[instrument(skip(self), fields(len = sql.len()))]
    async fn copy_to_stream(&self, sql: &str) -> Result<ByteStream> {
        let owned = sql.to_string();
        let stream = self
            .client
            .copy_out(sql)
            .await
            .map_err(|e| map_error(e, sql))?;
        Ok(stream
            .map(move |chunk| chunk.map_err(|e| map_error(e, &owned)))
            .boxed())
    }

    #[instrument(skip(self, rows), fields(len = sql.len(), rows = rows.total_rows()))]
    async fn copy_from(&self, sql: &str, rows: RowBatch) -> Result<u64> {
        let sink = self
            .client
            .copy_in(sql)
            .await
            .map_err(|e| map_error(e, sql))?;
        let mut sink = std::pin::pin!(sink);

        // Dropping the sink before `finish` aborts the COPY.
        let mut buffer = BytesMut::with_capacity(COPY_BUFFER_SIZE);
        for row in rows {
            buffer.extend_from_slice(&row?);
            if buffer.len() >= COPY_BUFFER_SIZE {
                sink.send(buffer.split().freeze())
                    .await
                    .map_err(|e| map_error(e, sql))?;
            }
        }
        if !buffer.is_empty() {
            sink.send(buffer.freeze())
                .await
                .map_err(|e| map_error(e, sql))?;
        }

        sink.as_mut()
            .finish()
            .await
            .map_err(|e| map_error(e, sql))
    }
}

/// Mask sensitive parts of URL for logging.
fn mask_url(url: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        parsed.to_string()
    } else {
        "[invalid url]".to_string()
    }
}
