//! Table synchronization between local frames and remote tables.

use crate::codec::{NULL_SENTINEL, RowBatch, decode_stream, estimate_size};
use crate::config::{SyncConfig, UploadConfig};
use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::geometry::{GeometryFamily, GeometryKind};
use crate::metrics::{Metrics, Timer};
use crate::naming::normalize_name;
use crate::reconcile::{ExecutionPlan, IfExists, SchemaReconciler, StatementBuilder};
use crate::remote::{self, QueryResult, RemoteSql};
use crate::retry::RetryPolicy;
use crate::schema::{
    ColumnInfo, FORBIDDEN_COLUMNS, ID_COLUMN, column_list, from_local, from_remote,
    qualified_table, quote_ident, quote_literal,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Sync progress callback.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Sync progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    /// Table being transferred
    pub table: String,
    /// Current phase
    pub phase: SyncPhase,
    /// Zero-based chunk index
    pub chunk: usize,
    /// Number of chunks of the upload
    pub total_chunks: usize,
    /// Rows in the current chunk
    pub rows: usize,
    /// Reconciliation mode used for the current chunk
    pub if_exists: IfExists,
}

/// Sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Reconciling the destination schema
    Preparing,
    /// Copying rows of a chunk
    Uploading,
    /// Registering the table with the platform
    Registering,
    /// Completed
    Completed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Preparing => write!(f, "preparing"),
            SyncPhase::Uploading => write!(f, "uploading"),
            SyncPhase::Registering => write!(f, "registering"),
            SyncPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Row count and geometry family of a remote table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    /// Schema name
    pub schema: String,
    /// Table name
    pub table: String,
    /// Number of rows
    pub num_rows: u64,
    /// Geometry family of `the_geom`, if any
    pub geom_type: Option<GeometryFamily>,
}

/// Extent of the geometries of a query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    /// Minimum x
    pub xmin: f64,
    /// Minimum y
    pub ymin: f64,
    /// Maximum x
    pub xmax: f64,
    /// Maximum y
    pub ymax: f64,
}

impl Bounds {
    /// `[[xmin, ymin], [xmax, ymax]]`
    pub fn corners(&self) -> [[f64; 2]; 2] {
        [[self.xmin, self.ymin], [self.xmax, self.ymax]]
    }
}

/// Whether `source` is an SQL query rather than a table name.
pub fn is_sql_query(source: &str) -> bool {
    let trimmed = source.trim_start();
    ["select", "with"].iter().any(|keyword| {
        let head = trimmed.get(..keyword.len());
        let rest = trimmed.get(keyword.len()..);
        matches!(
            (head, rest),
            (Some(h), Some(r)) if h.eq_ignore_ascii_case(keyword) && r.starts_with(char::is_whitespace)
        )
    })
}

fn validate_limit(limit: Option<i64>) -> Result<Option<u64>> {
    match limit {
        None => Ok(None),
        Some(n) if n >= 0 => Ok(Some(n as u64)),
        Some(n) => Err(Error::validation(format!(
            "`limit` parameter must be an integer >= 0, got {}",
            n
        ))),
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("Table name must not be empty"));
    }
    Ok(())
}

/// Tie a download failure to the table or query it was reading.
fn download_error(err: Error, source: &str) -> Error {
    match err {
        Error::Remote { message, .. } if message.contains("does not exist") => Error::not_found(
            format!("Table or query \"{}\" does not exist: {}", source, message),
        ),
        Error::Decode { line, message } => {
            Error::decode(line, format!("{} (reading \"{}\")", message, source))
        }
        other => other,
    }
}

/// Number of upload chunks keeping each under `max_size` bytes.
fn chunk_count(estimate: u64, max_size: Option<u64>, rows: usize) -> usize {
    match max_size {
        Some(max) if max > 0 && estimate > max => {
            let n = usize::try_from(estimate.div_ceil(max)).unwrap_or(usize::MAX);
            n.clamp(1, rows.max(1))
        }
        _ => 1,
    }
}

/// Moves frames to and from remote tables.
pub struct TableSyncManager {
    remote: Arc<dyn RemoteSql>,
    retry: RetryPolicy,
    reconciler: SchemaReconciler,
    upload: UploadConfig,
    metrics: Arc<Metrics>,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for TableSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSyncManager")
            .field("retry", &self.retry)
            .field("upload", &self.upload)
            .finish_non_exhaustive()
    }
}

impl TableSyncManager {
    /// Create a manager over `remote` with default settings.
    pub fn new(remote: Arc<dyn RemoteSql>) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            remote,
            retry: RetryPolicy::default().with_metrics(metrics.clone()),
            reconciler: SchemaReconciler::default(),
            upload: UploadConfig::default(),
            metrics,
            progress_callback: None,
        }
    }

    /// Create a manager over `remote` configured by `config`.
    pub fn with_config(remote: Arc<dyn RemoteSql>, config: &SyncConfig) -> Self {
        let manager = Self::new(remote);
        let retry = manager.retry.clone().with_retry_times(config.retry.retry_times);
        manager
            .with_retry_policy(retry)
            .with_upload_config(config.upload.clone())
    }

    /// Connect the configured backend and create a manager over it.
    #[instrument(skip(config), fields(backend = %config.remote.backend))]
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        info!("Initializing table sync manager...");
        let remote = remote::connect(config).await?;
        Ok(Self::with_config(remote, config))
    }

    /// Replace the retry policy. Retries keep being counted in this manager's metrics.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.with_metrics(self.metrics.clone());
        self
    }

    /// Replace the upload settings.
    pub fn with_upload_config(mut self, upload: UploadConfig) -> Self {
        self.reconciler = SchemaReconciler::new(upload.payload_threshold);
        self.upload = upload;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Shared metrics.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Upload settings in use.
    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload
    }

    /// Underlying remote.
    pub fn remote(&self) -> &Arc<dyn RemoteSql> {
        &self.remote
    }

    fn report_progress(&self, progress: SyncProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    async fn execute(&self, label: &str, sql: &str) -> Result<QueryResult> {
        let remote = &self.remote;
        let result = self
            .retry
            .run(label, move || async move { remote.execute_statement(sql).await })
            .await;
        self.metrics.record_statement();
        result
    }

    async fn execute_long_running(&self, label: &str, sql: &str) -> Result<()> {
        let remote = &self.remote;
        let result = self
            .retry
            .run(label, move || async move {
                remote.execute_long_running_statement(sql).await
            })
            .await;
        self.metrics.record_statement();
        result
    }

    async fn run_plan(&self, plan: &ExecutionPlan) -> Result<()> {
        match plan {
            ExecutionPlan::Nothing => Ok(()),
            ExecutionPlan::Direct(sql) => self.execute_long_running("Schema update", sql).await,
            ExecutionPlan::ViaFunction {
                create,
                invoke,
                drop,
            } => {
                debug!("Schema update exceeds payload threshold, using a temporary function");
                self.execute_long_running("Function creation", create).await?;
                let invoked = self.execute_long_running("Function call", invoke).await;
                if let Err(e) = self.execute("Function cleanup", drop).await {
                    warn!("Failed to drop temporary function: {}", e);
                }
                invoked
            }
        }
    }

    /// Schema of the current credentials.
    pub async fn get_schema(&self) -> Result<String> {
        let result = self.execute("Schema lookup", "SELECT current_schema()").await?;
        result
            .first_str("current_schema")
            .map(str::to_string)
            .ok_or_else(|| Error::remote("current_schema() returned no rows", None))
    }

    async fn resolve_schema(&self, schema: Option<&str>) -> Result<String> {
        match schema {
            Some(schema) => Ok(schema.to_string()),
            None => self.get_schema().await,
        }
    }

    /// Read query for a table name or query.
    pub async fn compute_query(&self, source: &str, schema: Option<&str>) -> Result<String> {
        if is_sql_query(source) {
            return Ok(source.to_string());
        }
        validate_table_name(source)?;
        let schema = self.resolve_schema(schema).await?;
        Ok(format!("SELECT * FROM {}", qualified_table(&schema, source)))
    }

    /// Columns projected by `query`.
    pub async fn get_query_columns(&self, query: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("SELECT * FROM ({}) _q LIMIT 0", query);
        let result = self.execute("Column introspection", &sql).await?;
        Ok(from_remote(&result.fields))
    }

    /// Column names of a table or query, without `exclude`.
    pub async fn get_column_names(
        &self,
        source: &str,
        schema: Option<&str>,
        exclude: &[&str],
    ) -> Result<Vec<String>> {
        let query = self.compute_query(source, schema).await?;
        Ok(self
            .get_query_columns(&query)
            .await?
            .into_iter()
            .map(|c| c.local_name)
            .filter(|name| !exclude.contains(&name.as_str()))
            .collect())
    }

    /// Number of rows returned by `query`.
    pub async fn get_num_rows(&self, query: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM ({}) _query", query);
        let result = self.execute("Row count", &sql).await?;
        result
            .first_i64("count")
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| Error::remote("COUNT(*) returned no rows", Some(&sql)))
    }

    /// Geometry family of `the_geom` in `query`.
    pub async fn get_geom_type(&self, query: &str) -> Result<Option<GeometryFamily>> {
        let sql = format!(
            "SELECT DISTINCT ST_GeometryType(the_geom) AS geom_type FROM ({}) q LIMIT 5",
            query
        );
        let result = self.execute("Geometry type", &sql).await?;
        Ok(result
            .first_str("geom_type")
            .and_then(GeometryKind::from_name)
            .and_then(|kind| kind.family()))
    }

    /// Extent of `the_geom` in `query`, `None` when it holds no geometry.
    pub async fn get_bounds(&self, query: &str) -> Result<Option<Bounds>> {
        let sql = format!(
            "SELECT ST_XMin(geom_env) AS xmin, ST_YMin(geom_env) AS ymin, \
             ST_XMax(geom_env) AS xmax, ST_YMax(geom_env) AS ymax \
             FROM (SELECT ST_Extent(the_geom) geom_env FROM ({}) q) q",
            query
        );
        let result = self.execute("Bounds", &sql).await?;
        let corner = |name: &str| result.first_f64(name);
        Ok(
            match (corner("xmin"), corner("ymin"), corner("xmax"), corner("ymax")) {
                (Some(xmin), Some(ymin), Some(xmax), Some(ymax)) => Some(Bounds {
                    xmin,
                    ymin,
                    xmax,
                    ymax,
                }),
                _ => None,
            },
        )
    }

    /// Tables read by `query`, without schema prefix.
    pub async fn get_table_names(&self, query: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT array_to_json(CDB_QueryTablesText({})) AS tables",
            quote_literal(query)
        );
        let result = self.execute("Query tables", &sql).await?;
        let tables = match result.first("tables") {
            Some(serde_json::Value::Array(tables)) => tables,
            _ => return Ok(Vec::new()),
        };
        Ok(tables
            .iter()
            .filter_map(serde_json::Value::as_str)
            .map(|table| match table.split_once('.') {
                Some((_, name)) => name.to_string(),
                None => table.to_string(),
            })
            .collect())
    }

    /// Row count and geometry family of a table.
    #[instrument(skip(self))]
    pub async fn describe_table(&self, table: &str, schema: Option<&str>) -> Result<TableDescription> {
        validate_table_name(table)?;
        let schema = self.resolve_schema(schema).await?;
        let query = self.compute_query(table, Some(&schema)).await?;
        if !self.query_exists(&query).await? {
            return Err(Error::not_found(format!(
                "Table \"{}.{}\" does not exist",
                schema, table
            )));
        }
        Ok(TableDescription {
            num_rows: self.get_num_rows(&query).await?,
            geom_type: self.get_geom_type(&query).await?,
            schema,
            table: table.to_string(),
        })
    }

    /// Normalize a table name, reporting when it changes.
    pub fn normalize_table_name(&self, table: &str) -> String {
        let normalized = normalize_name(table);
        if normalized != table {
            info!("Table name normalized: \"{}\"", normalized);
        }
        normalized
    }

    async fn query_exists(&self, query: &str) -> Result<bool> {
        match self.execute("Existence check", &format!("EXPLAIN {}", query)).await {
            Ok(_) => Ok(true),
            Err(Error::Remote { message, .. }) => {
                debug!("Existence check failed: {}", message);
                Ok(false)
            }
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether a table (or query) exists remotely.
    #[instrument(skip(self))]
    pub async fn has_table(&self, table: &str, schema: Option<&str>) -> Result<bool> {
        let query = self.compute_query(table, schema).await?;
        self.query_exists(&query).await
    }

    /// Drop a table. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn delete_table(&self, table: &str, schema: Option<&str>) -> Result<bool> {
        validate_table_name(table)?;
        let schema = self.resolve_schema(schema).await?;
        let existed = self.has_table(table, Some(&schema)).await?;
        let sql = format!("DROP TABLE IF EXISTS {}", qualified_table(&schema, table));
        self.execute("Drop table", &sql).await?;
        if existed {
            info!("Table \"{}.{}\" deleted", schema, table);
        } else {
            debug!("Table \"{}.{}\" did not exist", schema, table);
        }
        Ok(existed)
    }

    /// Rename a table. Returns the normalized new name.
    #[instrument(skip(self))]
    pub async fn rename_table(
        &self,
        table: &str,
        new_table: &str,
        if_exists: IfExists,
    ) -> Result<String> {
        validate_table_name(table)?;
        validate_table_name(new_table)?;
        let new_table = self.normalize_table_name(new_table);
        if table == new_table {
            return Err(Error::validation(
                "Table names are equal. Please choose a different table name.",
            ));
        }
        if if_exists == IfExists::Append {
            return Err(Error::validation(
                "if_exists=\"append\" is not supported when renaming a table",
            ));
        }

        let schema = self.get_schema().await?;
        if !self.has_table(table, Some(&schema)).await? {
            return Err(Error::not_found(format!(
                "Table \"{}.{}\" does not exist",
                schema, table
            )));
        }

        if self.has_table(&new_table, Some(&schema)).await? {
            match if_exists {
                IfExists::Replace => {
                    info!("Removing table \"{}\"", new_table);
                    self.delete_table(&new_table, Some(&schema)).await?;
                }
                _ => {
                    return Err(Error::TableExists {
                        schema,
                        table: new_table,
                    });
                }
            }
        }

        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified_table(&schema, table),
            quote_ident(&new_table)
        );
        self.execute("Rename table", &sql).await?;
        Ok(new_table)
    }

    fn registration_statement(schema: &str, table: &str) -> String {
        format!(
            "SELECT CDB_CartodbfyTable({}, {})",
            quote_literal(schema),
            quote_literal(table)
        )
    }

    /// Create (or extend) a table from a query. Returns the normalized name.
    #[instrument(skip(self, query))]
    pub async fn create_table_from_query(
        &self,
        query: &str,
        table: &str,
        if_exists: IfExists,
        cartodbfy: bool,
    ) -> Result<String> {
        validate_table_name(table)?;
        let table = self.normalize_table_name(table);
        let schema = self.get_schema().await?;
        let target = qualified_table(&schema, &table);
        let exists = self.has_table(&table, Some(&schema)).await?;

        match (exists, if_exists) {
            (true, IfExists::Fail) => {
                return Err(Error::TableExists { schema, table });
            }
            (true, IfExists::Append) => {
                let sql = format!("INSERT INTO {} {}", target, query);
                self.execute_long_running("Insert from query", &sql).await?;
            }
            _ => {
                debug!("Creating table \"{}\"", table);
                let mut builder = StatementBuilder::new();
                builder
                    .push(format!("DROP TABLE IF EXISTS {}", target))
                    .push(format!("CREATE TABLE {} AS ({})", target, query));
                if cartodbfy {
                    builder.push(Self::registration_statement(&schema, &table));
                }
                let plan = builder
                    .atomic()
                    .plan(&schema, self.upload.payload_threshold);
                self.run_plan(&plan).await?;
            }
        }
        Ok(table)
    }

    /// Download a table or query into a frame.
    ///
    /// `retry_times` overrides the retry budget of this manager.
    #[instrument(skip(self))]
    pub async fn download(
        &self,
        source: &str,
        schema: Option<&str>,
        limit: Option<i64>,
        retry_times: Option<u32>,
    ) -> Result<DataFrame> {
        let limit = validate_limit(limit)?;
        let timer = Timer::start("Download");
        let result = self
            .download_inner(source, schema, limit, retry_times)
            .await
            .map_err(|e| download_error(e, source));
        match &result {
            Ok(frame) => self
                .metrics
                .record_download(frame.num_rows() as u64, timer.stop()),
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn download_inner(
        &self,
        source: &str,
        schema: Option<&str>,
        limit: Option<u64>,
        retry_times: Option<u32>,
    ) -> Result<DataFrame> {
        let query = self.compute_query(source, schema).await?;
        let mut columns = self.get_query_columns(&query).await?;
        columns.retain(|c| !FORBIDDEN_COLUMNS.contains(&c.local_name.to_lowercase().as_str()));
        if columns.is_empty() {
            return DataFrame::new(Vec::new());
        }

        let projection: Vec<String> = columns.iter().map(|c| quote_ident(&c.local_name)).collect();
        let mut select = format!("SELECT {} FROM ({}) _q", projection.join(","), query);
        if let Some(limit) = limit {
            select.push_str(&format!(" LIMIT {}", limit));
        }
        let copy_sql = format!(
            "COPY ({}) TO stdout WITH (FORMAT csv, HEADER true, NULL {})",
            select,
            quote_literal(NULL_SENTINEL)
        );

        let retry = match retry_times {
            Some(n) => self.retry.clone().with_retry_times(n),
            None => self.retry.clone(),
        };
        let label = format!("Read call for \"{}\"", source);
        let remote = &self.remote;
        let (sql, cols) = (copy_sql.as_str(), columns.as_slice());
        let frame = retry
            .run(&label, move || async move {
                let stream = remote.copy_to_stream(sql).await?;
                decode_stream(stream, cols).await
            })
            .await?;

        let frame = match frame.column(ID_COLUMN).cloned() {
            Some(ids) => frame.with_index(ids.with_name(""))?,
            None => frame,
        };
        info!("Downloaded {} rows", frame.num_rows());
        Ok(frame)
    }

    /// Upload a frame into a table. Returns the normalized table name.
    #[instrument(skip(self, frame), fields(rows = frame.num_rows()))]
    pub async fn upload(
        &self,
        frame: &DataFrame,
        table_name: &str,
        if_exists: IfExists,
    ) -> Result<String> {
        validate_table_name(table_name)?;
        let timer = Timer::start("Upload");
        let result = self.upload_inner(frame, table_name, if_exists).await;
        match &result {
            Ok(_) => self
                .metrics
                .record_upload(frame.num_rows() as u64, timer.stop()),
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn upload_inner(
        &self,
        frame: &DataFrame,
        table_name: &str,
        if_exists: IfExists,
    ) -> Result<String> {
        let table = self.normalize_table_name(table_name);
        let columns: Arc<[ColumnInfo]> = from_local(frame).into();
        if columns.is_empty() {
            return Err(Error::validation("Nothing to upload: the frame has no columns"));
        }

        let needs_estimate = !self.upload.skip_quota_check || self.upload.max_upload_size.is_some();
        let estimate = if needs_estimate {
            estimate_size(frame, &columns, self.upload.estimate_sample_size)?
        } else {
            0
        };

        if !self.upload.skip_quota_check {
            let remote = &self.remote;
            let remaining = self
                .retry
                .run("Quota check", move || async move { remote.remaining_quota().await })
                .await?;
            if let Some(remaining) = remaining {
                if estimate > remaining {
                    return Err(Error::Quota {
                        required: estimate,
                        remaining,
                    });
                }
            }
        }

        let schema = self.get_schema().await?;
        let target = qualified_table(&schema, &table);
        let total_chunks = chunk_count(estimate, self.upload.max_upload_size, frame.num_rows());
        if total_chunks > 1 {
            info!(
                "Uploading {} rows in {} chunks (estimated {} bytes)",
                frame.num_rows(),
                total_chunks,
                estimate
            );
        }

        self.report_progress(SyncProgress {
            table: table.clone(),
            phase: SyncPhase::Preparing,
            chunk: 0,
            total_chunks,
            rows: frame.num_rows(),
            if_exists,
        });

        let existing = if self.has_table(&table, Some(&schema)).await? {
            let existing = if if_exists == IfExists::Replace {
                let query = format!("SELECT * FROM {}", target);
                self.get_query_columns(&query).await?
            } else {
                Vec::new()
            };
            Some(existing)
        } else {
            None
        };
        let reconciliation =
            self.reconciler
                .reconcile(&schema, &table, &columns, existing.as_deref(), if_exists)?;
        debug!("Reconciliation: {:?}", reconciliation.action);
        self.run_plan(&reconciliation.plan).await?;

        let copy_sql = format!(
            "COPY {}({}) FROM stdin WITH (FORMAT csv, DELIMITER '|', NULL {})",
            target,
            column_list(&columns),
            quote_literal(NULL_SENTINEL)
        );

        let chunks = if total_chunks > 1 {
            frame.split(total_chunks)
        } else {
            vec![frame.clone()]
        };
        let label = format!("Write call to \"{}.{}\"", schema, table);
        let mut copied = 0u64;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mode = if i == 0 { if_exists } else { IfExists::Append };
            self.report_progress(SyncProgress {
                table: table.clone(),
                phase: SyncPhase::Uploading,
                chunk: i,
                total_chunks,
                rows: chunk.num_rows(),
                if_exists: mode,
            });

            let chunk = Arc::new(chunk);
            let remote = &self.remote;
            let (sql, data, cols) = (copy_sql.as_str(), &chunk, &columns);
            copied += self
                .retry
                .run(&label, move || async move {
                    let batch = RowBatch::new(data.clone(), cols.clone())?;
                    remote.copy_from(sql, batch).await
                })
                .await?;
            self.metrics.record_chunk();
        }
        debug!("Copied {} rows into {}", copied, target);

        if self.upload.cartodbfy && reconciliation.action.is_fresh() {
            self.report_progress(SyncProgress {
                table: table.clone(),
                phase: SyncPhase::Registering,
                chunk: total_chunks.saturating_sub(1),
                total_chunks,
                rows: frame.num_rows(),
                if_exists,
            });
            self.execute("Registration", &Self::registration_statement(&schema, &table))
                .await?;
        }

        self.report_progress(SyncProgress {
            table: table.clone(),
            phase: SyncPhase::Completed,
            chunk: total_chunks.saturating_sub(1),
            total_chunks,
            rows: frame.num_rows(),
            if_exists,
        });
        info!("Uploaded {} rows to \"{}.{}\"", frame.num_rows(), schema, table);
        Ok(table)
    }
}
