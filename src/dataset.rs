//! Datasets: a remote table, a remote query or a local frame.

use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::reconcile::IfExists;
use crate::sync::{TableSyncManager, is_sql_query};

/// Source or destination of a transfer.
#[derive(Debug, Clone)]
pub enum Dataset {
    /// Remote table; `schema` defaults to the current schema
    Table {
        /// Table name
        name: String,
        /// Schema name
        schema: Option<String>,
    },
    /// Remote query
    Query(String),
    /// Local frame
    Frame(DataFrame),
}

impl Dataset {
    /// Table in the current schema.
    pub fn table(name: impl Into<String>) -> Self {
        Dataset::Table {
            name: name.into(),
            schema: None,
        }
    }

    /// Dataset for a table name or an SQL query.
    pub fn from_source(source: &str) -> Self {
        if is_sql_query(source) {
            Dataset::Query(source.to_string())
        } else {
            Dataset::table(source)
        }
    }

    /// Read query of a remote dataset; `None` for frames.
    pub async fn get_query(&self, manager: &TableSyncManager) -> Result<Option<String>> {
        match self {
            Dataset::Table { name, schema } => manager
                .compute_query(name, schema.as_deref())
                .await
                .map(Some),
            Dataset::Query(query) => Ok(Some(query.clone())),
            Dataset::Frame(_) => Ok(None),
        }
    }

    /// Fetch the dataset as a frame.
    pub async fn download(
        &self,
        manager: &TableSyncManager,
        limit: Option<i64>,
        retry_times: Option<u32>,
    ) -> Result<DataFrame> {
        match self {
            Dataset::Table { name, schema } => {
                manager
                    .download(name, schema.as_deref(), limit, retry_times)
                    .await
            }
            Dataset::Query(query) => manager.download(query, None, limit, retry_times).await,
            Dataset::Frame(frame) => match limit {
                None => Ok(frame.clone()),
                Some(n) if n >= 0 => Ok(frame.head(n as usize)),
                Some(n) => Err(Error::validation(format!(
                    "`limit` parameter must be an integer >= 0, got {}",
                    n
                ))),
            },
        }
    }

    /// Store the dataset in `table_name`. Returns the normalized table name.
    ///
    /// Frames are copied from the client, queries and tables are copied
    /// server-side.
    pub async fn upload(
        &self,
        manager: &TableSyncManager,
        table_name: &str,
        if_exists: IfExists,
    ) -> Result<String> {
        let cartodbfy = manager.upload_config().cartodbfy;
        match self {
            Dataset::Frame(frame) => manager.upload(frame, table_name, if_exists).await,
            Dataset::Query(query) => {
                manager
                    .create_table_from_query(query, table_name, if_exists, cartodbfy)
                    .await
            }
            Dataset::Table { name, schema } => {
                let query = manager.compute_query(name, schema.as_deref()).await?;
                manager
                    .create_table_from_query(&query, table_name, if_exists, cartodbfy)
                    .await
            }
        }
    }

    /// Whether the dataset exists remotely. Frames never do.
    pub async fn exists(&self, manager: &TableSyncManager) -> Result<bool> {
        match self {
            Dataset::Table { name, schema } => manager.has_table(name, schema.as_deref()).await,
            Dataset::Query(query) => manager.has_table(query, None).await,
            Dataset::Frame(_) => Ok(false),
        }
    }

    /// Drop the remote table. Returns whether it existed.
    pub async fn delete(&self, manager: &TableSyncManager) -> Result<bool> {
        match self {
            Dataset::Table { name, schema } => {
                manager.delete_table(name, schema.as_deref()).await
            }
            Dataset::Query(_) => Err(Error::validation(
                "A query cannot be deleted. Delete the tables it reads instead.",
            )),
            Dataset::Frame(_) => Ok(false),
        }
    }
}

impl From<DataFrame> for Dataset {
    fn from(frame: DataFrame) -> Self {
        Dataset::Frame(frame)
    }
}
