//! # carto-sync
//!
//! Stream tabular and geometric data between in-memory frames and remote
//! PostGIS tables over the `COPY` protocol.
//!
//! ## Features
//!
//! - **Download**: stream a table or query into a typed [`DataFrame`]
//! - **Upload**: create, replace or append to a table from a frame, with
//!   schema reconciliation and client-side chunking
//! - **Geometry**: WKT, EWKT and (E)WKB encoding of PostGIS geometries
//! - **Rate limits**: bounded retries honoring the server's `Retry-After`
//! - **Backends**: the HTTP SQL API or a direct PostgreSQL connection
//! - **Progress tracking**: per-chunk progress updates via callbacks
//! - **Metrics**: built-in counters for observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use carto_sync::{DataFrame, IfExists, Series, SyncConfig, TableSyncManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .sql_api("https://username.carto.com", "api_key")
//!         .build()?;
//!     let manager = TableSyncManager::connect(&config).await?;
//!
//!     let frame = DataFrame::new(vec![
//!         Series::from_i64("id", [Some(1), Some(2)]),
//!         Series::from_text("name", [Some("Madrid"), Some("Lisboa")]),
//!     ])?;
//!     let table = manager.upload(&frame, "My Cities", IfExists::Replace).await?;
//!
//!     let back = manager.download(&table, None, Some(10), None).await?;
//!     println!("Read {} rows from {}", back.num_rows(), table);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod io;
pub mod lock;
pub mod metrics;
pub mod naming;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod sync;

// Re-exports for convenience
pub use codec::RowBatch;
pub use config::{SyncConfig, SyncConfigBuilder};
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use frame::{DType, DataFrame, Series, Value};
pub use geometry::{Geometry, GeometryFamily, GeometryKind};
pub use lock::{AdvisoryLock, with_lock};
pub use naming::{normalize_name, normalize_names};
pub use reconcile::{IfExists, SchemaReconciler};
pub use remote::{PostgresRemote, QueryResult, RemoteSql, SqlApiClient};
pub use retry::RetryPolicy;
pub use schema::ColumnInfo;
pub use sync::{Bounds, SyncPhase, SyncProgress, TableDescription, TableSyncManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
