//! Error types for carto-sync.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for carto-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation error, raised before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destination table already exists under the fail policy
    #[error(
        "Table \"{schema}.{table}\" already exists. Please choose a different table name \
         or use if_exists=\"replace\" to overwrite it."
    )]
    TableExists {
        /// Schema name
        schema: String,
        /// Table name
        table: String,
    },

    /// Table or query target does not exist
    #[error("{message}")]
    NotFound {
        /// Error message
        message: String,
    },

    /// Remote service asked us to slow down
    #[error("Rate limited: {message} (retry after {}s)", .retry_after.as_secs())]
    RateLimited {
        /// Server-provided wait before the next attempt
        retry_after: Duration,
        /// Error message
        message: String,
    },

    /// Retry exhausted
    #[error("Operation failed after {attempts} retries: {message}")]
    RetryExhausted {
        /// Number of retries made
        attempts: u32,
        /// Error message
        message: String,
        /// Last error encountered
        #[source]
        last_error: Option<Box<Error>>,
    },

    /// Remote execution error (malformed SQL, permission denied, ...)
    #[error("Remote error: {message}{}", query_suffix(.query))]
    Remote {
        /// Error message reported by the remote service
        message: String,
        /// Statement that triggered the error
        query: Option<String>,
    },

    /// HTTP transport error
    #[error("HTTP error: {message}")]
    Http {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<reqwest::Error>,
    },

    /// PostgreSQL error
    #[error("PostgreSQL error: {message}")]
    Postgres {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// A local value could not be encoded into the wire row format
    #[error("Encoding error in column '{column}': {message}")]
    Encode {
        /// Local column name
        column: String,
        /// Error message
        message: String,
    },

    /// The remote byte stream could not be decoded
    #[error("Decoding error at line {line}: {message}")]
    Decode {
        /// 1-based line of the stream, header included
        line: u64,
        /// Error message
        message: String,
    },

    /// Geometry parsing or serialization error
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Upload would exceed the remaining storage quota
    #[error(
        "DB Quota will be exceeded. The remaining quota is {remaining} bytes and the dataset \
         size is {required} bytes."
    )]
    Quota {
        /// Estimated serialized size of the upload
        required: u64,
        /// Remaining quota reported by the remote service
        remaining: u64,
    },

    /// Advisory lock is held by another writer
    #[error("Lock '{name}' is held by another writer")]
    LockHeld {
        /// Lock name
        name: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn query_suffix(query: &Option<String>) -> String {
    match query {
        Some(query) => format!(" (query: {})", query),
        None => String::new(),
    }
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a rate-limit error.
    pub fn rate_limited(retry_after: Duration, message: impl Into<String>) -> Self {
        Self::RateLimited {
            retry_after,
            message: message.into(),
        }
    }

    /// Create a remote execution error.
    pub fn remote(message: impl Into<String>, query: Option<&str>) -> Self {
        Self::Remote {
            message: message.into(),
            query: query.map(str::to_string),
        }
    }

    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a PostgreSQL error.
    pub fn postgres(message: impl Into<String>, source: tokio_postgres::Error) -> Self {
        Self::Postgres {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an encoding error.
    pub fn encode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a decoding error.
    pub fn decode(line: u64, message: impl Into<String>) -> Self {
        Self::Decode {
            line,
            message: message.into(),
        }
    }

    /// Create a geometry error.
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::Geometry(message.into())
    }

    /// Create a serialization error with source.
    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Check if this error originates from rate limiting, retried or not.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::RetryExhausted { .. }
        )
    }

    /// Whether the remote service reported a missing relation.
    pub fn is_missing_relation(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Remote { message, .. } => message.contains("does not exist"),
            _ => false,
        }
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::TableExists { .. } => "TABLE_EXISTS",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::Remote { .. } => "REMOTE_ERROR",
            Error::Http { .. } => "HTTP_ERROR",
            Error::Postgres { .. } => "PG_ERROR",
            Error::Encode { .. } => "ENCODE_ERROR",
            Error::Decode { .. } => "DECODE_ERROR",
            Error::Geometry(_) => "GEOMETRY_ERROR",
            Error::Quota { .. } => "QUOTA_EXCEEDED",
            Error::LockHeld { .. } => "LOCK_HELD",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

/// Error context extension trait.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ErrorContext<T>
    for std::result::Result<T, E>
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::config_with_source(message, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::config_with_source(f(), e))
    }
}
