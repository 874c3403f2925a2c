//! Error types for shard file access.

use thiserror::Error;

/// Errors from remote storage and Parquet decoding.
#[derive(Debug, Error)]
pub enum ShardIoError {
    /// Configuration error (bad base URL, zero-sized pool)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Remote file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Storage/IO error, including malformed Parquet files
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested columns do not match the file schema
    #[error("Schema error: {0}")]
    Schema(String),
}

impl ShardIoError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }
}

/// Result type for shard IO operations.
pub type Result<T> = std::result::Result<T, ShardIoError>;

impl From<catasto_tabular::TabularError> for ShardIoError {
    fn from(err: catasto_tabular::TabularError) -> Self {
        ShardIoError::Schema(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ShardIoError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        ShardIoError::Storage(format!("Parquet error: {}", err))
    }
}

impl From<reqwest::Error> for ShardIoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ShardIoError::Http(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            ShardIoError::Http(format!("Connection error: {}", err))
        } else {
            ShardIoError::Http(format!("HTTP error: {}", err))
        }
    }
}
