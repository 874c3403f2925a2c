//! Error types for catasto lookups with HTTP status mapping.

use catasto_shard_io::ShardIoError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the lookup core.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The municipality code is not in the catalog
    #[error("Comune non trovato")]
    NotFoundComune,

    /// No parcel row matched comune, foglio and particella
    #[error("Particella non trovata")]
    NotFoundParticella,

    /// Network or decoding failure while reading a remote file
    #[error("Remote fetch error: {0}")]
    RemoteFetch(String),

    /// Malformed query construction or result shape
    #[error("Query error: {0}")]
    Query(String),

    /// The global index could not be loaded
    #[error("Catalog load error: {0}")]
    CatalogLoad(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Fieldless error kind, for callers that branch without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFoundComune,
    NotFoundParticella,
    RemoteFetch,
    Query,
    CatalogLoad,
    Config,
}

impl LookupError {
    pub fn remote_fetch(msg: impl Into<String>) -> Self {
        Self::RemoteFetch(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn catalog_load(msg: impl Into<String>) -> Self {
        Self::CatalogLoad(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFoundComune => ErrorKind::NotFoundComune,
            Self::NotFoundParticella => ErrorKind::NotFoundParticella,
            Self::RemoteFetch(_) => ErrorKind::RemoteFetch,
            Self::Query(_) => ErrorKind::Query,
            Self::CatalogLoad(_) => ErrorKind::CatalogLoad,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFoundComune | Self::NotFoundParticella)
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        if self.is_not_found() {
            404
        } else {
            500
        }
    }

    /// JSON body in the shape `{"detail": "..."}`.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            detail: self.to_string(),
        }
    }
}

/// JSON error response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl From<ShardIoError> for LookupError {
    fn from(err: ShardIoError) -> Self {
        match err {
            ShardIoError::Schema(msg) => LookupError::Query(msg),
            other => LookupError::RemoteFetch(other.to_string()),
        }
    }
}

/// Result type for lookup operations.
pub type Result<T> = std::result::Result<T, LookupError>;
