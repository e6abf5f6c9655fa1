//! Typed errors for the library surface.
//!
//! Each pipeline stage has its own error enum so callers can tell *where*
//! a query or build failed and decide whether retrying the whole operation
//! makes sense. The CLI wraps these in `anyhow` with added context.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::RetrievedChunk;
use crate::query::QueryStage;

/// Failures while reading the documents directory.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Failures building, searching, or persisting a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch for '{chunk_id}': expected {expected}, found {found}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        chunk_id: String,
    },

    #[error("vector for '{chunk_id}' contains NaN or infinite values")]
    NonFinite { chunk_id: String },

    #[error("index is empty")]
    EmptyIndex,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("manifest serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failures talking to an external collaborator (embedding or completion).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider is disabled")]
    Disabled,

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Parse(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("local inference failed: {0}")]
    Local(String),
}

/// Failures surfaced by [`QueryService::query`](crate::query::QueryService::query).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    InvalidQuery,

    #[error("embedding failed during {stage}: {source}")]
    Embedding {
        stage: QueryStage,
        #[source]
        source: ProviderError,
    },

    #[error("index lookup failed during {stage}: {source}")]
    Index {
        stage: QueryStage,
        #[source]
        source: IndexError,
    },

    /// The LLM call failed after retrieval succeeded. `retrieved` is kept so
    /// the caller can still show sources or a context-only answer.
    #[error("completion failed: {message}")]
    Completion {
        message: String,
        retrieved: Vec<RetrievedChunk>,
    },
}

impl QueryError {
    /// Stage in which the query failed.
    pub fn stage(&self) -> QueryStage {
        match self {
            QueryError::InvalidQuery => QueryStage::Idle,
            QueryError::Embedding { stage, .. } | QueryError::Index { stage, .. } => *stage,
            QueryError::Completion { .. } => QueryStage::Completing,
        }
    }
}
