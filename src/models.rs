//! Core data models used throughout the assistant.
//!
//! These types represent the chunks, embeddings, and query results that flow
//! through the build and retrieval pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unit of source text with exactly one embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Relative path for whole-file chunks, `path#index` for paragraph chunks.
    pub id: String,
    /// Path of the source document relative to the docs root.
    pub source_path: String,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    pub fn new(id: impl Into<String>, source_path: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = content_hash(&text);
        Self {
            id: id.into(),
            source_path: source_path.into(),
            text,
            hash,
        }
    }
}

/// Vector representation of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

/// A single nearest-neighbor hit from the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    /// Cosine similarity; higher is better.
    pub score: f32,
}

/// A chunk returned for a query, with its rank (1-based) and similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub rank: usize,
    pub score: f32,
    pub chunk: Chunk,
}

/// Outcome of one query. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    /// Most similar first.
    pub retrieved: Vec<RetrievedChunk>,
    pub answer: String,
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
