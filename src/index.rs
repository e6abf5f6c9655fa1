//! Exact nearest-neighbor vector index.
//!
//! A flat, brute-force index: every stored vector is scored against the query
//! by cosine similarity.
//!
//! # On-disk layout
//!
//! `persist` writes two files into the index directory:
//!
//! ```text
//! vectors.bin    "CVIX" | version u32 | dims u32 | count u32 | ids sha256 [32] | count × dims f32
//! chunks.json    IndexManifest { version, model_name, dims, ids_digest, built_at, chunks[] }
//! ```
//!
//! Integers and floats are little-endian. Rows in `vectors.bin` are in
//! insertion order and line up with `chunks.json`'s `chunks` array, which is
//! how chunk ids are recovered. Both files carry the SHA-256 of the ordered
//! ids, so a vectors file paired with another build's manifest is rejected.
//! Each file is written under a temporary name and renamed into place.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::IndexError;
use crate::models::{Embedding, SearchHit};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const MANIFEST_FILE: &str = "chunks.json";

const MAGIC: &[u8; 4] = b"CVIX";
pub(crate) const FORMAT_VERSION: u32 = 2;
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = 16 + DIGEST_LEN;

/// Flat cosine-similarity index over chunk embeddings.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dims: usize,
    ids: Vec<String>,
    /// Row-major, `ids.len() * dims` values.
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// Build a fresh index. All vectors must share the first vector's length.
    pub fn build(embeddings: impl IntoIterator<Item = Embedding>) -> Result<Self, IndexError> {
        let mut index = VectorIndex::default();
        for embedding in embeddings {
            if index.ids.is_empty() {
                if embedding.vector.is_empty() {
                    return Err(IndexError::DimensionMismatch {
                        expected: 1,
                        found: 0,
                        chunk_id: embedding.chunk_id,
                    });
                }
                index.dims = embedding.vector.len();
            } else if embedding.vector.len() != index.dims {
                return Err(IndexError::DimensionMismatch {
                    expected: index.dims,
                    found: embedding.vector.len(),
                    chunk_id: embedding.chunk_id,
                });
            }
            if !all_finite(&embedding.vector) {
                return Err(IndexError::NonFinite {
                    chunk_id: embedding.chunk_id,
                });
            }
            index.vectors.extend_from_slice(&embedding.vector);
            index.ids.push(embedding.chunk_id);
        }
        Ok(index)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Chunk ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Top-`k` hits by descending cosine similarity.
    ///
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                found: query.len(),
                chunk_id: "<query>".to_string(),
            });
        }
        if !all_finite(query) {
            return Err(IndexError::NonFinite {
                chunk_id: "<query>".to_string(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dims)
            .map(|row| cosine_similarity(query, row))
            .enumerate()
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk_id: self.ids[i].clone(),
                score,
            })
            .collect())
    }

    /// Write `vectors.bin` into `dir`. The manifest is written by the caller,
    /// which owns the chunk metadata.
    pub fn write_vectors(&self, dir: &Path) -> Result<(), IndexError> {
        let path = dir.join(VECTORS_FILE);
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.ids.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&ids_digest(&self.ids));
        bytes.extend_from_slice(&vec_to_blob(&self.vectors));
        write_atomic(&path, &bytes)
    }

    /// Read `vectors.bin` from `dir` and attach `ids` (from the manifest).
    ///
    /// Fails with `Corrupt` unless `ids` are exactly the ids the file was
    /// written with.
    pub fn read_vectors(dir: &Path, ids: Vec<String>) -> Result<Self, IndexError> {
        let path = dir.join(VECTORS_FILE);
        let bytes = std::fs::read(&path).map_err(|source| IndexError::Io { path, source })?;

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(IndexError::Corrupt(format!("{} has no CVIX header", VECTORS_FILE)));
        }
        let version = read_u32(&bytes, 4);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index format version {}",
                version
            )));
        }
        let dims = read_u32(&bytes, 8) as usize;
        let count = read_u32(&bytes, 12) as usize;
        if dims == 0 && count > 0 {
            return Err(IndexError::Corrupt(format!(
                "{} holds {} vectors of 0 dims",
                VECTORS_FILE, count
            )));
        }

        let body = &bytes[HEADER_LEN..];
        if body.len() != count * dims * 4 {
            return Err(IndexError::Corrupt(format!(
                "expected {} vectors of {} dims, found {} bytes",
                count,
                dims,
                body.len()
            )));
        }
        if ids.len() != count {
            return Err(IndexError::Corrupt(format!(
                "manifest lists {} chunks but {} holds {} vectors",
                ids.len(),
                VECTORS_FILE,
                count
            )));
        }
        if bytes[16..HEADER_LEN] != ids_digest(&ids) {
            return Err(IndexError::Corrupt(format!(
                "{} was written for a different chunk list",
                VECTORS_FILE
            )));
        }

        let vectors = blob_to_vec(body);
        if !all_finite(&vectors) {
            return Err(IndexError::Corrupt(format!(
                "{} contains NaN or infinite values",
                VECTORS_FILE
            )));
        }

        Ok(Self {
            dims,
            ids,
            vectors,
        })
    }
}

/// SHA-256 over the ordered chunk ids, each terminated by `\n`.
pub fn ids_digest(ids: &[String]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, bytes).map_err(|source| IndexError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        IndexError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Encode floats as little-endian bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero
/// vector on either side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // f64 accumulators keep squares of large f32 components finite.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::from(f32::EPSILON) {
        return 0.0;
    }

    (dot / denom) as f32
}
