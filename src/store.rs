//! Index snapshots and atomic swapping.
//!
//! A [`KnowledgeBase`] pairs a [`VectorIndex`] with the chunks its rows refer
//! to, so a search hit can always be resolved to text. Snapshots are
//! immutable; [`SharedIndex`] hands them out as `Arc`s and replaces the whole
//! snapshot on rebuild, so a query never sees a half-built index.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::index::{ids_digest, write_atomic, VectorIndex, FORMAT_VERSION, MANIFEST_FILE, VECTORS_FILE};
use crate::models::{Chunk, Embedding, RetrievedChunk};

/// Contents of `chunks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub model_name: String,
    pub dims: usize,
    /// Hex SHA-256 of the ordered chunk ids; `vectors.bin` holds the same digest.
    pub ids_digest: String,
    pub built_at: DateTime<Utc>,
    /// Same order as the rows of `vectors.bin`.
    pub chunks: Vec<Chunk>,
}

/// An immutable (index, chunk mapping) pair.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    index: VectorIndex,
    chunks: HashMap<String, Chunk>,
    model_name: String,
    built_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn empty() -> Self {
        Self {
            index: VectorIndex::default(),
            chunks: HashMap::new(),
            model_name: String::new(),
            built_at: Utc::now(),
        }
    }

    /// Build from chunks and their vectors, in matching order.
    pub fn build(
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
        model_name: impl Into<String>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Corrupt(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let embeddings: Vec<Embedding> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Embedding {
                chunk_id: chunk.id.clone(),
                vector,
            })
            .collect();
        let index = VectorIndex::build(embeddings)?;
        Ok(Self {
            index,
            chunks: chunks.into_iter().map(|c| (c.id.clone(), c)).collect(),
            model_name: model_name.into(),
            built_at: Utc::now(),
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Top-`k` chunks for a query vector, ranked from 1.
    pub fn retrieve(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        let hits = self.index.search(query, k)?;
        hits.into_iter()
            .enumerate()
            .map(|(i, hit)| {
                let chunk = self.chunks.get(&hit.chunk_id).cloned().ok_or_else(|| {
                    IndexError::Corrupt(format!("hit '{}' has no chunk metadata", hit.chunk_id))
                })?;
                Ok(RetrievedChunk {
                    rank: i + 1,
                    score: hit.score,
                    chunk,
                })
            })
            .collect()
    }

    /// Write `vectors.bin` and `chunks.json` into `dir`, creating it if needed.
    ///
    /// Each file replaces its predecessor by rename, manifest last. An
    /// interrupted persist leaves a pair whose digests disagree, which
    /// [`load`](Self::load) rejects.
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(dir).map_err(|source| IndexError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let manifest = IndexManifest {
            version: FORMAT_VERSION,
            model_name: self.model_name.clone(),
            dims: self.index.dims(),
            ids_digest: hex_digest(self.index.ids()),
            built_at: self.built_at,
            chunks: self
                .index
                .ids()
                .iter()
                .filter_map(|id| self.chunks.get(id).cloned())
                .collect(),
        };

        self.index.write_vectors(dir)?;
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&path, &json)?;

        tracing::debug!(dir = %dir.display(), chunks = manifest.chunks.len(), "index persisted");
        Ok(())
    }

    /// Load a snapshot written by [`persist`](Self::persist).
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let manifest = read_manifest(dir)?;
        let ids: Vec<String> = manifest.chunks.iter().map(|c| c.id.clone()).collect();
        let index = VectorIndex::read_vectors(dir, ids)?;

        if !index.is_empty() && index.dims() != manifest.dims {
            return Err(IndexError::Corrupt(format!(
                "manifest says {} dims, {} has {}",
                manifest.dims,
                VECTORS_FILE,
                index.dims()
            )));
        }

        Ok(Self {
            index,
            chunks: manifest
                .chunks
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            model_name: manifest.model_name,
            built_at: manifest.built_at,
        })
    }

    /// Whether both artifacts exist in `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(VECTORS_FILE).is_file() && dir.join(MANIFEST_FILE).is_file()
    }
}

pub fn read_manifest(dir: &Path) -> Result<IndexManifest, IndexError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = std::fs::read(&path).map_err(|source| IndexError::Io { path, source })?;
    let manifest: IndexManifest = serde_json::from_slice(&bytes)?;
    if manifest.version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported manifest version {}",
            manifest.version
        )));
    }
    let ids: Vec<String> = manifest.chunks.iter().map(|c| c.id.clone()).collect();
    if manifest.ids_digest != hex_digest(&ids) {
        return Err(IndexError::Corrupt(format!(
            "{} chunk list does not match its digest",
            MANIFEST_FILE
        )));
    }
    Ok(manifest)
}

fn hex_digest(ids: &[String]) -> String {
    ids_digest(ids).iter().map(|b| format!("{:02x}", b)).collect()
}

/// Handle to the live snapshot, shared between queries and rebuilds.
#[derive(Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<Arc<KnowledgeBase>>>,
}

impl SharedIndex {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(kb))),
        }
    }

    /// Current snapshot. Later swaps do not affect the returned value.
    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the live snapshot, returning the previous one.
    pub fn swap(&self, kb: KnowledgeBase) -> Arc<KnowledgeBase> {
        let next = Arc::new(kb);
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

impl Default for SharedIndex {
    fn default() -> Self {
        Self::new(KnowledgeBase::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::build(
            vec![
                Chunk::new("docker.md", "docker.md", "docker build"),
                Chunk::new("k8s.md", "k8s.md", "kubectl get pods"),
                Chunk::new("git.md", "git.md", "git status"),
            ],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.2, 1.0]],
            "test-model",
        )
        .unwrap()
    }

    #[test]
    fn test_retrieve_resolves_chunks() {
        let kb = kb();
        let hits = kb.retrieve(&[0.0, 1.0, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].chunk.text, "kubectl get pods");
        assert_eq!(hits[1].rank, 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let kb = kb();
        kb.persist(tmp.path()).unwrap();
        assert!(KnowledgeBase::exists(tmp.path()));

        let loaded = KnowledgeBase::load(tmp.path()).unwrap();
        assert_eq!(loaded.model_name(), "test-model");
        assert_eq!(loaded.len(), 3);

        let q = [0.3, 0.5, 0.4];
        let before: Vec<String> = kb.retrieve(&q, 3).unwrap().into_iter().map(|r| r.chunk.id).collect();
        let after: Vec<String> = loaded.retrieve(&q, 3).unwrap().into_iter().map(|r| r.chunk.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_snapshot_persists() {
        let tmp = TempDir::new().unwrap();
        KnowledgeBase::build(Vec::new(), Vec::new(), "m")
            .unwrap()
            .persist(tmp.path())
            .unwrap();
        let loaded = KnowledgeBase::load(tmp.path()).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_vectors_from_another_build_are_rejected() {
        let tmp = TempDir::new().unwrap();
        KnowledgeBase::build(
            vec![
                Chunk::new("docker.md", "docker.md", "docker build"),
                Chunk::new("git.md", "git.md", "git status"),
            ],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            "m",
        )
        .unwrap()
        .persist(tmp.path())
        .unwrap();

        // A rebuild that got as far as vectors.bin but never wrote its manifest.
        let rebuilt = KnowledgeBase::build(
            vec![
                Chunk::new("kubernetes.md", "kubernetes.md", "kubectl get pods"),
                Chunk::new("helm.md", "helm.md", "helm install"),
            ],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
            "m",
        )
        .unwrap();
        rebuilt.index().write_vectors(tmp.path()).unwrap();

        assert!(matches!(
            KnowledgeBase::load(tmp.path()),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_edited_manifest_is_rejected() {
        let tmp = TempDir::new().unwrap();
        kb().persist(tmp.path()).unwrap();

        let path = tmp.path().join(MANIFEST_FILE);
        let mut manifest = read_manifest(tmp.path()).unwrap();
        manifest.chunks.swap(0, 1);
        std::fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        assert!(matches!(
            KnowledgeBase::load(tmp.path()),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_persist_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        kb().persist(tmp.path()).unwrap();
        kb().persist(tmp.path()).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![MANIFEST_FILE.to_string(), VECTORS_FILE.to_string()]);
    }

    #[test]
    fn test_load_missing_dir_is_io_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            KnowledgeBase::load(&tmp.path().join("absent")),
            Err(IndexError::Io { .. })
        ));
    }

    #[test]
    fn test_swap_does_not_disturb_held_snapshot() {
        let shared = SharedIndex::default();
        let before = shared.snapshot();
        assert!(before.is_empty());

        let previous = shared.swap(kb());
        assert!(previous.is_empty());
        assert!(before.is_empty());
        assert_eq!(shared.snapshot().len(), 3);
    }
}
