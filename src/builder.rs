//! Index build pipeline.
//!
//! Loader → embedding provider → vector index → `vectors.bin` + `chunks.json`.
//! Every build starts from scratch and produces a complete new snapshot; the
//! previous files are only overwritten once all embeddings succeeded.

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::loader::DocumentLoader;
use crate::models::Chunk;
use crate::progress::{BuildProgressEvent, BuildProgressReporter};
use crate::store::{read_manifest, KnowledgeBase};

/// Summary of a finished build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub dims: usize,
    /// Chunks that are new or whose text changed since the last build.
    pub changed: usize,
    /// Chunks present in the last build but gone now.
    pub removed: usize,
    pub model: String,
    pub elapsed: Duration,
}

/// Build a fresh snapshot from `config.docs` and persist it to `config.index.dir`.
pub async fn build_index(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    progress: &dyn BuildProgressReporter,
) -> Result<(KnowledgeBase, BuildReport)> {
    let started = Instant::now();
    let root = config.docs.root.display().to_string();

    progress.report(BuildProgressEvent::Loading { root: root.clone() });
    let loader = DocumentLoader::from_config(&config.docs, &config.chunking)?;
    let chunks = loader
        .load_all()
        .with_context(|| format!("Failed to load documents from {}", root))?;

    let documents = chunks
        .iter()
        .map(|c| c.source_path.as_str())
        .collect::<HashSet<_>>()
        .len();

    if chunks.is_empty() {
        tracing::warn!(root = %root, "no documents found");
    } else {
        tracing::info!(documents, chunks = chunks.len(), "loaded documents");
    }

    let (changed, removed) = diff_against_previous(&config.index.dir, &chunks);

    let vectors = embed_chunks(config, provider, &chunks, progress).await?;
    let kb = KnowledgeBase::build(chunks, vectors, provider.model_name())?;

    progress.report(BuildProgressEvent::Persisting {
        dir: config.index.dir.display().to_string(),
    });
    kb.persist(&config.index.dir)
        .with_context(|| format!("Failed to write index to {}", config.index.dir.display()))?;

    let report = BuildReport {
        documents,
        chunks: kb.len(),
        dims: kb.index().dims(),
        changed,
        removed,
        model: provider.model_name().to_string(),
        elapsed: started.elapsed(),
    };
    tracing::info!(
        chunks = report.chunks,
        dims = report.dims,
        changed = report.changed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "index built"
    );
    Ok((kb, report))
}

async fn embed_chunks(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    progress: &dyn BuildProgressReporter,
) -> Result<Vec<Vec<f32>>> {
    let total = chunks.len() as u64;
    let timeout = Duration::from_secs(config.embedding.timeout_secs);
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = tokio::time::timeout(timeout, provider.embed_batch(&texts))
            .await
            .map_err(|_| anyhow::anyhow!("embedding batch timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("Failed to embed batch starting at '{}'", batch[0].id))?;

        if embedded.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            );
        }
        vectors.extend(embedded);
        progress.report(BuildProgressEvent::Embedding {
            n: vectors.len() as u64,
            total,
        });
    }

    Ok(vectors)
}

/// Compare chunk hashes with the last persisted manifest, if any.
fn diff_against_previous(dir: &Path, chunks: &[Chunk]) -> (usize, usize) {
    let previous: HashMap<String, String> = match read_manifest(dir) {
        Ok(manifest) => manifest.chunks.into_iter().map(|c| (c.id, c.hash)).collect(),
        Err(_) => return (chunks.len(), 0),
    };

    let changed = chunks
        .iter()
        .filter(|c| previous.get(&c.id) != Some(&c.hash))
        .count();
    let current: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    let removed = previous
        .keys()
        .filter(|id| !current.contains(id.as_str()))
        .count();
    (changed, removed)
}

/// Load the persisted snapshot, or an empty one if nothing was built yet.
pub fn load_or_empty(dir: &Path) -> Result<KnowledgeBase> {
    if !KnowledgeBase::exists(dir) {
        tracing::warn!(dir = %dir.display(), "no index found; serving an empty index");
        return Ok(KnowledgeBase::empty());
    }
    let kb = KnowledgeBase::load(dir)
        .with_context(|| format!("Failed to load index from {}", dir.display()))?;
    tracing::info!(chunks = kb.len(), model = kb.model_name(), "index loaded");
    Ok(kb)
}
