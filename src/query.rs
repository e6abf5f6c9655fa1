//! Query service.
//!
//! Answers one question at a time through a fixed sequence of stages:
//!
//! ```text
//! Idle ──▶ Embedding ──▶ Retrieving ──▶ Completing ──▶ Idle
//! ```
//!
//! Each external call runs once, under its own timeout. Failures carry the
//! stage they happened in; a completion failure also carries the retrieved
//! chunks so the caller can fall back to a context-only answer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, ProviderError, QueryError};
use crate::models::{QueryResult, RetrievedChunk};
use crate::store::{KnowledgeBase, SharedIndex};

pub const EMPTY_INDEX_ANSWER: &str = "No documents are indexed yet. Run the build command first.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStage {
    Idle,
    Embedding,
    Retrieving,
    Completing,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Idle => "idle",
            QueryStage::Embedding => "embedding",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Completing => "completing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub embed_timeout: Duration,
    pub completion_timeout: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 4,
            max_context_chars: 6000,
            embed_timeout: Duration::from_secs(30),
            completion_timeout: Duration::from_secs(30),
        }
    }
}

impl QueryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_context_chars: config.retrieval.max_context_chars,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            completion_timeout: Duration::from_secs(config.completion.timeout_secs),
        }
    }
}

pub struct QueryService {
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    index: SharedIndex,
    options: QueryOptions,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        index: SharedIndex,
        options: QueryOptions,
    ) -> Self {
        Self {
            embedder,
            completer,
            index,
            options,
        }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// The live snapshot handle. Rebuilds swap through this.
    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Atomically replace the served index; in-flight queries keep theirs.
    pub fn replace_index(&self, kb: KnowledgeBase) {
        let previous = self.index.swap(kb);
        tracing::info!(
            previous_chunks = previous.len(),
            chunks = self.index.snapshot().len(),
            "index swapped"
        );
    }

    pub async fn query(&self, text: &str) -> Result<QueryResult, QueryError> {
        self.query_with_k(text, self.options.top_k).await
    }

    /// Like [`query`](Self::query) with an explicit `k`.
    pub async fn query_with_k(&self, text: &str, k: usize) -> Result<QueryResult, QueryError> {
        let question = text.trim();
        if question.is_empty() {
            return Err(QueryError::InvalidQuery);
        }

        // One snapshot for the whole query, even if a rebuild swaps mid-way.
        let kb = self.index.snapshot();
        if kb.is_empty() {
            tracing::info!("query against empty index");
            return Ok(QueryResult {
                query: question.to_string(),
                retrieved: Vec::new(),
                answer: EMPTY_INDEX_ANSWER.to_string(),
            });
        }

        enter(QueryStage::Embedding);
        let vector = with_timeout(self.options.embed_timeout, self.embedder.embed(question))
            .await
            .map_err(|source| QueryError::Embedding {
                stage: QueryStage::Embedding,
                source,
            })?;

        enter(QueryStage::Retrieving);
        let retrieved = match kb.retrieve(&vector, k) {
            Ok(retrieved) => retrieved,
            Err(IndexError::EmptyIndex) => Vec::new(),
            Err(source) => {
                return Err(QueryError::Index {
                    stage: QueryStage::Retrieving,
                    source,
                })
            }
        };
        tracing::debug!(hits = retrieved.len(), k, "retrieved chunks");

        enter(QueryStage::Completing);
        let context = build_context(&retrieved, self.options.max_context_chars);
        let answer = with_timeout(
            self.options.completion_timeout,
            self.completer.complete(question, &context),
        )
        .await;

        enter(QueryStage::Idle);
        match answer {
            Ok(answer) => Ok(QueryResult {
                query: question.to_string(),
                retrieved,
                answer,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "completion failed");
                Err(QueryError::Completion {
                    message: e.to_string(),
                    retrieved,
                })
            }
        }
    }
}

fn enter(stage: QueryStage) {
    tracing::debug!(%stage, "query stage");
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit.as_secs())),
    }
}

/// Concatenate chunks in rank order as `[source]\ntext` blocks, cut to
/// `max_chars` characters.
pub fn build_context(retrieved: &[RetrievedChunk], max_chars: usize) -> String {
    let joined = retrieved
        .iter()
        .map(|r| format!("[{}]\n{}\n", r.chunk.source_path, r.chunk.text))
        .collect::<Vec<_>>()
        .join("\n");

    match joined.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => joined[..byte_idx].to_string(),
        None => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingCompletion {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CompletionProvider for CountingCompletion {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn complete(&self, question: &str, context: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(format!("{} | {}", question, context.len()))
        }
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::build(
            vec![
                Chunk::new("a.md", "a.md", "alpha"),
                Chunk::new("b.md", "b.md", "beta"),
            ],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            "fixed",
        )
        .unwrap()
    }

    fn service(
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<CountingCompletion>,
        kb: KnowledgeBase,
    ) -> QueryService {
        QueryService::new(
            embedder,
            completer,
            SharedIndex::new(kb),
            QueryOptions {
                embed_timeout: Duration::from_millis(50),
                ..QueryOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_rejects_blank_queries() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(Arc::new(FixedEmbedder(vec![1.0, 0.0])), completer, kb());
        assert!(matches!(svc.query("").await, Err(QueryError::InvalidQuery)));
        assert!(matches!(svc.query(" \t\n ").await, Err(QueryError::InvalidQuery)));
    }

    #[tokio::test]
    async fn test_empty_index_skips_completion() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            completer.clone(),
            KnowledgeBase::empty(),
        );
        let result = svc.query("anything").await.unwrap();
        assert!(result.retrieved.is_empty());
        assert_eq!(result.answer, EMPTY_INDEX_ANSWER);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_happy_path_ranks_and_completes() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(Arc::new(FixedEmbedder(vec![0.1, 1.0])), completer.clone(), kb());
        let result = svc.query_with_k("  which one?  ", 1).await.unwrap();
        assert_eq!(result.query, "which one?");
        assert_eq!(result.retrieved.len(), 1);
        assert_eq!(result.retrieved[0].chunk.id, "b.md");
        assert!(result.answer.starts_with("which one?"));
        assert_eq!(completer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_failure_keeps_retrieved() {
        let completer = Arc::new(CountingCompletion {
            fail: true,
            ..CountingCompletion::default()
        });
        let svc = service(Arc::new(FixedEmbedder(vec![1.0, 0.0])), completer, kb());
        match svc.query("alpha?").await {
            Err(QueryError::Completion { message, retrieved }) => {
                assert!(message.contains("503"));
                assert_eq!(retrieved.len(), 2);
                assert_eq!(retrieved[0].chunk.id, "a.md");
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.answer)),
        }
    }

    #[tokio::test]
    async fn test_embedding_timeout_is_embedding_error() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(Arc::new(SlowEmbedder), completer.clone(), kb());
        let err = svc.query("alpha?").await.unwrap_err();
        assert_eq!(err.stage(), QueryStage::Embedding);
        assert!(matches!(
            err,
            QueryError::Embedding {
                source: ProviderError::Timeout(_),
                ..
            }
        ));
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    struct SlowCompletion;

    #[async_trait]
    impl CompletionProvider for SlowCompletion {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _question: &str, _context: &str) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_completion_timeout_keeps_retrieved() {
        let svc = QueryService::new(
            Arc::new(FixedEmbedder(vec![0.0, 1.0])),
            Arc::new(SlowCompletion),
            SharedIndex::new(kb()),
            QueryOptions {
                completion_timeout: Duration::from_millis(50),
                ..QueryOptions::default()
            },
        );
        let err = svc.query("beta?").await.unwrap_err();
        assert_eq!(err.stage(), QueryStage::Completing);
        match err {
            QueryError::Completion { message, retrieved } => {
                assert!(message.contains("timed out"));
                assert_eq!(retrieved.len(), 2);
                assert_eq!(retrieved[0].chunk.id, "b.md");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_finite_query_vector_is_index_error() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(Arc::new(FixedEmbedder(vec![f32::NAN, 1.0])), completer.clone(), kb());
        let err = svc.query("alpha?").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Index {
                source: IndexError::NonFinite { .. },
                ..
            }
        ));
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_index_error() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])), completer, kb());
        let err = svc.query("alpha?").await.unwrap_err();
        assert_eq!(err.stage(), QueryStage::Retrieving);
    }

    #[tokio::test]
    async fn test_replace_index_is_seen_by_next_query() {
        let completer = Arc::new(CountingCompletion::default());
        let svc = service(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            completer,
            KnowledgeBase::empty(),
        );
        assert!(svc.query("alpha?").await.unwrap().retrieved.is_empty());
        svc.replace_index(kb());
        assert_eq!(svc.query("alpha?").await.unwrap().retrieved.len(), 2);
    }

    #[test]
    fn test_context_in_rank_order_and_truncated() {
        let retrieved = vec![
            RetrievedChunk {
                rank: 1,
                score: 0.9,
                chunk: Chunk::new("k8s.md", "k8s.md", "kubectl get pods"),
            },
            RetrievedChunk {
                rank: 2,
                score: 0.5,
                chunk: Chunk::new("git.md", "git.md", "git status"),
            },
        ];
        let full = build_context(&retrieved, 10_000);
        assert_eq!(full, "[k8s.md]\nkubectl get pods\n\n[git.md]\ngit status\n");

        let cut = build_context(&retrieved, 8);
        assert_eq!(cut, "[k8s.md]");
    }

    #[test]
    fn test_context_truncates_on_char_boundary() {
        let retrieved = vec![RetrievedChunk {
            rank: 1,
            score: 1.0,
            chunk: Chunk::new("é.md", "é.md", "ééé"),
        }];
        assert_eq!(build_context(&retrieved, 3), "[é.");
    }
}
