//! Embedding job: stamps vectors onto unembedded concept nodes
//!
//! Uses a trait-based backend (`EmbeddingProvider`) so production code can
//! call Gemini's `batchEmbedContents` (or a local fastembed model behind the
//! `embeddings` feature) while tests use deterministic mock embedders.

use crate::graph::ConceptNode;
use crate::storage::{GraphStore, NodeFields, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error type for embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("embedding returned no results")]
    EmptyResult,
    #[error("embedding model error: {0}")]
    Model(String),
}

/// Trait for embedding text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. Implementations return one vector per text,
    /// in order; the job checks this rather than trusting it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Counts from one embedding pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingReport {
    pub embedded: usize,
    pub skipped: usize,
}

pub struct EmbeddingJob {
    store: Arc<dyn GraphStore>,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
}

impl EmbeddingJob {
    pub fn new(
        store: Arc<dyn GraphStore>,
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Embed every concept node that has no vector yet.
    ///
    /// Provider failures only exclude the affected batch; store errors propagate.
    pub async fn run(&self) -> StorageResult<EmbeddingReport> {
        let pending = self.store.list_unembedded_nodes()?;
        let mut report = EmbeddingReport::default();
        info!(pending = pending.len(), batch_size = self.batch_size, "embedding nodes");

        for (index, batch) in pending.chunks(self.batch_size).enumerate() {
            let vectors = match self.embed(batch).await {
                Ok(vectors) => vectors,
                Err(error) => {
                    warn!(batch = index, size = batch.len(), %error, "embedding batch failed, skipping");
                    report.skipped += batch.len();
                    continue;
                }
            };

            if vectors.len() != batch.len() {
                warn!(
                    batch = index,
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding count mismatch, skipping batch"
                );
                report.skipped += batch.len();
                continue;
            }

            for (node, vector) in batch.iter().zip(vectors) {
                if vector.is_empty() {
                    warn!(node = %node.id, "empty embedding, skipping node");
                    report.skipped += 1;
                    continue;
                }
                if self
                    .store
                    .set_node_fields(&node.id, &NodeFields::new().with_embedding(vector))?
                {
                    report.embedded += 1;
                } else {
                    // Deleted while the batch was in flight
                    report.skipped += 1;
                }
            }
            debug!(batch = index, embedded = report.embedded, "batch stored");
        }

        info!(embedded = report.embedded, skipped = report.skipped, "embedding complete");
        Ok(report)
    }

    async fn embed(&self, batch: &[ConceptNode]) -> Result<Vec<Vec<f32>>, String> {
        let texts: Vec<String> = batch.iter().map(ConceptNode::embedding_text).collect();
        match tokio::time::timeout(self.timeout, self.provider.embed_batch(&texts)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }
}

/// Mock embedder for tests: fixed vectors per text, a constant otherwise.
pub struct MockEmbeddingProvider {
    vectors: HashMap<String, Vec<f32>>,
    default: Option<Vec<f32>>,
    fail_batches: Mutex<usize>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            default: None,
            fail_batches: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` for exactly `text`
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    /// Return `vector` for any text without a fixed vector
    pub fn with_default(mut self, vector: Vec<f32>) -> Self {
        self.default = Some(vector);
        self
    }

    /// Fail the next `n` batches
    pub fn failing_first(self, n: usize) -> Self {
        if let Ok(mut remaining) = self.fail_batches.lock() {
            *remaining = n;
        }
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(texts.to_vec());
        }
        if let Ok(mut remaining) = self.fail_batches.lock() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EmbeddingError::Request("mock failure".to_string()));
            }
        }
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .or(self.default.as_ref())
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FastEmbedProvider: local ONNX embedder behind the `embeddings` feature
// ---------------------------------------------------------------------------

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{EmbeddingError, EmbeddingProvider};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    /// `TextEmbedding::embed` takes `&mut self`, hence the mutex.
    pub struct FastEmbedProvider {
        model: Arc<Mutex<TextEmbedding>>,
    }

    impl FastEmbedProvider {
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding =
                TextEmbedding::try_new(options).map_err(|e| EmbeddingError::Model(e.to_string()))?;
            Ok(Self {
                model: Arc::new(Mutex::new(embedding)),
            })
        }

        /// nomic-embed-text-v1.5
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.model.clone();
            let texts = texts.to_vec();
            // Inference is CPU-bound
            let embeddings = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|e| EmbeddingError::Model(e.to_string()))?;
                model
                    .embed(texts, None)
                    .map_err(|e| EmbeddingError::Model(e.to_string()))
            })
            .await
            .map_err(|e| EmbeddingError::Model(e.to_string()))??;

            if embeddings.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(embeddings)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedProvider;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, NodeKind};
    use crate::storage::{OpenStore, SqliteStore};

    fn store_with(nodes: &[(&str, &str, &str)]) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for (id, name, description) in nodes {
            store
                .save_node(&ConceptNode::new(NodeKind::Stock, *name, *description).with_id(*id))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn embeds_name_and_description_text() {
        let store = store_with(&[("a", "Energy Level", "How much energy"), ("b", "Trust", "")]);
        let provider = Arc::new(
            MockEmbeddingProvider::new()
                .with_vector("Energy Level: How much energy", vec![1.0, 0.0])
                .with_vector("Trust", vec![0.0, 1.0]),
        );
        let job = EmbeddingJob::new(store.clone(), provider.clone(), 10, Duration::from_secs(5));

        let report = job.run().await.unwrap();

        assert_eq!(report, EmbeddingReport { embedded: 2, skipped: 0 });
        let a = store.get_node_by_id(&NodeId::from("a")).unwrap().unwrap();
        assert_eq!(a.embedding, Some(vec![1.0, 0.0]));
        assert!(store.list_unembedded_nodes().unwrap().is_empty());
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_is_skipped_and_later_batches_continue() {
        let store = store_with(&[("a", "A", ""), ("b", "B", ""), ("c", "C", "")]);
        let provider = Arc::new(
            MockEmbeddingProvider::new()
                .with_default(vec![0.5, 0.5])
                .failing_first(1),
        );
        let job = EmbeddingJob::new(store.clone(), provider.clone(), 2, Duration::from_secs(5));

        let report = job.run().await.unwrap();

        assert_eq!(report, EmbeddingReport { embedded: 1, skipped: 2 });
        assert_eq!(provider.calls(), vec![vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]);
        let remaining: Vec<_> = store
            .list_unembedded_nodes()
            .unwrap()
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(remaining, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_vector_leaves_node_unembedded() {
        let store = store_with(&[("a", "A", ""), ("b", "B", "")]);
        let provider = Arc::new(MockEmbeddingProvider::new().with_vector("A", vec![1.0]));
        let job = EmbeddingJob::new(store.clone(), provider, 10, Duration::from_secs(5));

        let report = job.run().await.unwrap();

        assert_eq!(report, EmbeddingReport { embedded: 1, skipped: 1 });
        assert!(!store.get_node_by_id(&NodeId::from("b")).unwrap().unwrap().is_embedded());
    }

    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]])
        }
    }

    #[tokio::test]
    async fn count_mismatch_skips_whole_batch() {
        let store = store_with(&[("a", "A", ""), ("b", "B", "")]);
        let job = EmbeddingJob::new(store.clone(), Arc::new(ShortProvider), 10, Duration::from_secs(5));

        let report = job.run().await.unwrap();

        assert_eq!(report, EmbeddingReport { embedded: 0, skipped: 2 });
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn timed_out_batch_is_skipped() {
        let store = store_with(&[("a", "A", "")]);
        let job = EmbeddingJob::new(store.clone(), Arc::new(SlowProvider), 10, Duration::from_millis(20));

        let report = job.run().await.unwrap();

        assert_eq!(report, EmbeddingReport { embedded: 0, skipped: 1 });
    }
}
