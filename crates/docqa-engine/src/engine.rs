use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use docqa_core::config::RetrievalConfig;
use docqa_core::{
    Chunker, ChunkId, ChunkingConfig, Document, Embedder, Error, Filter, Metadata, Metric, Query, Result,
    SearchResult, VectorStore,
};
use docqa_vector::FlatIndex;

/// One ranked chunk for a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextHit {
    pub chunk_index: usize,
    pub text: String,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_document_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreQuery {
    pub text: String,
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<Filter>,
}

/// Check an embedder's output before it reaches an index.
fn check_vectors(vectors: &[Vec<f32>], expected: usize, dim: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::Upstream(format!("embedder returned {} vectors for {expected} inputs", vectors.len())));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::Upstream(format!("embedder returned dimension {}, expected {dim}", bad.len())));
    }
    Ok(())
}

fn embed_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed_batch(texts)?;
    check_vectors(&vectors, texts.len(), embedder.dim())?;
    Ok(vectors)
}

/// Turns a document and its questions into ranked context passages, and
/// feeds or queries a persistent store with the same embedder.
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    store_metric: Metric,
}

impl QueryEngine {
    pub fn new(embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { embedder, config, store_metric: Metric::default() })
    }

    /// Metric used when `ingest` creates a collection.
    pub fn with_store_metric(mut self, metric: Metric) -> Self {
        self.store_metric = metric;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Run `f` on the blocking pool under the request deadline.
    async fn blocking<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.deadline(what, async move {
            tokio::task::spawn_blocking(f)
                .await
                .map_err(|e| Error::Operation(format!("{what} task failed: {e}")))?
        })
        .await
    }

    async fn deadline<T>(&self, what: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(format!("{what} exceeded {}s", limit.as_secs()))),
        }
    }

    async fn embed(&self, what: &'static str, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = self.embedder.clone();
        self.blocking(what, move || embed_checked(embedder.as_ref(), &texts)).await
    }

    /// Best chunk text for every question, `""` when the document has no
    /// chunks.
    pub async fn retrieve_contexts(&self, document_text: &str, questions: &[String]) -> Result<Vec<String>> {
        self.retrieve_contexts_with(document_text, questions, &self.config.chunking).await
    }

    pub async fn retrieve_contexts_with(
        &self,
        document_text: &str,
        questions: &[String],
        chunking: &ChunkingConfig,
    ) -> Result<Vec<String>> {
        let hits = self.run(document_text, questions, chunking, 1).await?;
        Ok(hits
            .into_iter()
            .map(|mut h| if h.is_empty() { String::new() } else { h.swap_remove(0).text })
            .collect())
    }

    /// Up to `top_k` ranked hits per question, in question order.
    pub async fn retrieve(&self, document_text: &str, questions: &[String]) -> Result<Vec<Vec<ContextHit>>> {
        self.run(document_text, questions, &self.config.chunking, self.config.top_k).await
    }

    async fn run(
        &self,
        document_text: &str,
        questions: &[String],
        chunking: &ChunkingConfig,
        top_k: usize,
    ) -> Result<Vec<Vec<ContextHit>>> {
        let chunker = Chunker::new(*chunking)?;
        if questions.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = chunker.split(document_text);
        tracing::debug!(chunks = chunks.len(), questions = questions.len(), "retrieving contexts");
        if chunks.is_empty() {
            return Ok(vec![Vec::new(); questions.len()]);
        }

        let vectors = self.embed("chunk embedding", chunks.clone()).await?;
        let index = Arc::new(FlatIndex::build(vectors, self.config.metric)?);
        let chunks = Arc::new(chunks);

        stream::iter(questions.iter().cloned())
            .map(|question| {
                let embedder = self.embedder.clone();
                let index = index.clone();
                let chunks = chunks.clone();
                self.blocking("question embedding", move || {
                    let vector = embed_checked(embedder.as_ref(), std::slice::from_ref(&question))?
                        .pop()
                        .ok_or_else(|| Error::Upstream("embedder returned no vector".into()))?;
                    let neighbors = index.query(&vector, top_k)?;
                    Ok(neighbors
                        .into_iter()
                        .map(|n| ContextHit { chunk_index: n.position, text: chunks[n.position].clone(), distance: n.distance })
                        .collect::<Vec<_>>())
                })
            })
            .buffered(self.config.concurrency)
            .try_collect()
            .await
    }

    /// Chunk, embed and upsert one document into `collection`, creating the
    /// collection on first use.
    pub async fn ingest<S>(&self, store: &S, collection: &str, request: IngestRequest) -> Result<Vec<ChunkId>>
    where
        S: VectorStore + ?Sized,
    {
        let chunker = Chunker::new(self.config.chunking)?;
        let mut doc = Document::split(&request.source_document_id, &request.text, &chunker, &request.metadata);
        self.deadline("ensure collection", store.ensure_collection(collection, self.embedder.dim(), self.store_metric))
            .await?;
        if doc.chunks.is_empty() {
            tracing::info!(document = %request.source_document_id, "document has no text, nothing ingested");
            return Ok(Vec::new());
        }
        let vectors = self.embed("chunk embedding", doc.texts()).await?;
        doc.attach_vectors(vectors)?;
        let ids = self.deadline("store upsert", store.upsert(collection, &doc.chunks)).await?;
        tracing::info!(document = %request.source_document_id, collection, chunks = ids.len(), "ingested document");
        Ok(ids)
    }

    pub async fn search_store<S>(&self, store: &S, collection: &str, query: StoreQuery) -> Result<Vec<SearchResult>>
    where
        S: VectorStore + ?Sized,
    {
        let vector = self
            .embed("query embedding", vec![query.text])
            .await?
            .pop()
            .ok_or_else(|| Error::Upstream("embedder returned no vector".into()))?;
        let mut q = Query::new(vector, query.top_k);
        q.filter = query.filter;
        self.deadline("store search", store.search(collection, &q)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_output_is_validated() {
        assert!(check_vectors(&[vec![0.0; 3], vec![0.0; 3]], 2, 3).is_ok());
        assert!(matches!(check_vectors(&[vec![0.0; 3]], 2, 3), Err(Error::Upstream(_))));
        assert!(matches!(check_vectors(&[vec![0.0; 2]], 1, 3), Err(Error::Upstream(_))));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let embedder: Arc<dyn Embedder> = Arc::new(docqa_embed::HashEmbedder::new(8));
        let config = RetrievalConfig { concurrency: 0, ..RetrievalConfig::default() };
        assert!(matches!(QueryEngine::new(embedder, config), Err(Error::Config(_))));
    }
}
