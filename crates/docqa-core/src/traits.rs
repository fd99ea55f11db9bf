use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, ChunkId, CollectionInfo, Health, Metric, Query, SearchResult};

/// Maps texts to fixed-dimension vectors, one per input and in input order.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A durable, filterable vector collection store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create `name` if absent. An existing collection with another dimension
    /// or metric is a configuration error.
    async fn ensure_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()>;

    /// Write a batch atomically and return the id of every chunk, assigning
    /// fresh ids where missing. Same id replaces the stored chunk.
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<Vec<ChunkId>>;

    /// Top `query.top_k` chunks satisfying `query.filter`, best first.
    async fn search(&self, collection: &str, query: &Query) -> Result<Vec<SearchResult>>;

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Never fails; unreachable backends are reported as such.
    async fn health(&self) -> Health;

    async fn health_check(&self) -> bool {
        self.health().await.is_healthy()
    }
}

/// Produces an answer for a question from its retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate_answer(&self, context: &str, question: &str) -> Result<String>;
}

/// Fetches a document and returns its plain text.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<String>;
}
