//! docqa-core
//!
//! Domain types, the error taxonomy, collaborator traits, the chunker,
//! metadata filters and configuration shared by the other docqa crates.

pub mod chunker;
pub mod config;
pub mod error;
pub mod filter;
pub mod payload;
pub mod source;
pub mod traits;
pub mod types;

pub use chunker::{chunk, Chunker, ChunkingConfig, Document};
pub use error::{Error, Result};
pub use filter::{Condition, Filter, Match, Range};
pub use payload::Payload;
pub use traits::{AnswerGenerator, DocumentSource, Embedder, VectorStore};
pub use types::{Chunk, ChunkId, CollectionInfo, Health, MetaValue, Metadata, Metric, Query, SearchResult};
