//! docqa-engine
//!
//! Per-request retrieval over an ephemeral index, store ingestion and
//! search, and the answer pipeline built on top of them.

pub mod engine;
pub mod pipeline;

pub use engine::{ContextHit, IngestRequest, QueryEngine, StoreQuery};
pub use pipeline::{answer_from_source, answer_questions, Answer};
