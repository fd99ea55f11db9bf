//! Domain types shared by the chunker, the indexes and the stores.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type Metadata = BTreeMap<String, MetaValue>;

/// A scalar metadata value attached to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering used by range filters. Numbers compare numerically across
    /// int/float, strings lexicographically; other pairs are incomparable.
    pub fn compare(&self, other: &MetaValue) -> Option<Ordering> {
        match (self, other) {
            (MetaValue::Str(a), MetaValue::Str(b)) => Some(a.cmp(b)),
            (MetaValue::Bool(a), MetaValue::Bool(b)) => Some(a.cmp(b)),
            (MetaValue::Int(a), MetaValue::Int(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(x) => write!(f, "{x}"),
            MetaValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<usize> for MetaValue {
    fn from(i: usize) -> Self {
        MetaValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetaValue {
    fn from(x: f64) -> Self {
        MetaValue::Float(x)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// A windowed slice of a source document, the unit of embedding and retrieval.
///
/// - `id`: assigned by the store on first upsert when `None`
/// - `source_document_id`: identity of the parent document
/// - `chunk_index`: position within the parent, left to right
/// - `vector`: embedding; length must equal the collection dimension
/// - `metadata`: caller-supplied scalars, merged into the stored payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Option<ChunkId>,
    pub text: String,
    pub source_document_id: String,
    pub chunk_index: usize,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Distance/similarity function used by an index or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean distance.
    L2,
    #[default]
    Cosine,
    Dot,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        };
        f.write_str(s)
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclid" | "euclidean" => Ok(Metric::L2),
            "cosine" | "cos" => Ok(Metric::Cosine),
            "dot" | "ip" => Ok(Metric::Dot),
            other => Err(Error::Config(format!("unknown metric '{other}'"))),
        }
    }
}

/// A similarity query against a persistent collection.
#[derive(Debug, Clone)]
pub struct Query {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<crate::filter::Filter>,
}

impl Query {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self { vector, top_k, filter: None }
    }

    pub fn with_filter(mut self, filter: crate::filter::Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One ranked hit from a persistent store. `score` is higher-is-better for
/// every metric; `metadata` holds every payload field except `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub version: u64,
    pub count: usize,
}

/// Liveness of a store. `Unreachable` means the backend could not be
/// contacted at all; `Unhealthy` means it answered but is not usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(String),
    Unreachable(String),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}
