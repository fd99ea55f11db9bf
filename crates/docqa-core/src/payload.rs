//! Stored payload of a chunk and the rules for merging caller metadata into it.
//!
//! Field names are stable so existing collections stay readable:
//! `text`, `filename`, `chunk_index`, `uploaded_at`, `source_document_id`,
//! plus free-form caller metadata.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Chunk, MetaValue, Metadata};

pub const TEXT: &str = "text";
pub const ID: &str = "id";
pub const FILENAME: &str = "filename";
pub const CHUNK_INDEX: &str = "chunk_index";
pub const UPLOADED_AT: &str = "uploaded_at";
pub const SOURCE_DOCUMENT_ID: &str = "source_document_id";

pub const UNKNOWN_FILENAME: &str = "unknown";

/// Keys owned by the chunk itself; caller metadata cannot override them.
const CHUNK_OWNED: [&str; 4] = [TEXT, ID, CHUNK_INDEX, SOURCE_DOCUMENT_ID];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub text: String,
    pub source_document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub uploaded_at: String,
    pub metadata: Metadata,
}

impl Payload {
    /// Build the payload stored for `chunk`.
    ///
    /// Precedence: `text`, `id`, `chunk_index` and `source_document_id` always
    /// come from the chunk. `filename` and `uploaded_at` come from caller
    /// metadata when present, else `"unknown"` and `now`. Remaining caller
    /// keys are kept verbatim in `metadata`.
    pub fn merge(chunk: &Chunk, now: DateTime<Utc>) -> Self {
        let mut metadata = chunk.metadata.clone();
        for key in CHUNK_OWNED {
            if metadata.remove(key).is_some() {
                tracing::debug!(key, "dropping reserved key from caller metadata");
            }
        }
        let filename = metadata
            .remove(FILENAME)
            .map(|v| v.to_string())
            .unwrap_or_else(|| UNKNOWN_FILENAME.to_string());
        let uploaded_at = metadata
            .remove(UPLOADED_AT)
            .map(|v| v.to_string())
            .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true));
        Self {
            text: chunk.text.clone(),
            source_document_id: chunk.source_document_id.clone(),
            filename,
            chunk_index: chunk.chunk_index,
            uploaded_at,
            metadata,
        }
    }

    /// Every filterable field: the reserved scalars plus caller metadata.
    pub fn fields(&self) -> Metadata {
        let mut out = self.metadata.clone();
        out.insert(FILENAME.to_string(), MetaValue::Str(self.filename.clone()));
        out.insert(CHUNK_INDEX.to_string(), MetaValue::from(self.chunk_index));
        out.insert(UPLOADED_AT.to_string(), MetaValue::Str(self.uploaded_at.clone()));
        out.insert(SOURCE_DOCUMENT_ID.to_string(), MetaValue::Str(self.source_document_id.clone()));
        out
    }
}
