use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Chunk, Metadata};

/// Window size and overlap, both counted in whitespace-delimited tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 100, overlap: 20 }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }

    /// `overlap >= chunk_size` would never advance the window.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than 0".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Splits text into overlapping fixed-size token windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Chunk texts in document order. Empty or whitespace-only input yields no
    /// chunks; input shorter than one window yields exactly one.
    pub fn split(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + self.config.chunk_size).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end >= words.len() {
                break;
            }
            start += self.config.step();
        }
        chunks
    }
}

/// Convenience wrapper validating the parameters on every call.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(Chunker::new(ChunkingConfig::new(chunk_size, overlap))?.split(text))
}

/// A transient document: its text and the ordered chunks cut from it.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub chunks: Vec<Chunk>,
}

impl Document {
    /// Chunk `text`; every chunk inherits `metadata` and gets an empty vector
    /// until [`Document::attach_vectors`] is called.
    pub fn split(source_document_id: &str, text: &str, chunker: &Chunker, metadata: &Metadata) -> Self {
        let chunks = chunker
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, chunk_text)| Chunk {
                id: None,
                text: chunk_text,
                source_document_id: source_document_id.to_string(),
                chunk_index,
                vector: Vec::new(),
                metadata: metadata.clone(),
            })
            .collect();
        Self { text: text.to_string(), chunks }
    }

    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }

    pub fn attach_vectors(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        if vectors.len() != self.chunks.len() {
            return Err(Error::Upstream(format!(
                "expected {} vectors, got {}",
                self.chunks.len(),
                vectors.len()
            )));
        }
        for (chunk, vector) in self.chunks.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }
        Ok(())
    }
}
