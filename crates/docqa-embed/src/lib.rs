//! Embedding backends for docqa.
//!
//! `SentenceEncoder` runs a BERT-family model through candle; `HashEmbedder`
//! is a deterministic stand-in selected with `APP_USE_FAKE_EMBEDDINGS=1` or
//! `embed.use_fake = true`.

use std::sync::Arc;

use docqa_core::config::EmbedSettings;
use docqa_core::{Embedder, Error, Result};

pub mod device;
pub mod encoder;
pub mod hashing;
pub mod pool;
pub mod tokenize;

pub use encoder::{resolve_model_dir, SentenceEncoder};
pub use hashing::HashEmbedder;
pub use pool::masked_mean_l2;

fn fake_requested(settings: &EmbedSettings) -> bool {
    settings.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

/// Build the embedder described by `settings`.
pub fn embedder_from_settings(settings: &EmbedSettings) -> Result<Arc<dyn Embedder>> {
    if fake_requested(settings) {
        tracing::info!(dim = settings.fake_dim, "using HashEmbedder");
        return Ok(Arc::new(HashEmbedder::new(settings.fake_dim)));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    let encoder = SentenceEncoder::load(&model_dir, settings.max_len)
        .map_err(|e| Error::Config(format!("loading model from {}: {e:#}", model_dir.display())))?;
    Ok(Arc::new(encoder))
}

pub fn get_default_embedder() -> Result<Arc<dyn Embedder>> {
    embedder_from_settings(&EmbedSettings::default())
}
