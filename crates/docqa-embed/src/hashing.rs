use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use docqa_core::{Embedder, Result};

/// Deterministic feature-hashing embedder for tests and offline development.
///
/// Lowercased alphanumeric tokens are hashed into `dim` signed buckets and the
/// result is L2-normalized, so texts sharing words land close together.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn case_and_punctuation_are_ignored() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed_one("The Deductible?"), e.embed_one("the deductible"));
    }

    #[test]
    fn empty_text_maps_to_zero_vector() {
        let e = HashEmbedder::new(16);
        assert!(e.embed_one("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn identical_texts_have_unit_similarity() {
        let e = HashEmbedder::new(128);
        let a = e.embed_one("claims must be filed within 30 days");
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }
}
