//! Distance and score functions shared by the flat index and the stores.

use docqa_core::{Metric, SearchResult};

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cosine similarity; a zero vector is orthogonal to everything.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let denom = dot(a, a).sqrt() * dot(b, b).sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot(a, b) / denom
}

/// Lower is closer.
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::L2 => squared_l2(a, b),
        Metric::Cosine => 1.0 - cosine(a, b),
        Metric::Dot => -dot(a, b),
    }
}

/// Higher is better.
pub fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::L2 => -squared_l2(a, b),
        Metric::Cosine => cosine(a, b),
        Metric::Dot => dot(a, b),
    }
}

/// Sort best first, ties by ascending chunk id, and keep `top_k`.
pub fn rank(results: &mut Vec<SearchResult>, top_k: usize) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    results.truncate(top_k);
}
