//! Brute-force nearest-neighbor index over one document's chunk vectors.
//!
//! Built per request and dropped with it; immutable once built, so it can be
//! shared behind an `Arc` by concurrent readers.

use std::cmp::Ordering;

use docqa_core::{Error, Metric, Result};

use crate::similarity::distance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Insertion position of the matched vector.
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn build(vectors: Vec<Vec<f32>>, metric: Metric) -> Result<Self> {
        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(Error::Config(format!("vector {i} has dimension {}, expected {dim}", v.len())));
        }
        Ok(Self { dim, metric, vectors })
    }

    pub fn len(&self) -> usize { self.vectors.len() }
    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }
    pub fn dim(&self) -> usize { self.dim }
    pub fn metric(&self) -> Metric { self.metric }

    /// The `k` nearest vectors by ascending distance; equal distances keep
    /// insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dim {
            return Err(Error::Config(format!(
                "query has dimension {}, index has {}",
                vector.len(),
                self.dim
            )));
        }
        let mut all: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| Neighbor { position, distance: distance(self.metric, vector, v) })
            .collect();
        let by_distance = |a: &Neighbor, b: &Neighbor| -> Ordering {
            a.distance.total_cmp(&b.distance).then(a.position.cmp(&b.position))
        };
        if k < all.len() {
            all.select_nth_unstable_by(k - 1, by_distance);
            all.truncate(k);
        }
        all.sort_by(by_distance);
        Ok(all)
    }
}
