//! Vector similarity and the flat index.
//!
//! The index stores vectors in insertion order, so the vector ordinal is
//! also the chunk ordinal. Storage is segmented: cloning the index for the
//! next snapshot shares every existing segment, and an append only touches
//! the newest one. Search is an exhaustive scan.

use crate::segment::Segmented;
use ferrule_core::error::MemoryError;
use ferrule_core::memory::Metric;
use std::cmp::Ordering;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Euclidean distance. Infinite for mismatched lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

/// Similarity under `metric`; higher is always closer.
pub fn similarity(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => cosine_similarity(a, b),
        Metric::L2 => 1.0 / (1.0 + l2_distance(a, b)),
    }
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    data: Segmented<f32>,
}

impl FlatIndex {
    pub fn new(metric: Metric, dimension: usize) -> Self {
        Self {
            metric,
            dimension,
            data: Segmented::new(),
        }
    }

    /// Rebuild from a flat buffer; its length must be a multiple of `dimension`.
    pub fn from_raw(metric: Metric, dimension: usize, data: Vec<f32>) -> Result<Self, MemoryError> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(MemoryError::Corruption(format!(
                "{} values do not divide into vectors of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self {
            metric,
            dimension,
            data: Segmented::from_vec(data),
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Every value from vector `from` onwards, in ordinal order.
    pub fn values_from(&self, from: usize) -> impl Iterator<Item = f32> + '_ {
        self.data.tail(from * self.dimension).copied()
    }

    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.data.slice(start, self.dimension)
    }

    pub fn push(&mut self, vector: &[f32]) -> Result<usize, MemoryError> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(self.len() - 1)
    }

    /// Keep only the first `count` vectors.
    pub fn truncate(&mut self, count: usize) {
        self.data.truncate(count * self.dimension);
    }

    /// Top `top_k` (ordinal, score) pairs, best first, ties by lower ordinal.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>, MemoryError> {
        if query.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .segments()
            .flat_map(|segment| segment.chunks_exact(self.dimension))
            .enumerate()
            .map(|(ordinal, v)| (ordinal, similarity(self.metric, v, query)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}
