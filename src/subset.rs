//! Ephemeral exact-search index over an allowed subset of vectors.
//!
//! Built per query from the access filter's allowed positions: each valid
//! position is reconstructed from the durable index into a small flat
//! buffer, then searched exactly by inner product. This keeps filtered
//! search exact without ever rebuilding the main graph.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::warn;

use crate::{embedding::dot, error::Result, vector_index::VectorIndex};

/// One hit from a subset search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubsetHit {
    /// Row in the subset index.
    pub local: usize,
    /// Global position in the main index.
    pub position: u64,
    /// Inner-product score against the query.
    pub score: f32,
}

/// Flat exact index over a reconstructed subset.
#[derive(Debug)]
pub struct SubsetIndex {
    dimension: usize,
    /// Global position of each row, in ascending order.
    positions: Vec<u64>,
    /// Row-major flat storage, parallel to `positions`.
    vectors: Vec<f32>,
}

impl SubsetIndex {
    /// Reconstruct every allowed position that exists in the index.
    ///
    /// Positions at or past `total_count` are stale catalog entries and are
    /// silently dropped; a reconstruction failure for an in-range position
    /// is logged and skipped. Rows are ordered by ascending global position
    /// so identical inputs always build identical subsets.
    pub fn build(index: &VectorIndex, allowed: &HashSet<u64>) -> Self {
        let total = index.total_count();
        let mut valid: Vec<u64> =
            allowed.iter().copied().filter(|&p| p < total).collect();
        valid.sort_unstable();

        let dimension = index.dimension();
        let mut positions = Vec::with_capacity(valid.len());
        let mut vectors = Vec::with_capacity(valid.len() * dimension);
        for position in valid {
            match index.reconstruct(position) {
                Ok(row) => {
                    positions.push(position);
                    vectors.extend_from_slice(row);
                }
                Err(e) => {
                    warn!(position, error = %e, "skipping unreconstructable vector");
                }
            }
        }

        Self {
            dimension,
            positions,
            vectors,
        }
    }

    /// Exact inner-product search, best first. Ties keep ascending position
    /// order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SubsetHit>> {
        if query.len() != self.dimension {
            return Err(crate::error::Error::InvalidInput(format!(
                "query dimension {} does not match subset dimension {}",
                query.len(),
                self.dimension
            )));
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SubsetHit> = self
            .vectors
            .par_chunks(self.dimension)
            .enumerate()
            .map(|(local, row)| SubsetHit {
                local,
                position: self.positions[local],
                score: dot(query, row),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// The reconstructed vector at a local row.
    pub fn vector(&self, local: usize) -> &[f32] {
        let start = local * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
