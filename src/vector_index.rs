//! Durable, append-only approximate-nearest-neighbor index.
//!
//! Vectors live in two places: a flat row-major `f32` buffer (the durable
//! source of truth, and the backend for exact reconstruction) and an HNSW
//! graph used for approximate inner-product search. The graph is a derived
//! structure: snapshots persist only the flat buffer, and the graph is
//! rebuilt from it at load time.
//!
//! Binary snapshot format:
//! - 4 bytes: magic `LVEC`
//! - 4 bytes: format version (u32 LE)
//! - 4 bytes: dimension (u32 LE)
//! - 4 bytes: graph degree (u32 LE)
//! - 4 bytes: search width (u32 LE)
//! - 4 bytes: construction width (u32 LE)
//! - 8 bytes: vector count (u64 LE)
//! - count * dimension * 4 bytes: f32 values in row-major order

use std::path::Path;

use anndists::dist::Distance;
use hnsw_rs::prelude::*;

use crate::error::{Error, Result};

/// Inner-product distance `1 - dot`, clamped at zero.
///
/// Unit vectors can dot to slightly above 1.0 through f32 rounding (two
/// identical vectors routinely do), which would make the raw distance
/// negative; the clamp keeps duplicate inserts valid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClampedDot;

impl Distance<f32> for ClampedDot {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        (1.0 - crate::embedding::dot(va, vb)).max(0.0)
    }
}

const MAGIC: &[u8; 4] = b"LVEC";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 32;

/// Number of graph layers. hnsw_rs caps this at 16.
const NB_LAYERS: usize = 16;

/// Initial graph capacity; the graph is rebuilt with doubled capacity
/// when appends outgrow it.
const MIN_CAPACITY: usize = 1024;

/// HNSW construction and search parameters.
///
/// Higher values trade memory and build time for recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    /// Graph connectivity per node (HNSW `M`).
    pub graph_degree: usize,
    /// Search breadth (`efSearch`).
    pub search_width: usize,
    /// Construction breadth (`efConstruction`).
    pub construction_width: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            graph_degree: 32,
            search_width: 100,
            construction_width: 80,
        }
    }
}

/// Append-only vector index under inner-product similarity.
///
/// The i-th appended vector receives global position `ntotal_before + i`;
/// positions are immutable and never reused. All stored vectors must be
/// unit-norm so that inner product equals cosine similarity.
pub struct VectorIndex {
    dimension: usize,
    params: IndexParams,
    capacity: usize,
    graph: Hnsw<'static, f32, ClampedDot>,
    /// Row-major flat storage; `vectors.len() == ntotal * dimension`.
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index.
    pub fn new(dimension: usize, params: IndexParams) -> Result<Self> {
        Self::with_capacity(dimension, params, MIN_CAPACITY)
    }

    fn with_capacity(
        dimension: usize,
        params: IndexParams,
        capacity: usize,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidInput(
                "vector dimension must be non-zero".into(),
            ));
        }
        let capacity = capacity.max(MIN_CAPACITY);
        Ok(Self {
            dimension,
            params,
            capacity,
            graph: build_graph(params, capacity),
            vectors: Vec::new(),
        })
    }

    /// Deserialize a persisted snapshot and rebuild the search graph.
    ///
    /// A file that exists but cannot be parsed is [`Error::CorruptIndex`];
    /// callers must treat that as fatal rather than starting fresh.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let corrupt = |reason: &str| Error::CorruptIndex {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_SIZE {
            return Err(corrupt("file shorter than header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(corrupt("bad magic"));
        }

        let read_u32 = |offset: usize| {
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
        };
        let version = read_u32(4);
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {version}")));
        }

        let dimension = read_u32(8) as usize;
        let params = IndexParams {
            graph_degree: read_u32(12) as usize,
            search_width: read_u32(16) as usize,
            construction_width: read_u32(20) as usize,
        };
        let count = u64::from_le_bytes(bytes[24..32].try_into().unwrap());

        if dimension == 0 {
            return Err(corrupt("zero dimension"));
        }
        // Header fields are untrusted; the expected length must not wrap.
        let expected = count
            .checked_mul(dimension as u64)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE as u64))
            .ok_or_else(|| corrupt("vector count overflows"))?;
        if bytes.len() as u64 != expected {
            return Err(corrupt(&format!(
                "payload length mismatch: have {} bytes, expected {expected}",
                bytes.len()
            )));
        }
        let count = count as usize;

        let mut vectors = vec![0.0f32; count * dimension];
        bytemuck::cast_slice_mut::<f32, u8>(&mut vectors)
            .copy_from_slice(&bytes[HEADER_SIZE..]);

        let mut index =
            Self::with_capacity(dimension, params, count.saturating_mul(2))?;
        index.vectors = vectors;
        index.rebuild_graph();
        Ok(index)
    }

    /// Atomically write the full snapshot (write-to-temp-then-rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        let count = self.total_count();
        let mut bytes =
            Vec::with_capacity(HEADER_SIZE + self.vectors.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.params.graph_degree as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.params.search_width as u32).to_le_bytes());
        bytes.extend_from_slice(
            &(self.params.construction_width as u32).to_le_bytes(),
        );
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(bytemuck::cast_slice(&self.vectors));

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append vectors in order; the i-th receives position `ntotal + i`.
    ///
    /// Every vector is validated before any mutation happens, so a bad
    /// dimension leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for v in vectors {
            if v.len() != self.dimension {
                return Err(Error::InvalidInput(format!(
                    "vector dimension {} does not match index dimension {}",
                    v.len(),
                    self.dimension
                )));
            }
        }

        self.ensure_capacity(vectors.len());

        for v in vectors {
            let position = self.total_count() as usize;
            self.graph.insert((v, position));
            self.vectors.extend_from_slice(v);
        }
        Ok(())
    }

    /// Approximate nearest-neighbor search by inner-product score.
    ///
    /// Returns `(global_position, score)` pairs, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        let total = self.total_count() as usize;
        if total == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let ef = self.params.search_width.max(k);
        let neighbours = self.graph.search(query, k.min(total), ef);

        Ok(neighbours
            .into_iter()
            .filter(|n| n.d_id < total)
            .map(|n| (n.d_id as u64, 1.0 - n.distance))
            .collect())
    }

    /// Exact raw vector stored at a global position.
    pub fn reconstruct(&self, position: u64) -> Result<&[f32]> {
        let total = self.total_count();
        if position >= total {
            return Err(Error::PositionOutOfRange { position, total });
        }
        let start = position as usize * self.dimension;
        Ok(&self.vectors[start..start + self.dimension])
    }

    /// Current vector count.
    pub fn total_count(&self) -> u64 {
        (self.vectors.len() / self.dimension) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> IndexParams {
        self.params
    }

    /// Discard all vectors, returning to the empty state of `new`.
    pub fn reset(&mut self) {
        self.vectors.clear();
        self.capacity = MIN_CAPACITY;
        self.graph = build_graph(self.params, self.capacity);
    }

    fn ensure_capacity(&mut self, additional: usize) {
        let needed = self.total_count() as usize + additional;
        if needed <= self.capacity {
            return;
        }
        while self.capacity < needed {
            self.capacity *= 2;
        }
        self.rebuild_graph();
    }

    fn rebuild_graph(&mut self) {
        let graph = build_graph(self.params, self.capacity);
        for position in 0..self.total_count() as usize {
            let start = position * self.dimension;
            let row = self.vectors[start..start + self.dimension].to_vec();
            graph.insert((&row, position));
        }
        self.graph = graph;
    }
}

fn build_graph(
    params: IndexParams,
    capacity: usize,
) -> Hnsw<'static, f32, ClampedDot> {
    Hnsw::<f32, ClampedDot>::new(
        params.graph_degree,
        capacity,
        NB_LAYERS,
        params.construction_width,
        ClampedDot,
    )
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .field("params", &self.params)
            .field("total_count", &self.total_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn test_index() -> VectorIndex {
        VectorIndex::new(4, IndexParams::default()).unwrap()
    }

    #[test]
    fn positions_follow_insertion_order() {
        let mut index = test_index();
        index.add(&[unit(4, 0), unit(4, 1)]).unwrap();
        assert_eq!(index.total_count(), 2);

        index.add(&[unit(4, 2)]).unwrap();
        assert_eq!(index.total_count(), 3);

        assert_eq!(index.reconstruct(0).unwrap(), unit(4, 0).as_slice());
        assert_eq!(index.reconstruct(1).unwrap(), unit(4, 1).as_slice());
        assert_eq!(index.reconstruct(2).unwrap(), unit(4, 2).as_slice());
    }

    #[test]
    fn reconstruct_out_of_range() {
        let mut index = test_index();
        index.add(&[unit(4, 0)]).unwrap();

        let err = index.reconstruct(1).unwrap_err();
        assert!(matches!(
            err,
            Error::PositionOutOfRange { position: 1, total: 1 }
        ));
    }

    #[test]
    fn bad_dimension_leaves_index_untouched() {
        let mut index = test_index();
        let err = index
            .add(&[unit(4, 0), vec![1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(index.total_count(), 0);
    }

    #[test]
    fn search_finds_exact_match() {
        let mut index = test_index();
        index
            .add(&[unit(4, 0), unit(4, 1), unit(4, 2), unit(4, 3)])
            .unwrap();

        let hits = index.search(&unit(4, 2), 2).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, 2);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn duplicate_vectors_index_cleanly() {
        let mut index = test_index();
        // Chunk-level duplicates across files are legal; identical unit
        // vectors dot to 1.0 (or a hair above) and must not be rejected.
        index
            .add(&[unit(4, 1), unit(4, 1), unit(4, 2)])
            .unwrap();
        index.add(&[unit(4, 1)]).unwrap();
        assert_eq!(index.total_count(), 4);

        let hits = index.search(&unit(4, 1), 4).unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn search_on_empty_index() {
        let index = test_index();
        assert!(index.search(&unit(4, 0), 3).unwrap().is_empty());
    }

    #[test]
    fn persist_then_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");

        let mut index = test_index();
        let mut v = vec![0.5, 0.5, 0.5, 0.5];
        crate::embedding::l2_normalize(&mut v);
        index.add(&[unit(4, 0), unit(4, 3), v.clone()]).unwrap();
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.total_count(), 3);
        assert_eq!(loaded.dimension(), 4);
        assert_eq!(loaded.params(), index.params());
        for position in 0..3u64 {
            assert_eq!(
                loaded.reconstruct(position).unwrap(),
                index.reconstruct(position).unwrap()
            );
        }

        let hits = loaded.search(&v, 1).unwrap();
        assert_eq!(hits[0].0, 2);
    }

    #[test]
    fn persist_replaces_previous_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");

        let mut index = test_index();
        index.add(&[unit(4, 0)]).unwrap();
        index.persist(&path).unwrap();

        index.add(&[unit(4, 1)]).unwrap();
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.total_count(), 2);
    }

    #[test]
    fn load_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        std::fs::write(&path, b"not a snapshot at all").unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }));
    }

    #[test]
    fn load_rejects_truncated_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");

        let mut index = test_index();
        index.add(&[unit(4, 0), unit(4, 1)]).unwrap();
        index.persist(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }));
    }

    #[test]
    fn load_rejects_overflowing_count() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");

        // Well-formed header with a count that overflows the expected
        // payload length computation.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&32u32.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&80u32.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }));
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut index = test_index();
        index.add(&[unit(4, 0), unit(4, 1)]).unwrap();
        index.reset();

        assert_eq!(index.total_count(), 0);
        assert!(index.is_empty());
        assert!(index.search(&unit(4, 0), 1).unwrap().is_empty());

        // Positions restart from zero after a reset.
        index.add(&[unit(4, 2)]).unwrap();
        assert_eq!(index.reconstruct(0).unwrap(), unit(4, 2).as_slice());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut index =
            VectorIndex::with_capacity(4, IndexParams::default(), 1).unwrap();
        // with_capacity clamps to MIN_CAPACITY; force growth through it.
        let batch: Vec<Vec<f32>> = (0..MIN_CAPACITY + 8)
            .map(|i| {
                let mut v = vec![
                    (i % 7) as f32 + 1.0,
                    (i % 5) as f32 + 1.0,
                    (i % 3) as f32 + 1.0,
                    1.0,
                ];
                crate::embedding::l2_normalize(&mut v);
                v
            })
            .collect();
        index.add(&batch).unwrap();
        assert_eq!(index.total_count() as usize, MIN_CAPACITY + 8);
        assert_eq!(
            index.reconstruct(MIN_CAPACITY as u64).unwrap(),
            batch[MIN_CAPACITY].as_slice()
        );
    }
}
