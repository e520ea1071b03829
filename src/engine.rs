//! The retrieval orchestrator: ingestion, filtered search, and reset.
//!
//! Owns the vector index, metadata store, and fingerprint set behind one
//! `RwLock`, plus the catalog database. Queries embed before taking the
//! read lock; ingestion embeds before taking the write lock, so the lock
//! is never held across a network call.

use std::{
    path::PathBuf,
    sync::RwLock,
};

use tracing::{debug, info, warn};

use crate::{
    catalog::{CatalogDb, ChunkEntry, DocumentSummary},
    data_dir::DataDir,
    embedding::EmbeddingProvider,
    error::{Error, Result},
    fingerprints::FingerprintSet,
    metadata::{ChunkRecord, MetadataStore},
    mmr,
    processor::{FileProcessor, ProcessedFile},
    subset::SubsetIndex,
    vector_index::{IndexParams, VectorIndex},
};

/// How many ANN candidates to pull per requested result when MMR gets to
/// re-rank them.
const MMR_POOL_FACTOR: usize = 5;

/// One file to ingest, with the access scope its chunks inherit.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub department_id: i64,
    pub track_id: i64,
    pub module_id: Option<i64>,
    pub activity_id: Option<i64>,
    pub owner_profile_id: i64,
    pub owner_user_id: i64,
}

/// What an ingest call accomplished.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub filename: String,
    pub fingerprint: String,
    pub chunks_indexed: usize,
    pub total_vectors: u64,
}

/// One retrieval query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    /// Minimum inner-product score for a chunk to be considered at all.
    pub score_threshold: f32,
    pub use_mmr: bool,
    pub mmr_lambda: f32,
    pub department_id: Option<i64>,
    pub track_id: Option<i64>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            top_k: 5,
            score_threshold: 0.3,
            use_mmr: true,
            mmr_lambda: 0.5,
            department_id: None,
            track_id: None,
        }
    }
}

/// What a reset removed.
#[derive(Debug, Clone)]
pub struct ResetReport {
    pub removed_paths: Vec<PathBuf>,
    pub vectors_before: u64,
    pub vectors_after: u64,
}

/// Counts for the status surface.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub vectors: u64,
    pub metadata_records: u64,
    pub fingerprints: usize,
    pub catalog_chunks: u64,
    pub dimension: usize,
}

struct EngineState {
    index: VectorIndex,
    metadata: MetadataStore,
    fingerprints: FingerprintSet,
}

/// The retrieval service. Cheap to share behind an `Arc`; queries run
/// concurrently, ingestion and reset serialize on the write lock.
pub struct RetrievalEngine<E: EmbeddingProvider> {
    data_dir: DataDir,
    embedder: E,
    processor: FileProcessor,
    catalog: CatalogDb,
    state: RwLock<EngineState>,
}

impl<E: EmbeddingProvider> RetrievalEngine<E> {
    /// Load persisted state or start fresh.
    ///
    /// The vector snapshot, metadata, and fingerprint files form a
    /// consistency triple: all present loads, none present starts empty,
    /// and anything in between is fatal. A present-but-corrupt member is
    /// also fatal rather than silently discarded.
    pub fn open(
        data_dir: DataDir,
        embedder: E,
        params: IndexParams,
    ) -> Result<Self> {
        let vectors_path = data_dir.vectors_file();
        let metadata_path = data_dir.metadata_file();
        let fingerprints_path = data_dir.fingerprints_file();

        let present = [&vectors_path, &metadata_path, &fingerprints_path]
            .iter()
            .filter(|p| p.exists())
            .count();

        let state = match present {
            0 => {
                info!(
                    dimension = embedder.dimension(),
                    "no persisted state, starting empty"
                );
                EngineState {
                    index: VectorIndex::new(embedder.dimension(), params)?,
                    metadata: MetadataStore::new(),
                    fingerprints: FingerprintSet::new(),
                }
            }
            3 => {
                let index = VectorIndex::load(&vectors_path)?;
                let metadata = MetadataStore::load(&metadata_path)?;
                let fingerprints = FingerprintSet::load(&fingerprints_path)?;

                if metadata.len() != index.total_count() {
                    return Err(Error::StateInconsistency(format!(
                        "index holds {} vectors but metadata holds {} records",
                        index.total_count(),
                        metadata.len()
                    )));
                }
                if index.dimension() != embedder.dimension() {
                    return Err(Error::StateInconsistency(format!(
                        "index dimension {} does not match embedder \
                         dimension {}",
                        index.dimension(),
                        embedder.dimension()
                    )));
                }

                info!(
                    vectors = index.total_count(),
                    dimension = index.dimension(),
                    "loaded persisted state"
                );
                EngineState {
                    index,
                    metadata,
                    fingerprints,
                }
            }
            _ => {
                let describe = |p: &PathBuf| {
                    format!(
                        "{} {}",
                        p.display(),
                        if p.exists() { "present" } else { "missing" }
                    )
                };
                return Err(Error::StateInconsistency(format!(
                    "partial persisted state: {}, {}, {}",
                    describe(&vectors_path),
                    describe(&metadata_path),
                    describe(&fingerprints_path)
                )));
            }
        };

        let catalog = CatalogDb::open(&data_dir.catalog_db())?;

        Ok(Self {
            data_dir,
            embedder,
            processor: FileProcessor::default(),
            catalog,
            state: RwLock::new(state),
        })
    }

    /// Process, embed, and index one file.
    ///
    /// Embedding happens before the write lock is taken; any embedding
    /// failure aborts before anything mutates. The catalog rows are
    /// written first so a catalog failure also leaves the triple alone.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        let (chunks, fingerprint) =
            match self.processor.process(&request.filename, &request.bytes)? {
                ProcessedFile::Chunks {
                    chunks,
                    fingerprint,
                } => (chunks, fingerprint),
                ProcessedFile::Empty { .. } => {
                    return Err(Error::EmptyContent(request.filename));
                }
            };

        // Cheap precheck so duplicates never pay for embedding.
        {
            let state = self.read_state();
            if state.fingerprints.contains(&fingerprint) {
                return Err(Error::DuplicateContent {
                    filename: request.filename,
                    fingerprint,
                });
            }
        }

        debug!(
            filename = %request.filename,
            chunks = chunks.len(),
            "embedding chunks"
        );
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            vectors.push(self.embedder.embed(chunk)?);
        }

        let mut state = self.write_state();

        // A concurrent ingest may have landed the same content between the
        // precheck and here.
        if state.fingerprints.contains(&fingerprint) {
            return Err(Error::DuplicateContent {
                filename: request.filename,
                fingerprint,
            });
        }

        let base = state.index.total_count();
        let entries: Vec<(u64, ChunkEntry)> = (0..chunks.len() as u64)
            .map(|i| {
                (
                    base + i,
                    ChunkEntry {
                        file_hash: fingerprint.clone(),
                        original_filename: request.filename.clone(),
                        department_id: request.department_id,
                        track_id: request.track_id,
                        module_id: request.module_id,
                        activity_id: request.activity_id,
                        owner_profile_id: request.owner_profile_id,
                        owner_user_id: request.owner_user_id,
                    },
                )
            })
            .collect();
        self.catalog.insert_chunks(&entries)?;

        state.index.add(&vectors)?;
        for (i, chunk_text) in chunks.iter().enumerate() {
            state.metadata.append(ChunkRecord {
                global_position: base + i as u64,
                file_hash: fingerprint.clone(),
                original_filename: request.filename.clone(),
                chunk_text: chunk_text.clone(),
                department_id: request.department_id,
                track_id: request.track_id,
                module_id: request.module_id,
                activity_id: request.activity_id,
                owner_profile_id: request.owner_profile_id,
                owner_user_id: request.owner_user_id,
            })?;
        }
        state.fingerprints.insert(fingerprint.clone());

        self.persist_state(&state)?;

        let report = IngestReport {
            filename: request.filename,
            fingerprint,
            chunks_indexed: chunks.len(),
            total_vectors: state.index.total_count(),
        };
        info!(
            filename = %report.filename,
            chunks = report.chunks_indexed,
            total = report.total_vectors,
            "ingested file"
        );
        Ok(report)
    }

    /// Filtered retrieval: embed, resolve allowed positions, reconstruct
    /// the subset, exact search, threshold, optional MMR, map to chunk
    /// texts.
    ///
    /// Returns `None` whenever nothing can be retrieved (empty index,
    /// empty allowed set, no hit above threshold) and on embedding or
    /// filter-store failure, which degrade with a warning. Invalid
    /// parameters are errors.
    pub fn find_relevant_context(
        &self,
        request: &SearchRequest,
    ) -> Result<Option<Vec<String>>> {
        if request.top_k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".into()));
        }
        if !(0.0..=1.0).contains(&request.mmr_lambda) {
            return Err(Error::InvalidInput(format!(
                "mmr_lambda {} outside [0, 1]",
                request.mmr_lambda
            )));
        }
        if request.score_threshold.is_nan() {
            return Err(Error::InvalidInput(
                "score_threshold must not be NaN".into(),
            ));
        }

        let query_vector = match self.embedder.embed(&request.query) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, returning no context");
                return Ok(None);
            }
        };

        let allowed = match self
            .catalog
            .allowed_positions(request.department_id, request.track_id)
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(error = %e, "access filter failed, returning no context");
                return Ok(None);
            }
        };
        if allowed.is_empty() {
            debug!("no positions allowed for this scope");
            return Ok(None);
        }

        let state = self.read_state();
        if state.index.is_empty() {
            return Ok(None);
        }

        let subset = SubsetIndex::build(&state.index, &allowed);
        if subset.is_empty() {
            return Ok(None);
        }

        let pool = if request.use_mmr {
            request.top_k.saturating_mul(MMR_POOL_FACTOR)
        } else {
            request.top_k
        };
        let mut hits = subset.search(&query_vector, pool)?;
        hits.retain(|h| h.score >= request.score_threshold);
        if hits.is_empty() {
            return Ok(None);
        }

        let chosen: Vec<u64> = if request.use_mmr {
            let candidates: Vec<&[f32]> =
                hits.iter().map(|h| subset.vector(h.local)).collect();
            mmr::select(
                &query_vector,
                &candidates,
                request.top_k,
                request.mmr_lambda,
            )
            .into_iter()
            .map(|i| hits[i].position)
            .collect()
        } else {
            hits.iter()
                .take(request.top_k)
                .map(|h| h.position)
                .collect()
        };

        let mut texts = Vec::with_capacity(chosen.len());
        for position in chosen {
            match state.metadata.lookup_by_position(position) {
                Some(record) => texts.push(record.chunk_text.clone()),
                None => {
                    warn!(position, "hit has no metadata record, skipping");
                }
            }
        }

        if texts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(texts))
        }
    }

    /// Drop every indexed vector and start over.
    ///
    /// Builds the fresh state before swapping it in, so a failure partway
    /// through never leaves a half-reset engine visible. A catalog clear
    /// failure is logged and tolerated; the stale rows are harmless
    /// because subset reconstruction drops out-of-range positions.
    pub fn reset(&self) -> Result<ResetReport> {
        let mut state = self.write_state();
        let vectors_before = state.index.total_count();

        let mut removed_paths = Vec::new();
        for path in [
            self.data_dir.vectors_file(),
            self.data_dir.metadata_file(),
            self.data_dir.fingerprints_file(),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => removed_paths.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.catalog.clear_chunks() {
            warn!(error = %e, "failed to clear catalog during reset");
        }

        let fresh = EngineState {
            index: VectorIndex::new(
                state.index.dimension(),
                state.index.params(),
            )?,
            metadata: MetadataStore::new(),
            fingerprints: FingerprintSet::new(),
        };
        *state = fresh;

        self.persist_state(&state)?;

        info!(vectors_before, "reset complete");
        Ok(ResetReport {
            removed_paths,
            vectors_before,
            vectors_after: state.index.total_count(),
        })
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let state = self.read_state();
        Ok(EngineStats {
            vectors: state.index.total_count(),
            metadata_records: state.metadata.len(),
            fingerprints: state.fingerprints.len(),
            catalog_chunks: self.catalog.chunk_count()?,
            dimension: state.index.dimension(),
        })
    }

    /// Per-file summaries from the catalog.
    pub fn documents(&self) -> Result<Vec<DocumentSummary>> {
        self.catalog.documents()
    }

    /// The catalog itself, for the surrounding application's chat history.
    pub fn catalog(&self) -> &CatalogDb {
        &self.catalog
    }

    fn persist_state(&self, state: &EngineState) -> Result<()> {
        state.index.persist(&self.data_dir.vectors_file())?;
        state.metadata.persist(&self.data_dir.metadata_file())?;
        state
            .fingerprints
            .persist(&self.data_dir.fingerprints_file())?;
        Ok(())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E: EmbeddingProvider> std::fmt::Debug for RetrievalEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    /// Deterministic stand-in for a real embedding model: hashes the text
    /// into a unit vector, so identical text always embeds identically.
    struct HashEmbedder {
        dimension: usize,
        fail: bool,
    }

    impl HashEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                fail: false,
            }
        }
    }

    impl EmbeddingProvider for HashEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.fail {
                return Err(Error::Embedding("provider offline".into()));
            }
            let digest = Sha256::digest(text.as_bytes());
            let mut v: Vec<f32> = (0..self.dimension)
                .map(|i| f32::from(digest[i % digest.len()]) - 127.5)
                .collect();
            crate::embedding::l2_normalize(&mut v);
            Ok(v)
        }
    }

    fn open_engine(
        dir: &std::path::Path,
    ) -> RetrievalEngine<HashEmbedder> {
        let data_dir = DataDir::resolve(Some(dir)).unwrap();
        RetrievalEngine::open(
            data_dir,
            HashEmbedder::new(8),
            IndexParams::default(),
        )
        .unwrap()
    }

    fn ingest_request(filename: &str, content: &str) -> IngestRequest {
        IngestRequest {
            filename: filename.to_string(),
            bytes: content.as_bytes().to_vec(),
            department_id: 1,
            track_id: 1,
            module_id: None,
            activity_id: None,
            owner_profile_id: 1,
            owner_user_id: 1,
        }
    }

    fn search_for(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            score_threshold: 0.99,
            use_mmr: false,
            ..SearchRequest::default()
        }
    }

    #[test]
    fn ingest_then_query_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        let report = engine
            .ingest(ingest_request("notes.txt", "ownership moves values"))
            .unwrap();
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(report.total_vectors, 1);

        // Identical text embeds identically, so an exact query scores 1.0.
        let texts = engine
            .find_relevant_context(&search_for("ownership moves values"))
            .unwrap()
            .unwrap();
        assert_eq!(texts, vec!["ownership moves values".to_string()]);
    }

    #[test]
    fn duplicate_content_rejected_across_filenames() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        engine
            .ingest(ingest_request("a.txt", "the same content"))
            .unwrap();
        let err = engine
            .ingest(ingest_request("b.txt", "the same content"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateContent { .. }));

        assert_eq!(engine.stats().unwrap().vectors, 1);
    }

    #[test]
    fn empty_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        let err = engine
            .ingest(ingest_request("blank.txt", "   \n"))
            .unwrap_err();
        assert!(matches!(err, Error::EmptyContent(_)));
    }

    #[test]
    fn department_filter_never_leaks() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        let mut hr = ingest_request("hr.txt", "vacation policy details");
        hr.department_id = 1;
        engine.ingest(hr).unwrap();

        let mut eng = ingest_request("eng.txt", "deployment runbook steps");
        eng.department_id = 2;
        engine.ingest(eng).unwrap();

        // Asking for the engineering chunk under the HR department filter
        // must come back empty, even though the vector match is exact.
        let mut request = search_for("deployment runbook steps");
        request.department_id = Some(1);
        assert!(engine.find_relevant_context(&request).unwrap().is_none());

        request.department_id = Some(2);
        let texts = engine.find_relevant_context(&request).unwrap().unwrap();
        assert_eq!(texts, vec!["deployment runbook steps".to_string()]);
    }

    #[test]
    fn threshold_excludes_weak_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        engine
            .ingest(ingest_request("doc.txt", "completely unrelated text"))
            .unwrap();

        // Hash embeddings of different texts are uncorrelated, so a 0.99
        // threshold rejects everything but an exact match.
        let request = search_for("quarterly financial report");
        assert!(engine.find_relevant_context(&request).unwrap().is_none());
    }

    #[test]
    fn query_on_empty_engine_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        let request = search_for("anything");
        assert!(engine.find_relevant_context(&request).unwrap().is_none());
    }

    #[test]
    fn invalid_parameters_are_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        let mut request = search_for("q");
        request.top_k = 0;
        assert!(matches!(
            engine.find_relevant_context(&request),
            Err(Error::InvalidInput(_))
        ));

        let mut request = search_for("q");
        request.mmr_lambda = 1.5;
        assert!(matches!(
            engine.find_relevant_context(&request),
            Err(Error::InvalidInput(_))
        ));

        let mut request = search_for("q");
        request.score_threshold = f32::NAN;
        assert!(matches!(
            engine.find_relevant_context(&request),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn embedding_failure_degrades_to_none() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let mut embedder = HashEmbedder::new(8);
        embedder.fail = true;
        let engine = RetrievalEngine::open(
            data_dir,
            embedder,
            IndexParams::default(),
        )
        .unwrap();

        let request = search_for("anything");
        assert!(engine.find_relevant_context(&request).unwrap().is_none());
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(tmp.path());
            engine
                .ingest(ingest_request("notes.txt", "persistent knowledge"))
                .unwrap();
        }

        let engine = open_engine(tmp.path());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.metadata_records, 1);
        assert_eq!(stats.fingerprints, 1);

        let texts = engine
            .find_relevant_context(&search_for("persistent knowledge"))
            .unwrap()
            .unwrap();
        assert_eq!(texts, vec!["persistent knowledge".to_string()]);
    }

    #[test]
    fn partial_state_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(tmp.path());
            engine
                .ingest(ingest_request("notes.txt", "some content"))
                .unwrap();
        }
        std::fs::remove_file(tmp.path().join("metadata.json")).unwrap();

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let err = RetrievalEngine::open(
            data_dir,
            HashEmbedder::new(8),
            IndexParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::StateInconsistency(_)));
    }

    #[test]
    fn corrupt_snapshot_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(tmp.path());
            engine
                .ingest(ingest_request("notes.txt", "some content"))
                .unwrap();
        }
        std::fs::write(tmp.path().join("vectors.bin"), b"garbage").unwrap();

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let err = RetrievalEngine::open(
            data_dir,
            HashEmbedder::new(8),
            IndexParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }));
    }

    #[test]
    fn reset_clears_everything_and_positions_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = open_engine(tmp.path());

        engine
            .ingest(ingest_request("a.txt", "first document"))
            .unwrap();
        engine
            .ingest(ingest_request("b.txt", "second document"))
            .unwrap();

        let report = engine.reset().unwrap();
        assert_eq!(report.vectors_before, 2);
        assert_eq!(report.vectors_after, 0);
        assert_eq!(report.removed_paths.len(), 3);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.vectors, 0);
        assert_eq!(stats.catalog_chunks, 0);

        // Previously duplicate content ingests cleanly again.
        let report = engine
            .ingest(ingest_request("a.txt", "first document"))
            .unwrap();
        assert_eq!(report.total_vectors, 1);
    }

    #[test]
    fn dimension_mismatch_on_reopen_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(tmp.path());
            engine
                .ingest(ingest_request("notes.txt", "some content"))
                .unwrap();
        }

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let err = RetrievalEngine::open(
            data_dir,
            HashEmbedder::new(16),
            IndexParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::StateInconsistency(_)));
    }
}
