//! lectern - a filtered semantic retrieval core for document QA.
//!
//! lectern maintains a durable approximate-nearest-neighbor index over
//! dense text embeddings, incrementally populated by document ingestion.
//! Queries run against access-control-filtered subsets of the index via
//! exact reconstruction, with optional Maximal-Marginal-Relevance
//! re-ranking for diversity.
//!
//! # Quick start
//!
//! ```no_run
//! use lectern::{DataDir, IndexParams, OllamaEmbedder, RetrievalEngine};
//! use lectern::engine::{IngestRequest, SearchRequest};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let embedder =
//!     OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text", 768)
//!         .unwrap();
//! let engine =
//!     RetrievalEngine::open(data_dir, embedder, IndexParams::default())
//!         .unwrap();
//!
//! engine
//!     .ingest(IngestRequest {
//!         filename: "notes.txt".to_string(),
//!         bytes: b"Ownership in Rust moves values by default.".to_vec(),
//!         department_id: 1,
//!         track_id: 1,
//!         module_id: None,
//!         activity_id: None,
//!         owner_profile_id: 1,
//!         owner_user_id: 1,
//!     })
//!     .unwrap();
//!
//! let request = SearchRequest {
//!     query: "how does ownership work?".to_string(),
//!     department_id: Some(1),
//!     ..SearchRequest::default()
//! };
//! if let Some(chunks) = engine.find_relevant_context(&request).unwrap() {
//!     for chunk in &chunks {
//!         println!("{chunk}");
//!     }
//! }
//! ```

pub mod catalog;
pub mod chunking;
pub mod cli;
pub mod data_dir;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fingerprints;
pub mod metadata;
pub mod mmr;
pub mod processor;
pub mod subset;
pub mod vector_index;

pub use catalog::CatalogDb;
pub use data_dir::DataDir;
pub use embedding::{EmbeddingProvider, OllamaEmbedder};
pub use engine::RetrievalEngine;
pub use error::{Error, Result};
pub use metadata::ChunkRecord;
pub use vector_index::{IndexParams, VectorIndex};
