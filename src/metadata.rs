//! Append-only chunk metadata, kept in lockstep with the vector index.
//!
//! `global_position` is the join key between a stored vector and its chunk
//! record. The store enforces `records[i].global_position == i` on every
//! append and on load, so a drifting index/metadata pair is caught instead
//! of silently returning the wrong chunk text.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Everything known about one indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Join key with the vector index; equals the record's position in the
    /// store.
    pub global_position: u64,
    /// SHA-256 fingerprint of the source file's extracted text.
    pub file_hash: String,
    pub original_filename: String,
    pub chunk_text: String,
    pub department_id: i64,
    pub track_id: i64,
    pub module_id: Option<i64>,
    pub activity_id: Option<i64>,
    pub owner_profile_id: i64,
    pub owner_user_id: i64,
}

/// In-memory record table with JSON persistence.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: Vec<ChunkRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a JSON snapshot.
    ///
    /// A present-but-unparseable file, or one whose positions are not the
    /// dense sequence `0..len`, is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let records: Vec<ChunkRecord> =
            serde_json::from_slice(&bytes).map_err(|e| {
                Error::StateInconsistency(format!(
                    "unreadable metadata at {}: {e}",
                    path.display()
                ))
            })?;

        for (i, record) in records.iter().enumerate() {
            if record.global_position != i as u64 {
                return Err(Error::StateInconsistency(format!(
                    "metadata record {i} carries position {}",
                    record.global_position
                )));
            }
        }

        Ok(Self { records })
    }

    /// Atomically write all records as JSON (write-to-temp-then-rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(&self.records)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append one record; its `global_position` must equal the current
    /// length.
    pub fn append(&mut self, record: ChunkRecord) -> Result<()> {
        let expected = self.records.len() as u64;
        if record.global_position != expected {
            return Err(Error::StateInconsistency(format!(
                "appending record with position {} but next position is \
                 {expected}",
                record.global_position
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn lookup_by_position(&self, position: u64) -> Option<&ChunkRecord> {
        self.records.get(position as usize)
    }

    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: u64) -> ChunkRecord {
        ChunkRecord {
            global_position: position,
            file_hash: format!("hash-{position}"),
            original_filename: "notes.txt".to_string(),
            chunk_text: format!("chunk {position}"),
            department_id: 1,
            track_id: 2,
            module_id: Some(3),
            activity_id: None,
            owner_profile_id: 10,
            owner_user_id: 20,
        }
    }

    #[test]
    fn append_assigns_dense_positions() {
        let mut store = MetadataStore::new();
        store.append(record(0)).unwrap();
        store.append(record(1)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.lookup_by_position(1).unwrap().chunk_text,
            "chunk 1"
        );
        assert!(store.lookup_by_position(2).is_none());
    }

    #[test]
    fn append_rejects_position_gap() {
        let mut store = MetadataStore::new();
        store.append(record(0)).unwrap();

        let err = store.append(record(2)).unwrap_err();
        assert!(matches!(err, Error::StateInconsistency(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persist_then_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");

        let mut store = MetadataStore::new();
        store.append(record(0)).unwrap();
        store.append(record(1)).unwrap();
        store.persist(&path).unwrap();

        let loaded = MetadataStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup_by_position(0), store.lookup_by_position(0));
        assert_eq!(loaded.lookup_by_position(1), store.lookup_by_position(1));
    }

    #[test]
    fn load_rejects_unparseable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = MetadataStore::load(&path).unwrap_err();
        assert!(matches!(err, Error::StateInconsistency(_)));
    }

    #[test]
    fn load_rejects_non_dense_positions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");

        let records = vec![record(0), record(5)];
        std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();

        let err = MetadataStore::load(&path).unwrap_err();
        assert!(matches!(err, Error::StateInconsistency(_)));
    }

    #[test]
    fn reset_clears_records() {
        let mut store = MetadataStore::new();
        store.append(record(0)).unwrap();
        store.reset();

        assert!(store.is_empty());
        // Positions restart from zero.
        store.append(record(0)).unwrap();
        assert_eq!(store.len(), 1);
    }
}
