//! Relational catalog backing the access filter.
//!
//! Holds one access-control tuple per indexed chunk, keyed by global
//! position, plus ingestion summaries and chat history for the surrounding
//! application. The catalog is deliberately outside the snapshot triple:
//! the query path tolerates stale positions by dropping them during subset
//! reconstruction.

use std::{
    collections::HashSet,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const CHAT_HISTORY: TableDefinition<u64, &[u8]> =
    TableDefinition::new("chat_history");

/// Access-control tuple for one indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub file_hash: String,
    pub original_filename: String,
    pub department_id: i64,
    pub track_id: i64,
    pub module_id: Option<i64>,
    pub activity_id: Option<i64>,
    pub owner_profile_id: i64,
    pub owner_user_id: i64,
}

/// Per-file rollup of what has been ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub file_hash: String,
    pub original_filename: String,
    pub chunk_count: u64,
}

/// One stored question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub user_id: i64,
    pub question: String,
    pub answer: String,
    pub created_at_secs: u64,
}

pub struct CatalogDb {
    db: Database,
}

impl CatalogDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(CHAT_HISTORY)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Chunk access tuples --

    /// Insert all tuples in a single transaction; either the whole batch
    /// lands or none of it does.
    pub fn insert_chunks(&self, entries: &[(u64, ChunkEntry)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            for (position, entry) in entries {
                let bytes = serde_json::to_vec(entry)?;
                table.insert(*position, bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Global positions visible under the given filters.
    ///
    /// An absent filter places no constraint; an empty result means nothing
    /// is retrievable for this caller, which is not an error. Positions may
    /// be stale relative to the vector index; callers drop those.
    pub fn allowed_positions(
        &self,
        department_id: Option<i64>,
        track_id: Option<i64>,
    ) -> Result<HashSet<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut allowed = HashSet::new();
        for entry in table.iter()? {
            let (position, bytes) = entry?;
            let chunk: ChunkEntry = serde_json::from_slice(bytes.value())?;
            if let Some(dept) = department_id {
                if chunk.department_id != dept {
                    continue;
                }
            }
            if let Some(track) = track_id {
                if chunk.track_id != track {
                    continue;
                }
            }
            allowed.insert(position.value());
        }
        Ok(allowed)
    }

    /// Per-file summaries of everything in the catalog, ordered by filename.
    pub fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut summaries: Vec<DocumentSummary> = Vec::new();
        for entry in table.iter()? {
            let (_position, bytes) = entry?;
            let chunk: ChunkEntry = serde_json::from_slice(bytes.value())?;
            match summaries
                .iter_mut()
                .find(|s| s.file_hash == chunk.file_hash)
            {
                Some(summary) => summary.chunk_count += 1,
                None => summaries.push(DocumentSummary {
                    file_hash: chunk.file_hash,
                    original_filename: chunk.original_filename,
                    chunk_count: 1,
                }),
            }
        }
        summaries.sort_by(|a, b| a.original_filename.cmp(&b.original_filename));
        Ok(summaries)
    }

    /// Remove every chunk tuple in a single transaction.
    pub fn clear_chunks(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            let positions: Vec<u64> = table
                .iter()?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<std::result::Result<_, _>>()?;
            for position in positions {
                table.remove(position)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn chunk_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        Ok(table.len()?)
    }

    // -- Chat history --

    /// Append one exchange, stamping it with the current time. Returns the
    /// assigned id.
    pub fn append_chat(
        &self,
        user_id: i64,
        question: &str,
        answer: &str,
    ) -> Result<u64> {
        let created_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let record = ChatRecord {
            user_id,
            question: question.to_string(),
            answer: answer.to_string(),
            created_at_secs,
        };

        let txn = self.db.begin_write()?;
        let id = {
            let mut table = txn.open_table(CHAT_HISTORY)?;
            let id = table
                .last()?
                .map(|(k, _)| k.value() + 1)
                .unwrap_or(0);
            let bytes = serde_json::to_vec(&record)?;
            table.insert(id, bytes.as_slice())?;
            id
        };
        txn.commit()?;
        Ok(id)
    }

    /// All stored exchanges in insertion order.
    pub fn chat_history(&self) -> Result<Vec<(u64, ChatRecord)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHAT_HISTORY)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (id, bytes) = entry?;
            let record: ChatRecord = serde_json::from_slice(bytes.value())?;
            result.push((id.value(), record));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for CatalogDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogDb").finish_non_exhaustive()
    }
}
