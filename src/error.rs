use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("catalog open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("catalog storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("catalog transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("catalog table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("catalog commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt index file {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("persisted state is inconsistent: {0}")]
    StateInconsistency(String),

    #[error("position {position} out of range (index holds {total} vectors)")]
    PositionOutOfRange { position: u64, total: u64 },

    #[error("duplicate content: {filename} (fingerprint {fingerprint})")]
    DuplicateContent {
        filename: String,
        fingerprint: String,
    },

    #[error("no usable content in {0}")]
    EmptyContent(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
