use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Location of the durable retrieval artifacts.
///
/// The vector snapshot, metadata records, and fingerprint set form a
/// consistency triple and live side by side with the catalog database.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The LECTERN_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/lectern/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("LECTERN_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("lectern")
                .get_data_home()
                .ok_or_else(|| {
                    Error::InvalidInput(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Binary vector snapshot (the serialized vector index).
    pub fn vectors_file(&self) -> PathBuf {
        self.root.join("vectors.bin")
    }

    /// Serialized chunk metadata records.
    pub fn metadata_file(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Serialized content-fingerprint set.
    pub fn fingerprints_file(&self) -> PathBuf {
        self.root.join("fingerprints.json")
    }

    /// Relational catalog (access-control tuples, chat history).
    pub fn catalog_db(&self) -> PathBuf {
        self.root.join("catalog.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.vectors_file(), tmp.path().join("vectors.bin"));
        assert_eq!(dir.metadata_file(), tmp.path().join("metadata.json"));
        assert_eq!(
            dir.fingerprints_file(),
            tmp.path().join("fingerprints.json")
        );
        assert_eq!(dir.catalog_db(), tmp.path().join("catalog.redb"));
    }

    #[test]
    fn resolve_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("store").join("v1");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().exists());
        assert_eq!(dir.root(), nested);
    }
}
