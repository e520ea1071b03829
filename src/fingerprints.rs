//! The set of content fingerprints for everything already ingested.
//!
//! Fingerprints are SHA-256 hex digests of extracted text, so duplicate
//! detection keys on content rather than filename.

use std::{collections::HashSet, path::Path};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct FingerprintSet {
    hashes: HashSet<String>,
}

impl FingerprintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the set from a JSON snapshot; unparseable content is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let hashes: HashSet<String> =
            serde_json::from_slice(&bytes).map_err(|e| {
                Error::StateInconsistency(format!(
                    "unreadable fingerprint set at {}: {e}",
                    path.display()
                ))
            })?;
        Ok(Self { hashes })
    }

    /// Atomically write the set as JSON (write-to-temp-then-rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(&self.hashes)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.hashes.contains(fingerprint)
    }

    /// Returns false if the fingerprint was already present.
    pub fn insert(&mut self, fingerprint: String) -> bool {
        self.hashes.insert(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn reset(&mut self) {
        self.hashes.clear();
    }
}
