//! Turning raw file bytes into embeddable chunks plus a content fingerprint.
//!
//! Rich format extraction (PDF, DOCX) is an external collaborator; this
//! processor handles plain-text formats and JSON. The fingerprint is a
//! SHA-256 digest of the extracted text, so byte-identical content is
//! detected as a duplicate regardless of filename.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{
    chunking::{self, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
};

/// Outcome of processing one file.
#[derive(Debug, Clone)]
pub enum ProcessedFile {
    /// Usable content: chunk texts plus the content fingerprint.
    Chunks {
        chunks: Vec<String>,
        fingerprint: String,
    },
    /// The file decoded but held no usable text. A fingerprint is present
    /// when the bytes decoded to a (possibly whitespace-only) string.
    Empty { fingerprint: Option<String> },
}

/// Splits decoded text into chunks sized for single-vector embedding.
#[derive(Debug, Clone, Copy)]
pub struct FileProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for FileProcessor {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl FileProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Decode, fingerprint, and chunk one file.
    ///
    /// Unsupported extensions are an input error; decodable files with no
    /// usable text report [`ProcessedFile::Empty`]. Duplicate detection
    /// against previously seen fingerprints is the caller's concern.
    pub fn process(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ProcessedFile> {
        let content = match decode_content(filename, bytes)? {
            Some(text) => text,
            None => return Ok(ProcessedFile::Empty { fingerprint: None }),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(ProcessedFile::Empty { fingerprint: None });
        }

        let fingerprint = content_fingerprint(trimmed);

        let chunks: Vec<String> =
            chunking::chunk_text(trimmed, self.chunk_size, self.chunk_overlap)
                .into_iter()
                .map(|c| c.text)
                .collect();

        if chunks.is_empty() {
            return Ok(ProcessedFile::Empty {
                fingerprint: Some(fingerprint),
            });
        }

        Ok(ProcessedFile::Chunks {
            chunks,
            fingerprint,
        })
    }
}

/// SHA-256 hex digest of extracted text content.
pub fn content_fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Decode file bytes into text according to the filename extension.
///
/// Returns `None` when the bytes cannot be decoded as text (treated as
/// "no usable content", not an error). Unknown extensions are rejected.
fn decode_content(filename: &str, bytes: &[u8]) -> Result<Option<String>> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "md" | "markdown" => {
            Ok(String::from_utf8(bytes.to_vec()).ok())
        }
        "json" => {
            let Ok(raw) = std::str::from_utf8(bytes) else {
                return Ok(None);
            };
            // Re-serialize so formatting differences don't change the
            // fingerprint of identical JSON documents.
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value) => Ok(Some(value.to_string())),
                Err(_) => Ok(None),
            }
        }
        "" => Err(Error::InvalidInput(format!(
            "file {filename} has no extension"
        ))),
        other => Err(Error::InvalidInput(format!(
            "unsupported file type .{other} for {filename}"
        ))),
    }
}
