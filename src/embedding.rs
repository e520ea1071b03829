//! The embedding provider seam and small vector math helpers.
//!
//! The retrieval core never computes embeddings itself; it consumes a
//! provider that maps text to fixed-dimension unit-norm vectors. The same
//! text must always produce the same vector for a given provider and model.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Maps text to fixed-dimension dense vectors.
///
/// Implementations must return unit-norm vectors (Euclidean length 1) so
/// that inner product equals cosine similarity, and must be deterministic
/// for the same input text.
pub trait EmbeddingProvider: Send + Sync {
    /// The dimension of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed a single piece of text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scale a vector to Euclidean length 1. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product of two equal-length vectors.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Embedding client for an Ollama-compatible HTTP endpoint.
///
/// Calls `POST {base_url}/api/embeddings` with `{"model", "prompt"}` and
/// normalizes the returned vector. All failures surface as
/// [`Error::Embedding`] so callers can degrade per the retrieval protocol.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dimension: usize) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                Error::Embedding(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            client,
        })
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .map_err(|e| Error::Embedding(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Embedding(format!(
                "provider returned HTTP {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .map_err(|e| Error::Embedding(format!("malformed response: {e}")))?;

        if body.embedding.len() != self.dimension {
            return Err(Error::Embedding(format!(
                "provider returned dimension {}, expected {}",
                body.embedding.len(),
                self.dimension
            )));
        }

        let mut vector = body.embedding;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}
