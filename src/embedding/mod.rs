//! Text-to-vector clients, the shared embedding cache, and the batching service.

mod cache;
mod ollama;
mod service;

pub use cache::{EmbeddingCache, cache_key};
pub use ollama::OllamaClient;
pub use service::{BatchEmbedding, EmbeddingService, EmbeddingSettings, EmbeddingStats};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Transport failure while talking to a remote provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote provider answered with a non-success status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body, best effort.
        body: String,
    },
}

/// Errors raised by the embedding service.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The backend failed.
    #[error(transparent)]
    Client(#[from] EmbeddingClientError),
    /// A backend call exceeded the configured timeout.
    #[error("embedding backend did not answer within {0:?}")]
    Timeout(Duration),
    /// The backend returned a different number of vectors than texts sent.
    #[error("embedding backend returned {actual} vectors for {expected} texts")]
    CountMismatch {
        /// Texts sent.
        expected: usize,
        /// Vectors received.
        actual: usize,
    },
    /// A vector's dimension differs from the one recorded for the model.
    #[error("model '{model}' produces {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        /// Model identifier.
        model: String,
        /// Dimension recorded in the cache.
        expected: usize,
        /// Dimension just produced.
        actual: usize,
    },
    /// The persisted cache could not be read or written.
    #[error("embedding cache at {path}: {message}")]
    CachePersistence {
        /// Cache file.
        path: PathBuf,
        /// Failure description.
        message: String,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in order.
    async fn generate_embeddings(
        &self,
        model: &str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic offline client using signed feature hashing over lowercase tokens.
///
/// The same `(model, text)` pair always yields the same unit-length vector.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbeddingClient {
    dimension: usize,
}

impl HashingEmbeddingClient {
    /// Construct a client producing `dimension`-length vectors.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(model: &str, text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for token in text.split_whitespace() {
            let digest = Sha256::new()
                .chain_update(model.as_bytes())
                .chain_update([0u8])
                .chain_update(token.to_lowercase().as_bytes())
                .finalize();
            let mut slot_bytes = [0u8; 8];
            slot_bytes.copy_from_slice(&digest[..8]);
            let position = (u64::from_le_bytes(slot_bytes) % dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[position] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    async fn generate_embeddings(
        &self,
        model: &str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::trace!(model, dimension = self.dimension, texts = texts.len(), "Hashing embeddings");

        Ok(texts
            .iter()
            .map(|text| Self::encode(model, text, self.dimension))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_client_is_deterministic_and_normalized() {
        let client = HashingEmbeddingClient::new(32);
        let texts = vec!["dharma is duty".to_string(), "Dharma IS duty".to_string()];

        let first = client.generate_embeddings("m", texts.clone()).await.unwrap();
        let second = client.generate_embeddings("m", texts).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0], first[1]);
        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_client_separates_models() {
        let client = HashingEmbeddingClient::new(64);
        let text = vec!["karma yoga".to_string()];
        let a = client.generate_embeddings("model-a", text.clone()).await.unwrap();
        let b = client.generate_embeddings("model-b", text).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn hashing_client_rejects_zero_dimension() {
        let client = HashingEmbeddingClient::new(0);
        let error = client
            .generate_embeddings("m", vec!["text".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn blank_text_yields_zero_vector() {
        let client = HashingEmbeddingClient::new(8);
        let vectors = client.generate_embeddings("m", vec![" ".into()]).await.unwrap();
        assert_eq!(vectors[0], vec![0.0; 8]);
    }
}
