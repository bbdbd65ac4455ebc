//! Embedder gateway (§4.B): text → fixed-length float vector, with retry
//! and byte packing for storage.

mod retry;

#[cfg(feature = "openai")]
mod openai;

pub use retry::RetryConfig;

#[cfg(feature = "openai")]
pub use openai::OpenAiEmbedder;

use crate::error::{Error, Result};
use async_trait::async_trait;

/// The embedder as an injectable capability (§9 "Embedder as a
/// capability"): `text -> Result<Vec<f32>, Error>`, not a global. Tests
/// substitute a deterministic fake; the commit layer accepts
/// `Option<&dyn Embedder>`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single string of text, returning a vector of length `dims()`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The fixed dimensionality this embedder produces.
    fn dims(&self) -> usize;
}

/// Wraps an inner embedder with the empty-text guard and exponential
/// backoff retry described in §4.B. This is the gateway callers actually
/// hold; `Embedder` implementors only need to provide a single raw call.
pub struct RetryingEmbedder<E> {
    inner: E,
    config: RetryConfig,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        RetryingEmbedder { inner, config }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::EmptyText);
        }
        retry::with_retry(&self.config, || self.inner.embed(text)).await
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }
}

/// A deterministic fake embedder for tests: hashes the text into a vector
/// of the requested dimensionality. Never fails, never retries.
pub struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        MockEmbedder { dims }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::EmptyText);
        }
        let mut seed: u64 = 1469598103934665603;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(1099511628211);
        }
        Ok((0..self.dims)
            .map(|i| {
                let mixed = seed.wrapping_add(i as u64).wrapping_mul(2654435761);
                ((mixed % 2000) as f32 / 1000.0) - 1.0
            })
            .collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Packs a float32 vector into little-endian bytes for storage (§4.B).
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Inverse of `embedding_to_bytes`. Returns `InvalidInput` if the byte
/// length is not a multiple of 4.
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidInput(format!(
            "embedding byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip() {
        let original: Vec<f32> = vec![0.0, 1.0, -1.0, 3.14159, f32::MIN, f32::MAX, -0.000001];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes.len(), original.len() * 4);
        let decoded = bytes_to_embedding(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_misaligned_byte_length() {
        let bytes = vec![0u8, 1, 2];
        assert!(bytes_to_embedding(&bytes).is_err());
    }

    #[tokio::test]
    async fn mock_embedder_rejects_empty_text() {
        let embedder = MockEmbedder::new(8);
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, Error::EmptyText));
    }

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(16);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn retrying_embedder_passes_through_on_success() {
        let embedder = RetryingEmbedder::new(MockEmbedder::new(4), RetryConfig::default());
        let v = embedder.embed("some text").await.unwrap();
        assert_eq!(v.len(), 4);
    }

    #[tokio::test]
    async fn retrying_embedder_rejects_empty_before_calling_inner() {
        let embedder = RetryingEmbedder::new(MockEmbedder::new(4), RetryConfig::default());
        let err = embedder.embed("").await.unwrap_err();
        assert!(matches!(err, Error::EmptyText));
    }
}
