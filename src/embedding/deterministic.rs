use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};

use super::EmbeddingClient;

/// Local, network-free embedding client: hashes overlapping word shingles
/// into fixed-size buckets (a bag-of-words sketch), then L2-normalizes.
/// Deterministic and collision-tolerant enough for the reference store's
/// similarity ranking and for integration tests that need no network access.
pub struct DeterministicEmbeddingClient {
    dims: usize,
}

impl DeterministicEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for DeterministicEmbeddingClient {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut buckets = vec![0f32; self.dims];
        let mut any = false;
        for word in text.split_whitespace().map(|w| w.to_lowercase()) {
            if word.is_empty() {
                continue;
            }
            any = true;
            let h = fnv1a(word.as_bytes());
            let idx = (h as usize) % self.dims;
            buckets[idx] += 1.0;
        }
        if !any {
            // Empty/whitespace-only text still yields a stable, non-empty
            // vector (all zero magnitude is fine for cosine scoring, which
            // treats it as "no similarity to anything").
            return Ok(buckets);
        }
        let norm: f32 = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for b in buckets.iter_mut() {
                *b /= norm;
            }
        }
        if buckets.is_empty() {
            return Err(OrchestratorError::Embedding("empty embedding vector".into()));
        }
        Ok(buckets)
    }

    fn dimension(&self) -> usize {
        self.dims
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_same_vector() {
        let client = DeterministicEmbeddingClient::new(32);
        let a = client.embed_text("agentic systems are fun").await.unwrap();
        let b = client.embed_text("agentic systems are fun").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_different_vector() {
        let client = DeterministicEmbeddingClient::new(32);
        let a = client.embed_text("hello world").await.unwrap();
        let b = client.embed_text("completely different sentence").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_text_does_not_error() {
        let client = DeterministicEmbeddingClient::new(16);
        let v = client.embed_text("").await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
