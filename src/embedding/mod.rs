//! C2 — Embedding client: turns text into a fixed-dimensional float vector.

mod deterministic;
mod http;
mod registry;

pub use deterministic::DeterministicEmbeddingClient;
pub use http::HttpEmbeddingClient;
pub use registry::EmbeddingRegistry;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds `text` into a vector of `dimension()` floats. MUST fail with
    /// `OrchestratorError::Embedding` when the backend returns an empty
    /// vector.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed dimensionality of vectors this client produces. Used by the
    /// store when creating a namespace's vector index.
    fn dimension(&self) -> usize;
}
