//! C1 — Store adapter: namespaced key-value persistence, optionally with
//! semantic (embedding-indexed) search over the same namespace.

mod memory_backend;
mod file_backend;
mod cache_backend;
mod registry;

pub use memory_backend::InMemoryStore;
pub use file_backend::FileStore;
pub use cache_backend::CacheStore;
pub use registry::StoreRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// `(tenant_or_session, bucket)` — a logical container for memory items.
pub type Namespace = (String, String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub key: String,
    pub value: Value,
    pub metadata: Value,
    pub document: Value,
    pub created_at: DateTime<Utc>,
    /// Present only for items written with `semantic=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub key: String,
    pub value: Value,
    pub metadata: Value,
    pub document: Value,
    pub score: f32,
}

/// Row count / recency stats, surfaced to the memory manager's decay check.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceStats {
    pub count: usize,
}

/// Unified store interface. Every operation is async; a store MAY serialize
/// operations within one namespace but different namespaces never block each
/// other.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Value,
        metadata: Option<Value>,
        document: Option<Value>,
        semantic: bool,
    ) -> Result<()>;

    async fn get(&self, namespace: &Namespace, key: &str, semantic: bool) -> Result<Option<StoredItem>>;

    /// Cosine-similarity ranking over the embedded query against items stored
    /// with `semantic=true` in this namespace. Fails with `NotSupported` if
    /// this store was built without an embedding client.
    async fn search(
        &self,
        namespace: &Namespace,
        query_text: &str,
        limit: usize,
        metadata_filter: Option<Value>,
    ) -> Result<Vec<SearchResult>>;

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<()>;

    async fn clear_namespace(&self, namespace: &Namespace) -> Result<()>;

    async fn count_namespace(&self, namespace: &Namespace) -> Result<usize>;

    async fn keys(&self, namespace: &Namespace) -> Result<Vec<String>>;

    /// Row-count stats for decay evaluation. Stores that don't track this
    /// return `Ok(None)`; the memory manager treats that as "never decay".
    async fn stats(&self, _namespace: &Namespace, _key: &str) -> Result<Option<NamespaceStats>> {
        Ok(None)
    }

    /// Summarize/compact an item once it has grown past the decay threshold.
    /// Stores that don't support this return `NotSupported`; the memory
    /// manager logs and swallows that error.
    async fn summarize(&self, _namespace: &Namespace, _key: &str) -> Result<()> {
        Err(OrchestratorError::NotSupported("summarize".into()))
    }
}

/// Matches every key in `filter` against the same key in `metadata`,
/// requiring exact equality. An empty or absent filter matches everything.
pub(crate) fn metadata_matches(metadata: &Value, filter: &Option<Value>) -> bool {
    let Some(filter) = filter else { return true };
    let Some(filter_obj) = filter.as_object() else {
        return true;
    };
    let Some(meta_obj) = metadata.as_object() else {
        return filter_obj.is_empty();
    };
    filter_obj
        .iter()
        .all(|(k, v)| meta_obj.get(k).map(|mv| mv == v).unwrap_or(false))
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b + 1e-10)
}

/// Pulls the canonical text field an embedding is built from: `value.text`
/// when present, else the whole value rendered as compact JSON.
pub(crate) fn canonical_text(value: &Value) -> String {
    match value.get("text").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
