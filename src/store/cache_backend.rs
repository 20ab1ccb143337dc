use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::embedding::EmbeddingClient;
use crate::error::{OrchestratorError, Result};

use super::{canonical_text, cosine_similarity, metadata_matches, Namespace, NamespaceStats, SearchResult, Store, StoredItem};

/// Key-value cache adapter in the shape of a Redis-backed `Store`
/// (`llm/stores/adapters/redis_store.py` in the original keys items as
/// `memory:{namespace}:{key}` hashes and evicts them on TTL). This is an
/// in-process stand-in with the same eviction behavior, not a real redis
/// client: entries written here expire `ttl` after their `put` and read as
/// absent afterward, the way a cache-style backend — as opposed to the
/// permanent `InMemoryStore` or durable `FileStore` — is expected to behave.
pub struct CacheStore {
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    ttl: Duration,
    buckets: RwLock<HashMap<Namespace, Arc<Mutex<HashMap<String, (StoredItem, Instant)>>>>>,
}

impl CacheStore {
    pub fn new(ttl: Duration, embeddings: Option<Arc<dyn EmbeddingClient>>) -> Self {
        Self { embeddings, ttl, buckets: RwLock::new(HashMap::new()) }
    }

    async fn bucket(&self, namespace: &Namespace) -> Arc<Mutex<HashMap<String, (StoredItem, Instant)>>> {
        if let Some(existing) = self.buckets.read().await.get(namespace) {
            return existing.clone();
        }
        let mut guard = self.buckets.write().await;
        guard.entry(namespace.clone()).or_insert_with(|| Arc::new(Mutex::new(HashMap::new()))).clone()
    }

    fn evict_expired(items: &mut HashMap<String, (StoredItem, Instant)>) {
        let now = Instant::now();
        items.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl Store for CacheStore {
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Value,
        metadata: Option<Value>,
        document: Option<Value>,
        semantic: bool,
    ) -> Result<()> {
        let embedding = if semantic {
            let client = self
                .embeddings
                .as_ref()
                .ok_or_else(|| OrchestratorError::NotSupported("semantic put without an embedding client".into()))?;
            Some(client.embed_text(&canonical_text(&value)).await.map_err(|e| OrchestratorError::Store(e.to_string()))?)
        } else {
            None
        };

        let item = StoredItem {
            key: key.to_string(),
            value,
            metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            document: document.unwrap_or(Value::Null),
            created_at: Utc::now(),
            embedding,
        };

        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);
        items.insert(key.to_string(), (item, Instant::now() + self.ttl));
        Ok(())
    }

    async fn get(&self, namespace: &Namespace, key: &str, _semantic: bool) -> Result<Option<StoredItem>> {
        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);
        Ok(items.get(key).map(|(item, _)| item.clone()))
    }

    async fn search(
        &self,
        namespace: &Namespace,
        query_text: &str,
        limit: usize,
        metadata_filter: Option<Value>,
    ) -> Result<Vec<SearchResult>> {
        let client = self
            .embeddings
            .as_ref()
            .ok_or_else(|| OrchestratorError::NotSupported("search on a non-semantic store".into()))?;
        let query_vec = client.embed_text(query_text).await.map_err(|e| OrchestratorError::Store(e.to_string()))?;

        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);

        let mut scored: Vec<SearchResult> = items
            .values()
            .filter(|(item, _)| item.embedding.is_some())
            .filter(|(item, _)| metadata_matches(&item.metadata, &metadata_filter))
            .map(|(item, _)| SearchResult {
                key: item.key.clone(),
                value: item.value.clone(),
                metadata: item.metadata.clone(),
                document: item.document.clone(),
                score: cosine_similarity(&query_vec, item.embedding.as_deref().unwrap_or(&[])),
            })
            .collect();

        scored.sort_by(|a, b| match b.score.partial_cmp(&a.score) {
            Some(std::cmp::Ordering::Equal) | None => a.key.cmp(&b.key),
            Some(ord) => ord,
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<()> {
        let bucket = self.bucket(namespace).await;
        bucket.lock().await.remove(key);
        Ok(())
    }

    async fn clear_namespace(&self, namespace: &Namespace) -> Result<()> {
        let bucket = self.bucket(namespace).await;
        bucket.lock().await.clear();
        Ok(())
    }

    async fn count_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);
        Ok(items.len())
    }

    async fn keys(&self, namespace: &Namespace) -> Result<Vec<String>> {
        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);
        Ok(items.keys().cloned().collect())
    }

    async fn stats(&self, namespace: &Namespace, _key: &str) -> Result<Option<NamespaceStats>> {
        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);
        Ok(Some(NamespaceStats { count: items.len() }))
    }

    async fn summarize(&self, namespace: &Namespace, key: &str) -> Result<()> {
        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        Self::evict_expired(&mut items);
        if let Some((item, _)) = items.get_mut(key) {
            let text = canonical_text(&item.value);
            if text.len() > 400 {
                let cut = text.char_indices().map(|(i, _)| i).take_while(|&i| i <= 400).last().unwrap_or(0);
                let summary = format!("{}...[summarized, {} chars elided]", &text[..cut], text.len() - cut);
                if let Value::Object(obj) = &mut item.value {
                    obj.insert("text".to_string(), Value::String(summary));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(tenant: &str, bucket: &str) -> Namespace {
        (tenant.to_string(), bucket.to_string())
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_before_ttl_expiry() {
        let store = CacheStore::new(Duration::from_secs(60), None);
        let namespace = ns("t1", "episodes");
        store.put(&namespace, "k1", serde_json::json!({"value": "hi"}), None, None, false).await.unwrap();
        let item = store.get(&namespace, "k1", false).await.unwrap().unwrap();
        assert_eq!(item.value["value"], "hi");
    }

    #[tokio::test]
    async fn entry_is_gone_once_ttl_elapses() {
        tokio::time::pause();
        let store = CacheStore::new(Duration::from_secs(1), None);
        let namespace = ns("t1", "episodes");
        store.put(&namespace, "k1", serde_json::json!({"value": "hi"}), None, None, false).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(&namespace, "k1", false).await.unwrap().is_none());
    }
}
