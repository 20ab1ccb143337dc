use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::embedding::EmbeddingClient;
use crate::error::{OrchestratorError, Result};

use super::{canonical_text, cosine_similarity, metadata_matches, Namespace, NamespaceStats, SearchResult, Store, StoredItem};

/// Reference in-memory store. Semantic search is a brute-force cosine scan —
/// fine at the scale a single workspace's working memory reaches, and it
/// keeps the reference implementation free of a vector-index dependency.
/// Pluggable adapters (a real vector database, a relational store with a
/// vector extension, a distributed cache) implement the same `Store` trait;
/// `FileStore` is this crate's disk-backed adapter and `CacheStore` its
/// TTL-evicting, Redis-shaped one.
pub struct InMemoryStore {
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    buckets: RwLock<HashMap<Namespace, Arc<Mutex<HashMap<String, StoredItem>>>>>,
}

impl InMemoryStore {
    pub fn new(embeddings: Option<Arc<dyn EmbeddingClient>>) -> Self {
        Self { embeddings, buckets: RwLock::new(HashMap::new()) }
    }

    async fn bucket(&self, namespace: &Namespace) -> Arc<Mutex<HashMap<String, StoredItem>>> {
        if let Some(existing) = self.buckets.read().await.get(namespace) {
            return existing.clone();
        }
        let mut guard = self.buckets.write().await;
        guard
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
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
        bucket.lock().await.insert(key.to_string(), item);
        Ok(())
    }

    async fn get(&self, namespace: &Namespace, key: &str, _semantic: bool) -> Result<Option<StoredItem>> {
        let bucket = self.bucket(namespace).await;
        Ok(bucket.lock().await.get(key).cloned())
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
        let items = bucket.lock().await;

        let mut scored: Vec<SearchResult> = items
            .values()
            .filter(|item| item.embedding.is_some())
            .filter(|item| metadata_matches(&item.metadata, &metadata_filter))
            .map(|item| {
                let score = cosine_similarity(&query_vec, item.embedding.as_deref().unwrap_or(&[]));
                SearchResult {
                    key: item.key.clone(),
                    value: item.value.clone(),
                    metadata: item.metadata.clone(),
                    document: item.document.clone(),
                    score,
                }
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
        Ok(bucket.lock().await.len())
    }

    async fn keys(&self, namespace: &Namespace) -> Result<Vec<String>> {
        let bucket = self.bucket(namespace).await;
        Ok(bucket.lock().await.keys().cloned().collect())
    }

    async fn stats(&self, namespace: &Namespace, _key: &str) -> Result<Option<NamespaceStats>> {
        let bucket = self.bucket(namespace).await;
        Ok(Some(NamespaceStats { count: bucket.lock().await.len() }))
    }

    async fn summarize(&self, namespace: &Namespace, key: &str) -> Result<()> {
        let bucket = self.bucket(namespace).await;
        let mut items = bucket.lock().await;
        if let Some(item) = items.get_mut(key) {
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
