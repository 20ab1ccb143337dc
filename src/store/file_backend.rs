use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::embedding::EmbeddingClient;
use crate::error::{OrchestratorError, Result};

use super::{canonical_text, cosine_similarity, metadata_matches, Namespace, NamespaceStats, SearchResult, Store, StoredItem};

/// Disk-backed adapter: one JSON file per namespace under `root`, the whole
/// file read-modify-written per operation. Demonstrates the `Store` trait's
/// swappability without pulling in a real database dependency; a relational
/// store with a vector extension or a managed vector database would plug in
/// the same way, behind the same trait.
pub struct FileStore {
    root: PathBuf,
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    locks: RwLock<HashMap<Namespace, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, embeddings: Option<Arc<dyn EmbeddingClient>>) -> Self {
        Self { root: root.into(), embeddings, locks: RwLock::new(HashMap::new()) }
    }

    async fn lock_for(&self, namespace: &Namespace) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.read().await.get(namespace) {
            return existing.clone();
        }
        let mut guard = self.locks.write().await;
        guard.entry(namespace.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn path_for(&self, namespace: &Namespace) -> PathBuf {
        let file_name = format!("{}__{}.json", sanitize(&namespace.0), sanitize(&namespace.1));
        self.root.join(file_name)
    }

    async fn read_all(&self, namespace: &Namespace) -> Result<HashMap<String, StoredItem>> {
        let path = self.path_for(namespace);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| OrchestratorError::Store(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(OrchestratorError::Store(e.to_string())),
        }
    }

    async fn write_all(&self, namespace: &Namespace, items: &HashMap<String, StoredItem>) -> Result<()> {
        let path = self.path_for(namespace);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| OrchestratorError::Store(e.to_string()))?;
        }
        let raw = serde_json::to_string_pretty(items).map_err(|e| OrchestratorError::Store(e.to_string()))?;
        tokio::fs::write(&path, raw).await.map_err(|e| OrchestratorError::Store(e.to_string()))
    }
}

fn sanitize(s: &str) -> String {
    s.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

#[async_trait]
impl Store for FileStore {
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

        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        let mut items = self.read_all(namespace).await?;
        items.insert(
            key.to_string(),
            StoredItem {
                key: key.to_string(),
                value,
                metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
                document: document.unwrap_or(Value::Null),
                created_at: Utc::now(),
                embedding,
            },
        );
        self.write_all(namespace, &items).await
    }

    async fn get(&self, namespace: &Namespace, key: &str, _semantic: bool) -> Result<Option<StoredItem>> {
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        Ok(self.read_all(namespace).await?.get(key).cloned())
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

        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        let items = self.read_all(namespace).await?;

        let mut scored: Vec<SearchResult> = items
            .values()
            .filter(|item| item.embedding.is_some())
            .filter(|item| metadata_matches(&item.metadata, &metadata_filter))
            .map(|item| SearchResult {
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
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        let mut items = self.read_all(namespace).await?;
        items.remove(key);
        self.write_all(namespace, &items).await
    }

    async fn clear_namespace(&self, namespace: &Namespace) -> Result<()> {
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        let path = self.path_for(namespace);
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn count_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        Ok(self.read_all(namespace).await?.len())
    }

    async fn keys(&self, namespace: &Namespace) -> Result<Vec<String>> {
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        Ok(self.read_all(namespace).await?.into_keys().collect())
    }

    async fn stats(&self, namespace: &Namespace, _key: &str) -> Result<Option<NamespaceStats>> {
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        Ok(Some(NamespaceStats { count: self.read_all(namespace).await?.len() }))
    }

    async fn summarize(&self, namespace: &Namespace, key: &str) -> Result<()> {
        let lock = self.lock_for(namespace).await;
        let _guard = lock.lock().await;
        let mut items = self.read_all(namespace).await?;
        if let Some(item) = items.get_mut(key) {
            let text = canonical_text(&item.value);
            if text.len() > 400 {
                let cut = text.char_indices().map(|(i, _)| i).take_while(|&i| i <= 400).last().unwrap_or(0);
                let summary = format!("{}...[summarized, {} chars elided]", &text[..cut], text.len() - cut);
                if let Value::Object(obj) = &mut item.value {
                    obj.insert("text".to_string(), Value::String(summary));
                }
            }
        } else {
            return Ok(());
        }
        self.write_all(namespace, &items).await
    }
}

impl FileStore {
    #[allow(dead_code)]
    fn root_path(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips_across_files() {
        let dir = tempfile_dir();
        let store = FileStore::new(dir.path(), None);
        let namespace = ("t1".to_string(), "episodes".to_string());
        store.put(&namespace, "k1", serde_json::json!({"value": "hi"}), None, None, false).await.unwrap();
        let item = store.get(&namespace, "k1", false).await.unwrap().unwrap();
        assert_eq!(item.value["value"], "hi");
    }

    #[tokio::test]
    async fn summarize_truncates_long_text_on_disk() {
        let dir = tempfile_dir();
        let store = FileStore::new(dir.path(), None);
        let namespace = ("t1".to_string(), "episodes".to_string());
        let long_text = "x".repeat(1000);
        store.put(&namespace, "k1", serde_json::json!({"text": long_text}), None, None, false).await.unwrap();
        store.summarize(&namespace, "k1").await.unwrap();
        let item = store.get(&namespace, "k1", false).await.unwrap().unwrap();
        let text = item.value["text"].as_str().unwrap();
        assert!(text.len() < 1000);
        assert!(text.contains("[summarized"));
    }

    fn tempfile_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
