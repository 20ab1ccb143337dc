//! C4 — Memory manager: unified API for episodic + semantic memory, reward
//! tracking, decay/summarization hooks. Wraps one `Store` and one
//! `EmbeddingClient`; store-agnostic itself.

mod reward;

pub use reward::RewardCache;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::store::{Namespace, SearchResult, Store, StoredItem};

pub struct MemoryManager {
    store: Arc<dyn Store>,
    /// Kept alongside the store per the component design (C4 depends on
    /// C1+C2); semantic embedding itself happens inside the store.
    #[allow(dead_code)]
    embedding_client: Arc<dyn EmbeddingClient>,
    decay_after: usize,
    reward_cache: RewardCache,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn Store>, embedding_client: Arc<dyn EmbeddingClient>, decay_after: usize) -> Self {
        Self { store, embedding_client, decay_after, reward_cache: RewardCache::default() }
    }

    #[instrument(skip(self, text, metadata, document), fields(component = "memory_manager"))]
    pub async fn save_semantic(
        &self,
        namespace: &Namespace,
        key: &str,
        text: &str,
        metadata: Option<Value>,
        document: Option<Value>,
        reward: Option<f64>,
    ) -> Result<Value> {
        let mut meta = metadata.unwrap_or_else(|| json!({}));
        let entry = json!({
            "text": text,
            "metadata": meta.clone(),
            "document": document.clone().unwrap_or(Value::Null),
            "reward": reward,
            "created_at": Utc::now().to_rfc3339(),
        });

        self.store.put(namespace, key, entry.clone(), Some(meta.clone()), document, true).await?;

        if let Some(reward) = reward {
            self.reward_cache.push(key, reward);
            if let Err(e) = self.update_reward_stats(namespace, key).await {
                warn!(error = %e, "failed to update reward stats");
            } else if let Some(stats) = self.reward_cache.stats(key) {
                meta["avg_reward"] = json!(stats.0);
                meta["reward_count"] = json!(stats.1);
            }
        }

        self.maybe_decay(namespace, key).await;

        Ok(entry)
    }

    async fn update_reward_stats(&self, namespace: &Namespace, key: &str) -> Result<()> {
        let Some((avg_reward, reward_count)) = self.reward_cache.stats(key) else {
            return Ok(());
        };
        let Some(mut current) = self.store.get(namespace, key, true).await? else {
            return Ok(());
        };
        if !current.metadata.is_object() {
            current.metadata = json!({});
        }
        let metadata = current.metadata.as_object_mut().expect("just normalized to an object");
        metadata.insert("avg_reward".to_string(), json!(avg_reward));
        metadata.insert("reward_count".to_string(), json!(reward_count));
        self.store
            .put(namespace, key, current.value, Some(current.metadata), Some(current.document), true)
            .await
    }

    async fn maybe_decay(&self, namespace: &Namespace, key: &str) {
        let stats = match self.store.stats(namespace, key).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "decay stats lookup failed");
                return;
            }
        };
        let Some(stats) = stats else { return };
        if stats.count < self.decay_after {
            return;
        }
        info!(namespace = ?namespace, key, "decay threshold reached, summarizing");
        if let Err(e) = self.store.summarize(namespace, key).await {
            warn!(error = %e, "decay/summarization failed");
        }
    }

    pub async fn retrieve_semantic(
        &self,
        namespace: &Namespace,
        query: &str,
        top_k: usize,
        metadata_filter: Option<Value>,
    ) -> Result<Vec<SearchResult>> {
        self.store.search(namespace, query, top_k, metadata_filter).await
    }

    pub async fn save_episode(
        &self,
        namespace: &Namespace,
        key: &str,
        data: Value,
        metadata: Option<Value>,
        document: Option<Value>,
    ) -> Result<()> {
        let entry = json!({
            "value": data,
            "metadata": metadata.clone().unwrap_or_else(|| json!({})),
            "document": document.clone().unwrap_or(Value::Null),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.store.put(namespace, key, entry, metadata, document, false).await
    }

    pub async fn fetch_episodes(&self, namespace: &Namespace, keys: Option<&[String]>) -> Result<Vec<StoredItem>> {
        let mut results = Vec::new();
        match keys {
            Some(keys) => {
                for key in keys {
                    if let Some(item) = self.store.get(namespace, key, false).await? {
                        results.push(item);
                    }
                }
            }
            None => {
                for key in self.store.keys(namespace).await? {
                    if let Some(item) = self.store.get(namespace, &key, false).await? {
                        results.push(item);
                    }
                }
            }
        }
        Ok(results)
    }

    pub async fn clear_namespace(&self, namespace: &Namespace) -> Result<()> {
        self.store.clear_namespace(namespace).await
    }

    pub async fn count_namespace(&self, namespace: &Namespace) -> Result<usize> {
        self.store.count_namespace(namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;
    use crate::store::InMemoryStore;

    fn ns() -> Namespace {
        ("t1".to_string(), "memories".to_string())
    }

    fn manager() -> MemoryManager {
        let embeddings = Arc::new(DeterministicEmbeddingClient::new(32));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(Some(embeddings.clone())));
        MemoryManager::new(store, embeddings, 100)
    }

    #[tokio::test]
    async fn reward_aggregates_accumulate_since_start() {
        let manager = manager();
        let namespace = ns();
        manager.save_semantic(&namespace, "m", "t", None, None, Some(0.5)).await.unwrap();
        manager.save_semantic(&namespace, "m", "t", None, None, Some(0.25)).await.unwrap();
        let item = manager.retrieve_semantic(&namespace, "t", 5, None).await.unwrap();
        let meta = &item[0].metadata;
        assert_eq!(meta["avg_reward"], 0.375);
        assert_eq!(meta["reward_count"], 2);
    }

    #[tokio::test]
    async fn episodes_roundtrip_by_key() {
        let manager = manager();
        let namespace = ns();
        manager.save_episode(&namespace, "e1", json!({"a": 1}), None, None).await.unwrap();
        let episodes = manager.fetch_episodes(&namespace, None).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].value["value"]["a"], 1);
    }

    #[tokio::test]
    async fn fetch_episodes_by_explicit_keys() {
        let manager = manager();
        let namespace = ns();
        manager.save_episode(&namespace, "e1", json!({"a": 1}), None, None).await.unwrap();
        manager.save_episode(&namespace, "e2", json!({"a": 2}), None, None).await.unwrap();
        let episodes = manager.fetch_episodes(&namespace, Some(&["e2".to_string()])).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].value["value"]["a"], 2);
    }
}
