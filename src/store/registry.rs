use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::embedding::EmbeddingClient;
use crate::error::{OrchestratorError, Result};

use super::{CacheStore, FileStore, InMemoryStore, Store};

const DEFAULT_CACHE_TTL_SECS: u64 = 300;

type Factory = Box<dyn Fn(&Value, Option<Arc<dyn EmbeddingClient>>) -> Result<Arc<dyn Store>> + Send + Sync>;

/// Compile-time provider registration for store backends, mirroring
/// `EmbeddingRegistry`/`ChatModelRegistry`. `providers.json` selects a store
/// by alias; the embedding client it's built with comes from the workspace's
/// resolved embedding provider, not the store's own config.
pub struct StoreRegistry {
    factories: HashMap<String, Factory>,
}

impl StoreRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("memory", |_cfg, embeddings| Ok(Arc::new(InMemoryStore::new(embeddings))));
        registry.register("file", |cfg, embeddings| {
            let root = cfg
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| OrchestratorError::Config("store provider 'file' requires root".into()))?;
            Ok(Arc::new(FileStore::new(root, embeddings)))
        });
        registry.register("redis", |cfg, embeddings| {
            let ttl_secs = cfg.get("ttl_secs").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_CACHE_TTL_SECS);
            Ok(Arc::new(CacheStore::new(Duration::from_secs(ttl_secs), embeddings)))
        });
        registry
    }

    pub fn register(&mut self, kind: &str, factory: impl Fn(&Value, Option<Arc<dyn EmbeddingClient>>) -> Result<Arc<dyn Store>> + Send + Sync + 'static) {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn build(&self, kind: &str, config: &Value, embeddings: Option<Arc<dyn EmbeddingClient>>) -> Result<Arc<dyn Store>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| OrchestratorError::Config(format!("unknown store provider '{kind}'")))?;
        factory(config, embeddings)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;

    #[tokio::test]
    async fn builds_in_memory_store_by_alias() {
        let registry = StoreRegistry::with_defaults();
        let embeddings: Arc<dyn EmbeddingClient> = Arc::new(DeterministicEmbeddingClient::new(8));
        let store = registry.build("memory", &serde_json::json!({}), Some(embeddings)).unwrap();
        store.put(&("t".into(), "b".into()), "k", serde_json::json!({"text": "x"}), None, None, false).await.unwrap();
        assert!(store.get(&("t".into(), "b".into()), "k", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn builds_redis_style_cache_store_by_alias() {
        let registry = StoreRegistry::with_defaults();
        let store = registry.build("redis", &serde_json::json!({"ttl_secs": 60}), None).unwrap();
        store.put(&("t".into(), "b".into()), "k", serde_json::json!({"text": "x"}), None, None, false).await.unwrap();
        assert!(store.get(&("t".into(), "b".into()), "k", false).await.unwrap().is_some());
    }

    #[test]
    fn unknown_provider_kind_fails_loudly() {
        let registry = StoreRegistry::with_defaults();
        assert!(registry.build("ghost", &serde_json::json!({}), None).is_err());
    }
}
