use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};

use super::{DeterministicEmbeddingClient, EmbeddingClient, HttpEmbeddingClient};

type Factory = Box<dyn Fn(&Value) -> Result<Arc<dyn EmbeddingClient>> + Send + Sync>;

/// Compile-time provider registration: each embedding backend registers a
/// named factory up front; `providers.json` selects one by key. Unknown
/// keys fail loudly at load (`ConfigError`), never silently.
pub struct EmbeddingRegistry {
    factories: HashMap<String, Factory>,
}

impl EmbeddingRegistry {
    /// Registers the backends this crate ships with. Callers MAY register
    /// further factories with `register` before calling `build`.
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("deterministic", |cfg| {
            let dims = cfg.get("dims").and_then(|v| v.as_u64()).unwrap_or(64) as usize;
            Ok(Arc::new(DeterministicEmbeddingClient::new(dims)))
        });
        registry.register("http", |cfg| {
            let base_url = cfg
                .get("base_url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| OrchestratorError::Config("embedding provider 'http' requires base_url".into()))?;
            let api_key = cfg.get("api_key").and_then(|v| v.as_str()).unwrap_or_default();
            let model = cfg
                .get("model")
                .and_then(|v| v.as_str())
                .ok_or_else(|| OrchestratorError::Config("embedding provider 'http' requires model".into()))?;
            let dims = cfg.get("dims").and_then(|v| v.as_u64()).unwrap_or(1536) as usize;
            Ok(Arc::new(HttpEmbeddingClient::new(base_url, api_key, model, dims)))
        });
        registry
    }

    pub fn register(&mut self, kind: &str, factory: impl Fn(&Value) -> Result<Arc<dyn EmbeddingClient>> + Send + Sync + 'static) {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn build(&self, kind: &str, config: &Value) -> Result<Arc<dyn EmbeddingClient>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| OrchestratorError::Config(format!("unknown embedding provider '{kind}'")))?;
        factory(config)
    }
}

impl Default for EmbeddingRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
