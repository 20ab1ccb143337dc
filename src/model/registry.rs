use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};

use super::{ChatModelClient, EchoChatModel, HttpChatModel, ModelConfig};

type Factory = Box<dyn Fn(&Value) -> Result<Arc<dyn ChatModelClient>> + Send + Sync>;

/// Compile-time provider registration for chat-model backends, mirroring
/// `EmbeddingRegistry`.
pub struct ChatModelRegistry {
    factories: HashMap<String, Factory>,
}

impl ChatModelRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("echo", |cfg| {
            let prefix = cfg.get("prefix").and_then(|v| v.as_str()).unwrap_or("echo").to_string();
            Ok(Arc::new(EchoChatModel::new(prefix)))
        });
        registry.register("http", |cfg| {
            let base_url = cfg
                .get("base_url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| OrchestratorError::Config("chat provider 'http' requires base_url".into()))?;
            let api_key = cfg.get("api_key").and_then(|v| v.as_str()).unwrap_or_default();
            let model_config: ModelConfig =
                serde_json::from_value(cfg.clone()).map_err(|e| OrchestratorError::Config(e.to_string()))?;
            Ok(Arc::new(HttpChatModel::new(base_url, api_key, model_config)))
        });
        registry
    }

    pub fn register(&mut self, kind: &str, factory: impl Fn(&Value) -> Result<Arc<dyn ChatModelClient>> + Send + Sync + 'static) {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn build(&self, kind: &str, config: &Value) -> Result<Arc<dyn ChatModelClient>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| OrchestratorError::Config(format!("unknown chat model provider '{kind}'")))?;
        factory(config)
    }
}

impl Default for ChatModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
