use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::memory::MemoryManager;
use crate::store::Namespace;
use crate::state::SessionState;

use super::external::ExternalRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Semantic,
    Episodic,
}

/// A tagged union of context-entry variants. Each variant carries its own
/// typed parameters; resolution is one method per variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEntrySpec {
    State {
        name: String,
        #[serde(default)]
        key: Option<String>,
    },
    Memory {
        name: String,
        memory_type: MemoryKind,
        #[serde(default)]
        key: Option<String>,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    TextToSql {
        name: String,
        #[serde(default)]
        query_template: Option<String>,
    },
    External {
        name: String,
        function: String,
    },
    Computed {
        name: String,
        function: String,
    },
    Text {
        name: String,
        value: String,
    },
}

fn default_top_k() -> usize {
    5
}

impl ContextEntrySpec {
    pub fn name(&self) -> &str {
        match self {
            ContextEntrySpec::State { name, .. }
            | ContextEntrySpec::Memory { name, .. }
            | ContextEntrySpec::TextToSql { name, .. }
            | ContextEntrySpec::External { name, .. }
            | ContextEntrySpec::Computed { name, .. }
            | ContextEntrySpec::Text { name, .. } => name,
        }
    }
}

/// Runtime inputs a context entry resolves against.
pub struct ResolveContext<'a> {
    pub state: &'a SessionState,
    pub namespace: &'a Namespace,
    pub memory: &'a MemoryManager,
    pub external: &'a ExternalRegistry,
}

/// Resolves one context entry. Failures are logged and the entry resolves
/// to `Value::Null`; other entries still resolve.
pub async fn resolve_entry(entry: &ContextEntrySpec, ctx: &ResolveContext<'_>) -> Value {
    match try_resolve(entry, ctx).await {
        Ok(value) => value,
        Err(e) => {
            warn!(entry = entry.name(), error = %e, "context entry failed to resolve");
            Value::Null
        }
    }
}

async fn try_resolve(entry: &ContextEntrySpec, ctx: &ResolveContext<'_>) -> Result<Value> {
    match entry {
        ContextEntrySpec::State { key, name } => Ok(ctx.state.field(key.as_deref().unwrap_or(name))),
        ContextEntrySpec::Memory { memory_type, key, top_k, name } => match memory_type {
            MemoryKind::Semantic => {
                let results = ctx.memory.retrieve_semantic(ctx.namespace, &ctx.state.task, *top_k, None).await?;
                Ok(serde_json::to_value(results).unwrap_or(Value::Null))
            }
            MemoryKind::Episodic => {
                let key = key.clone().unwrap_or_else(|| name.clone());
                let episodes = ctx.memory.fetch_episodes(ctx.namespace, Some(&[key])).await?;
                Ok(episodes.into_iter().next().map(|item| item.value).unwrap_or(Value::Null))
            }
        },
        ContextEntrySpec::TextToSql { .. } => {
            Err(OrchestratorError::NotSupported("text_to_sql context resolution".into()))
        }
        ContextEntrySpec::External { function, .. } | ContextEntrySpec::Computed { function, .. } => {
            ctx.external.call(function, ctx.state)
        }
        ContextEntrySpec::Text { value, .. } => Ok(Value::String(value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;
    use crate::store::{InMemoryStore, Store};
    use std::sync::Arc;

    fn memory() -> MemoryManager {
        let embeddings = Arc::new(DeterministicEmbeddingClient::new(16));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(Some(embeddings.clone())));
        MemoryManager::new(store, embeddings, 100)
    }

    #[tokio::test]
    async fn state_entry_resolves_named_field() {
        let state = SessionState::new("s1", "hello", "solo");
        let memory = memory();
        let namespace = ("s1".to_string(), "solo".to_string());
        let external = ExternalRegistry::new();
        let ctx = ResolveContext { state: &state, namespace: &namespace, memory: &memory, external: &external };
        let entry = ContextEntrySpec::State { name: "task".to_string(), key: None };
        let value = resolve_entry(&entry, &ctx).await;
        assert_eq!(value, Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn text_to_sql_resolves_to_null_and_is_logged() {
        let state = SessionState::new("s1", "hello", "solo");
        let memory = memory();
        let namespace = ("s1".to_string(), "solo".to_string());
        let external = ExternalRegistry::new();
        let ctx = ResolveContext { state: &state, namespace: &namespace, memory: &memory, external: &external };
        let entry = ContextEntrySpec::TextToSql { name: "q".to_string(), query_template: None };
        let value = resolve_entry(&entry, &ctx).await;
        assert_eq!(value, Value::Null);
    }
}
