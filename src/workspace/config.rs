//! Ambient configuration: the workspace manifest, the optional
//! `runtime.json` layered config, and the `providers.json` provider
//! selection (chat/embedding/store), each pointing at its own alias→config
//! file. Provider selection is resolved through the compile-time factory
//! registries in `store`/`embedding`/`model`, never by dynamic import.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::embedding::{EmbeddingClient, EmbeddingRegistry};
use crate::error::{OrchestratorError, Result};
use crate::model::{ChatModelClient, ChatModelRegistry};
use crate::store::{Store, StoreRegistry};

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl WorkspaceManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}

/// Decay/summarize thresholds, default retrieval depth, and per-call
/// timeouts, loaded from an optional `runtime.json`; every field has a
/// struct default, so a missing file (or a file that only overrides some
/// fields) is not an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub decay_after: usize,
    pub default_top_k: usize,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub reflection_queue_capacity: usize,
    pub reload_poll_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            decay_after: 50,
            default_top_k: 5,
            model_timeout_secs: 30,
            tool_timeout_secs: 30,
            reflection_queue_capacity: 64,
            reload_poll_secs: 30,
        }
    }
}

impl RuntimeConfig {
    pub fn load_optional(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| OrchestratorError::Config(e.to_string())),
            Err(_) => Ok(Self::default()),
        }
    }
}

#[derive(Deserialize)]
struct ProvidersFile {
    chat: ProviderSelection,
    embedding: ProviderSelection,
    store: ProviderSelection,
}

#[derive(Deserialize)]
struct ProviderSelection {
    provider: String,
    config_file: String,
}

fn default_providers_file() -> ProvidersFile {
    ProvidersFile {
        chat: ProviderSelection { provider: "echo".to_string(), config_file: String::new() },
        embedding: ProviderSelection { provider: "deterministic".to_string(), config_file: String::new() },
        store: ProviderSelection { provider: "memory".to_string(), config_file: String::new() },
    }
}

fn load_alias_map(workspace_root: &Path, config_file: &str) -> Result<HashMap<String, Value>> {
    if config_file.is_empty() {
        return Ok(HashMap::new());
    }
    let path = workspace_root.join(config_file);
    match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| OrchestratorError::Config(e.to_string())),
        Err(_) => Ok(HashMap::new()),
    }
}

pub struct ResolvedProviders {
    pub chat: Arc<dyn ChatModelClient>,
    pub embedding: Arc<dyn EmbeddingClient>,
    pub store: Arc<dyn Store>,
}

/// Resolves `providers.json` (or the echo/deterministic/memory defaults, if
/// absent — the deterministic test doubles double as the zero-config
/// default so a bare workspace still runs without network access) against
/// the compile-time factory registries. `default_model_timeout_secs` (from
/// `RuntimeConfig::model_timeout_secs`) fills in the `http` chat provider's
/// `timeout_secs` when its own config file doesn't set one.
pub fn resolve_providers(workspace_root: &Path, default_model_timeout_secs: u64) -> Result<ResolvedProviders> {
    let providers_path = workspace_root.join("providers.json");
    let file = match fs::read_to_string(&providers_path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| OrchestratorError::Config(e.to_string()))?,
        Err(_) => default_providers_file(),
    };

    let embedding_configs = load_alias_map(workspace_root, &file.embedding.config_file)?;
    let embedding_config = embedding_configs.get(&file.embedding.provider).cloned().unwrap_or_else(|| Value::Object(Default::default()));
    let embedding = EmbeddingRegistry::with_defaults().build(&file.embedding.provider, &embedding_config)?;

    let chat_configs = load_alias_map(workspace_root, &file.chat.config_file)?;
    let chat_config = chat_configs.get(&file.chat.provider).cloned().unwrap_or_else(|| Value::Object(Default::default()));
    let chat_config = ensure_model_field(chat_config, &file.chat.provider);
    let chat_config = ensure_timeout_field(chat_config, &file.chat.provider, default_model_timeout_secs);
    let chat = ChatModelRegistry::with_defaults().build(&file.chat.provider, &chat_config)?;

    let store_configs = load_alias_map(workspace_root, &file.store.config_file)?;
    let store_config = store_configs.get(&file.store.provider).cloned().unwrap_or_else(|| Value::Object(Default::default()));
    let store = StoreRegistry::with_defaults().build(&file.store.provider, &store_config, Some(embedding.clone()))?;

    Ok(ResolvedProviders { chat, embedding, store })
}

/// `HttpChatModel`'s config deserializes into `ModelConfig`, which requires
/// a `model` field; the `echo` provider ignores it but still goes through
/// the same deserialization path, so an absent `model` is filled in rather
/// than failing provider resolution for the zero-config default.
fn ensure_model_field(mut config: Value, provider: &str) -> Value {
    if provider != "http" {
        return config;
    }
    if let Value::Object(map) = &mut config {
        map.entry("model").or_insert_with(|| Value::String("default".to_string()));
    }
    config
}

/// Mirrors `ensure_model_field`: a provider-specific `timeout_secs` in the
/// alias config file wins, otherwise the runtime's `model_timeout_secs`
/// default is filled in so `HttpChatModel` always has a bound.
fn ensure_timeout_field(mut config: Value, provider: &str, default_timeout_secs: u64) -> Value {
    if provider != "http" {
        return config;
    }
    if let Value::Object(map) = &mut config {
        map.entry("timeout_secs").or_insert_with(|| Value::from(default_timeout_secs));
    }
    config
}
