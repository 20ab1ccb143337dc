//! C6 — Tool gateway: registry + policy + client.

mod builtin;
pub mod safety;

pub use builtin::{ShellTool, WebSearchTool};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{OrchestratorError, Result};

/// Used when a `ToolClient` is built without an explicit `with_timeout`,
/// matching `RuntimeConfig::tool_timeout_secs`'s default.
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub name: String,
    pub description: String,
    pub entrypoint: String,
    pub spec: Value,
}

#[derive(Deserialize)]
struct ToolCatalogFile {
    #[serde(default)]
    tools: Vec<ToolCatalogEntry>,
}

#[derive(Deserialize)]
struct ToolCatalogEntry {
    name: String,
    description: String,
    entrypoint: String,
    #[serde(default)]
    spec: Value,
}

/// Maps tool name → a compile-time-registered instance. The catalog JSON
/// only supplies descriptive metadata (description, entrypoint label, spec)
/// for tools this process already has a registered implementation for —
/// there is no dynamic module loading. A catalog entry with no matching
/// registered tool fails at load (`ConfigError`).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolRecord, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builtin tool instance under `name` before the catalog is
    /// applied. The registry starts with a placeholder record; `apply_catalog`
    /// fills in the descriptive fields.
    pub fn register(&mut self, name: &str, tool: Arc<dyn Tool>) {
        let record = ToolRecord { name: name.to_string(), description: String::new(), entrypoint: name.to_string(), spec: Value::Null };
        self.tools.insert(name.to_string(), (record, tool));
    }

    pub fn apply_catalog_str(&mut self, raw: &str) -> Result<()> {
        let catalog: ToolCatalogFile = serde_json::from_str(raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        for entry in catalog.tools {
            let Some((record, _)) = self.tools.get_mut(&entry.name) else {
                return Err(OrchestratorError::Config(format!(
                    "tool catalog references '{}' but no implementation is registered",
                    entry.name
                )));
            };
            record.description = entry.description;
            record.entrypoint = entry.entrypoint;
            record.spec = entry.spec;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|(_, tool)| tool.clone())
    }

    pub fn record(&self, name: &str) -> Option<&ToolRecord> {
        self.tools.get(name).map(|(record, _)| record)
    }

    pub fn list(&self) -> Vec<&ToolRecord> {
        self.tools.values().map(|(record, _)| record).collect()
    }
}

/// `{role -> allowed tool names}`, loaded from `tools_policy.json`.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    allowed: HashMap<String, HashSet<String>>,
}

#[derive(Deserialize)]
struct PolicyFile {
    agents: HashMap<String, PolicyAgentEntry>,
}

#[derive(Deserialize)]
struct PolicyAgentEntry {
    #[serde(default)]
    tools: Vec<String>,
}

impl Policy {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: PolicyFile = serde_json::from_str(raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        let allowed = file.agents.into_iter().map(|(role, entry)| (role, entry.tools.into_iter().collect())).collect();
        Ok(Self { allowed })
    }

    pub fn check(&self, role: &str, tool: &str) -> bool {
        self.allowed.get(role).map(|tools| tools.contains(tool)).unwrap_or(false)
    }
}

/// Policy-checked dispatch for one agent role.
pub struct ToolClient {
    registry: Arc<ToolRegistry>,
    policy: Arc<Policy>,
    role: String,
    timeout: Duration,
}

impl ToolClient {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<Policy>, role: impl Into<String>) -> Self {
        Self { registry, policy, role: role.into(), timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS) }
    }

    /// Overrides the per-call timeout applied in `call`, sourced from
    /// `RuntimeConfig::tool_timeout_secs` when the graph builds this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether `tool_name` is in this client's role's allowed list. Callers
    /// that need to distinguish "denied, don't even emit a tool_call event"
    /// from "granted" (the stage graph's tool dispatch) check this before
    /// calling `call`.
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.policy.check(&self.role, tool_name)
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// A denied call is logged and returns an empty JSON object rather than
    /// erroring — agents treat denial the same as tool absence. An unknown
    /// tool name is a hard error. A tool-internal failure propagates to the
    /// agent.
    pub async fn call(&self, tool_name: &str, args: Value) -> Result<Value> {
        if !self.policy.check(&self.role, tool_name) {
            warn!(role = %self.role, tool = tool_name, "tool denied by policy");
            return Ok(Value::Object(Default::default()));
        }
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| OrchestratorError::Tool(format!("unknown tool '{tool_name}'")))?;
        match tokio::time::timeout(self.timeout, tool.call(args)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Tool(format!("tool '{tool_name}' timed out (retryable)"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        async fn call(&self, args: Value) -> Result<Value> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn denied_tool_returns_empty_result_not_error() {
        let mut registry = ToolRegistry::new();
        registry.register("book_flight", Arc::new(EchoTool));
        let policy = Policy::from_json_str(r#"{"agents": {"opt": {"tools": ["web_search"]}}}"#).unwrap();
        let client = ToolClient::new(Arc::new(registry), Arc::new(policy), "opt");
        let result = client.call("book_flight", serde_json::json!({})).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let policy = Policy::from_json_str(r#"{"agents": {"opt": {"tools": ["ghost"]}}}"#).unwrap();
        let client = ToolClient::new(Arc::new(registry), Arc::new(policy), "opt");
        let err = client.call("ghost", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Tool(_)));
    }

    #[tokio::test]
    async fn granted_tool_runs() {
        let mut registry = ToolRegistry::new();
        registry.register("web_search", Arc::new(EchoTool));
        let policy = Policy::from_json_str(r#"{"agents": {"opt": {"tools": ["web_search"]}}}"#).unwrap();
        let client = ToolClient::new(Arc::new(registry), Arc::new(policy), "opt");
        let result = client.call("web_search", serde_json::json!({"q": "x"})).await.unwrap();
        assert_eq!(result["q"], "x");
    }

    struct HangingTool;

    #[async_trait]
    impl Tool for HangingTool {
        async fn call(&self, _args: Value) -> Result<Value> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn call_times_out_on_a_hung_tool() {
        let mut registry = ToolRegistry::new();
        registry.register("slow", Arc::new(HangingTool));
        let policy = Policy::from_json_str(r#"{"agents": {"opt": {"tools": ["slow"]}}}"#).unwrap();
        let client = ToolClient::new(Arc::new(registry), Arc::new(policy), "opt").with_timeout(Duration::from_millis(20));
        let err = client.call("slow", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Tool(msg) if msg.contains("timed out")));
    }
}
