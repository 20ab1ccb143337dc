//! C11 — workspace hub & runtime manager: the process-wide entry point that
//! discovers workspaces on disk, builds (and caches) one runtime per
//! workspace, and hands out one orchestrator per session within it.

mod config;

pub use config::{RuntimeConfig, WorkspaceManifest};

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentRegistry, ExternalRegistry};
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::graph::StageGraph;
use crate::memory::MemoryManager;
use crate::orchestrator::Orchestrator;
use crate::rag::ModelManager;
use crate::stage::StageRegistry;
use crate::state::SessionState;
use crate::tools::{Policy, ToolRegistry, WebSearchTool, ShellTool};

/// Per-workspace singleton: owns the agent/stage registries, the compiled
/// graph, the reload manager, and a `session_id -> orchestrator` map.
/// Registries and graph are read-only after a build; `reload` swaps the
/// whole set atomically so in-flight sessions finish against the registry
/// they started with.
pub struct RuntimeManager {
    pub workspace_root: PathBuf,
    pub manifest: WorkspaceManifest,
    pub config: RuntimeConfig,
    bus: Arc<EventBus>,
    model_manager: Arc<ModelManager>,
    memory: Arc<MemoryManager>,
    tool_registry: Arc<ToolRegistry>,
    external: ExternalRegistry,
    agent_registry: RwLock<Arc<AgentRegistry>>,
    stage_registry: RwLock<Arc<StageRegistry>>,
    policy: RwLock<Arc<Policy>>,
    graph: RwLock<Arc<StageGraph>>,
    sessions: Mutex<HashMap<String, Arc<Orchestrator>>>,
    artifact_hash: Mutex<u64>,
}

impl RuntimeManager {
    pub async fn load(workspace_root: PathBuf) -> Result<Arc<Self>> {
        let manifest = WorkspaceManifest::load(&workspace_root.join("workspace.json"))?;
        let config = RuntimeConfig::load_optional(&workspace_root.join("runtime.json"))?;

        let providers = config::resolve_providers(&workspace_root, config.model_timeout_secs)?;
        let memory = Arc::new(MemoryManager::new(providers.store, providers.embedding, config.decay_after));
        let model_manager = ModelManager::with_queue_capacity(providers.chat, memory.clone(), config.reflection_queue_capacity);

        let mut tool_registry = ToolRegistry::new();
        tool_registry.register("shell", Arc::new(ShellTool));
        tool_registry.register("web_search", Arc::new(WebSearchTool::new()));
        if let Ok(raw) = std::fs::read_to_string(workspace_root.join("tools.json")) {
            tool_registry.apply_catalog_str(&raw)?;
        }
        let tool_registry = Arc::new(tool_registry);

        let agent_registry = AgentRegistry::load(&workspace_root.join("agents"))?;
        let stage_registry = Arc::new(StageRegistry::load_from_file(&workspace_root.join("stage.json"))?);
        let policy = Arc::new(load_policy(&workspace_root)?);
        let bus = Arc::new(EventBus::new());
        let external = ExternalRegistry::new();

        let graph = StageGraph::build(
            stage_registry.clone(),
            &agent_registry,
            model_manager.clone(),
            memory.clone(),
            tool_registry.clone(),
            policy.clone(),
            external.clone(),
            bus.clone(),
            config.tool_timeout_secs,
        )?;

        let artifact_hash = compute_artifact_hash(&workspace_root)?;

        Ok(Arc::new(Self {
            workspace_root,
            manifest,
            config,
            bus,
            model_manager,
            memory,
            tool_registry,
            external,
            agent_registry: RwLock::new(Arc::new(agent_registry)),
            stage_registry: RwLock::new(stage_registry),
            policy: RwLock::new(policy),
            graph: RwLock::new(Arc::new(graph)),
            sessions: Mutex::new(HashMap::new()),
            artifact_hash: Mutex::new(artifact_hash),
        }))
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    async fn get_or_create_orchestrator(&self, session_id: &str) -> Arc<Orchestrator> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(session_id) {
            return existing.clone();
        }
        let graph = self.graph.read().await.clone();
        let orchestrator = Arc::new(Orchestrator::new(graph, self.bus.clone()));
        sessions.insert(session_id.to_string(), orchestrator.clone());
        orchestrator
    }

    /// `create_session` + initial-state construction + dispatch: the
    /// workspace's single session entry point. Generates a fresh session id
    /// when none is supplied.
    pub async fn run_user_message(&self, message: &str, session_id: Option<String>, verbose: bool) -> Result<SessionState> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let first_stage = self
            .stage_registry
            .read()
            .await
            .first_stage()
            .map(|s| s.name.clone())
            .ok_or_else(|| OrchestratorError::RouterMisconfigured("workspace declares no stages".into()))?;

        if verbose {
            info!(session_id = %session_id, stage = %first_stage, "starting session");
        }

        let initial_state = SessionState::new(session_id.clone(), message, first_stage);
        let orchestrator = self.get_or_create_orchestrator(&session_id).await;
        Ok(orchestrator.run(initial_state).await)
    }

    /// Rebuilds the agent/stage registries, policy, and graph from disk if
    /// any workspace artifact has changed since the last (re)build, and
    /// swaps them in atomically. A reload whose artifacts are unchanged is
    /// a no-op — the cached graph is not rebuilt.
    pub async fn reload(&self) -> Result<bool> {
        let new_hash = compute_artifact_hash(&self.workspace_root)?;
        let mut hash_guard = self.artifact_hash.lock().await;
        if *hash_guard == new_hash {
            return Ok(false);
        }

        let agent_registry = AgentRegistry::load(&self.workspace_root.join("agents"))?;
        let stage_registry = Arc::new(StageRegistry::load_from_file(&self.workspace_root.join("stage.json"))?);
        let policy = Arc::new(load_policy(&self.workspace_root)?);
        let graph = StageGraph::build(
            stage_registry.clone(),
            &agent_registry,
            self.model_manager.clone(),
            self.memory.clone(),
            self.tool_registry.clone(),
            policy.clone(),
            self.external.clone(),
            self.bus.clone(),
            self.config.tool_timeout_secs,
        )?;

        *self.agent_registry.write().await = Arc::new(agent_registry);
        *self.stage_registry.write().await = stage_registry;
        *self.policy.write().await = policy;
        *self.graph.write().await = Arc::new(graph);
        *hash_guard = new_hash;
        info!(workspace = %self.manifest.name, "workspace artifacts changed, graph reloaded");
        Ok(true)
    }

    /// Spawns a background task that calls `reload` every
    /// `config.reload_poll_secs` seconds. Failures are logged, not
    /// propagated — a transiently broken artifact just means the previous
    /// graph keeps serving.
    pub fn spawn_reload_poller(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.reload_poll_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.reload().await {
                    warn!(error = %e, "workspace reload failed");
                }
            }
        })
    }
}

fn load_policy(workspace_root: &Path) -> Result<Policy> {
    let path = workspace_root.join("tools_policy.json");
    match std::fs::read_to_string(&path) {
        Ok(raw) => Policy::from_json_str(&raw),
        Err(_) => Policy::from_json_str(r#"{"agents": {}}"#),
    }
}

/// Hashes the content of every artifact the graph was built from: the three
/// top-level manifests plus every file under `agents/`. Cheap process-local
/// change detection — not a cryptographic digest, just enough to tell the
/// reload poller whether anything moved.
fn compute_artifact_hash(workspace_root: &Path) -> Result<u64> {
    let mut hasher = DefaultHasher::new();
    for name in ["workspace.json", "stage.json", "tools_policy.json", "runtime.json", "providers.json", "tools.json"] {
        if let Ok(contents) = std::fs::read(workspace_root.join(name)) {
            contents.hash(&mut hasher);
        }
    }
    let agents_dir = workspace_root.join("agents");
    if let Ok(mut entries) = std::fs::read_dir(&agents_dir).map(|rd| rd.filter_map(|e| e.ok()).collect::<Vec<_>>()) {
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            for file in ["skill.json", "context.json", "prompt.md", "schema.json"] {
                if let Ok(contents) = std::fs::read(entry.path().join(file)) {
                    contents.hash(&mut hasher);
                }
            }
        }
    }
    Ok(hasher.finish())
}

/// Process-wide singleton: discovers workspaces under a root directory (one
/// directory per workspace, each with its own `workspace.json`) and caches
/// one `RuntimeManager` per workspace name.
pub struct WorkspaceHub {
    root: PathBuf,
    runtimes: Mutex<HashMap<String, Arc<RuntimeManager>>>,
}

impl WorkspaceHub {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), runtimes: Mutex::new(HashMap::new()) }
    }

    pub async fn runtime_for(&self, workspace_name: &str) -> Result<Arc<RuntimeManager>> {
        if let Some(existing) = self.runtimes.lock().await.get(workspace_name) {
            return Ok(existing.clone());
        }
        let runtime = RuntimeManager::load(self.root.join(workspace_name)).await?;
        self.runtimes.lock().await.insert(workspace_name.to_string(), runtime.clone());
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_minimal_workspace(root: &Path) {
        fs::write(root.join("workspace.json"), r#"{"name": "demo"}"#).unwrap();
        fs::write(
            root.join("stage.json"),
            r#"{"stages": [{"name": "solo", "allowed_agents": ["a1"], "priority": 0, "terminal": true, "exit_condition": "len(executed_agents_per_stage.solo) == 1"}]}"#,
        )
        .unwrap();
        fs::write(root.join("tools_policy.json"), r#"{"agents": {"a1": {"tools": []}}}"#).unwrap();
        let agent_dir = root.join("agents").join("a1");
        fs::create_dir_all(&agent_dir).unwrap();
        fs::write(agent_dir.join("skill.json"), r#"{"role": "a1", "output_mode": "text"}"#).unwrap();
        fs::write(agent_dir.join("prompt.md"), "Task: {task}").unwrap();
    }

    #[tokio::test]
    async fn loads_workspace_and_runs_a_message() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_workspace(dir.path());
        let manager = RuntimeManager::load(dir.path().to_path_buf()).await.unwrap();
        let state = manager.run_user_message("hello", None, false).await.unwrap();
        assert!(state.done);
        assert_eq!(state.history_agents.len(), 1);
    }

    #[tokio::test]
    async fn reload_without_changes_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_workspace(dir.path());
        let manager = RuntimeManager::load(dir.path().to_path_buf()).await.unwrap();
        assert!(!manager.reload().await.unwrap());
    }

    #[tokio::test]
    async fn reload_picks_up_a_changed_stage_file() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_workspace(dir.path());
        let manager = RuntimeManager::load(dir.path().to_path_buf()).await.unwrap();
        fs::write(
            dir.path().join("stage.json"),
            r#"{"stages": [{"name": "solo", "allowed_agents": ["a1"], "priority": 0, "terminal": true, "exit_condition": "true"}]}"#,
        )
        .unwrap();
        assert!(manager.reload().await.unwrap());
    }

    #[tokio::test]
    async fn hub_caches_runtime_per_workspace_name() {
        let root = tempfile::tempdir().unwrap();
        let ws = root.path().join("demo");
        fs::create_dir_all(&ws).unwrap();
        write_minimal_workspace(&ws);
        let hub = WorkspaceHub::new(root.path().to_path_buf());
        let first = hub.runtime_for("demo").await.unwrap();
        let second = hub.runtime_for("demo").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
