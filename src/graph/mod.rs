//! C9 — the stage graph: one router node, one node per registered agent
//! role, one terminal sentinel. This is the component the rest of the
//! runtime hangs off of, so its run loop is written out explicitly rather
//! than assembled from a generic graph-execution library — there is no
//! branching beyond the router's own decision: one node runs at a time,
//! no fan-out.
//!
//! Channel-typed merging lives in `crate::state::merge_delta`; this module
//! is the thing that decides, each router visit, which node produces the
//! next delta.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use crate::agent::{AgentRegistry, AgentUnit, ExternalRegistry};
use crate::error::{OrchestratorError, Result};
use crate::events::{BusEvent, EventBus};
use crate::memory::MemoryManager;
use crate::rag::ModelManager;
use crate::stage::StageRegistry;
use crate::state::{merge_delta, HistoryEntry, SessionState};
use crate::tools::{Policy, ToolClient, ToolRegistry};

/// A router decision that pre-empts the normal remaining-agents /
/// exit-condition flow. No built-in implementation beyond the no-op
/// default — a slot for external (human-in-the-loop) interrupt handling.
#[derive(Debug, Clone)]
pub enum RouterDecision {
    Agent(String),
    SkipStage,
    Terminal,
}

#[async_trait]
pub trait RouterHook: Send + Sync {
    async fn preempt(&self, state: &SessionState, remaining: &[String]) -> Option<RouterDecision>;
}

pub struct NoopRouterHook;

#[async_trait]
impl RouterHook for NoopRouterHook {
    async fn preempt(&self, _state: &SessionState, _remaining: &[String]) -> Option<RouterDecision> {
        None
    }
}

pub struct StageGraph {
    stages: Arc<StageRegistry>,
    nodes: HashMap<String, Arc<AgentUnit>>,
    hook: Arc<dyn RouterHook>,
}

impl StageGraph {
    /// Builds one agent node per role in `agents`, validates that every
    /// stage's `allowed_agents` names a role that actually exists (a missing
    /// agent fails the build), and wires each node's tool client to the
    /// role-scoped policy.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        stages: Arc<StageRegistry>,
        agents: &AgentRegistry,
        model_manager: Arc<ModelManager>,
        memory: Arc<MemoryManager>,
        tool_registry: Arc<ToolRegistry>,
        policy: Arc<Policy>,
        external: ExternalRegistry,
        bus: Arc<EventBus>,
        tool_timeout_secs: u64,
    ) -> Result<Self> {
        for stage in stages.list_stages() {
            for role in &stage.allowed_agents {
                if !agents.exists(role) {
                    return Err(OrchestratorError::Config(format!(
                        "stage '{}' allows agent '{role}' but no such agent is registered",
                        stage.name
                    )));
                }
            }
        }

        let tool_timeout = Duration::from_secs(tool_timeout_secs);
        let mut nodes = HashMap::new();
        for manifest in agents.all() {
            let tool_client = ToolClient::new(tool_registry.clone(), policy.clone(), manifest.role.clone()).with_timeout(tool_timeout);
            let unit = AgentUnit::new((**manifest).clone(), model_manager.clone(), memory.clone(), tool_client, external.clone())
                .with_bus(bus.clone());
            nodes.insert(manifest.role.clone(), Arc::new(unit));
        }

        Ok(Self { stages, nodes, hook: Arc::new(NoopRouterHook) })
    }

    pub fn with_hook(mut self, hook: Arc<dyn RouterHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Drives `state` through the graph until the terminal sentinel is
    /// reached or `done` is set. Infallible by construction — the run loop
    /// always returns a final state; internal errors are folded into the
    /// returned state as a terminal `history_agents` entry instead of
    /// propagating.
    #[instrument(skip(self, state, bus), fields(component = "stage_graph", session_id = %state.session_id))]
    pub async fn run(&self, mut state: SessionState, bus: &EventBus) -> SessionState {
        let mut current_stage_entered = String::new();
        loop {
            if state.done {
                break;
            }

            let Some(stage) = self.stages.get(&state.stage) else {
                return self.fail(state, "router", &format!("unknown stage '{}'", state.stage));
            };

            if current_stage_entered != stage.name {
                bus.publish(BusEvent::stage_enter(&state.session_id, &stage.name)).await;
                current_stage_entered = stage.name.clone();
            }

            let executed = state.executed_in(&stage.name).to_vec();
            let remaining: Vec<String> = stage.allowed_agents.iter().filter(|a| !executed.contains(a)).cloned().collect();

            if let Some(decision) = self.hook.preempt(&state, &remaining).await {
                bus.publish(BusEvent::graph_event(&state.session_id, serde_json::json!({ "hook_decision": format!("{decision:?}") }))).await;
                match decision {
                    RouterDecision::Agent(role) => {
                        state = match self.dispatch(role, state, bus).await {
                            Ok(s) => s,
                            Err((s, msg)) => return self.fail(s, "router", &msg),
                        };
                        continue;
                    }
                    RouterDecision::Terminal => {
                        state.done = true;
                        break;
                    }
                    RouterDecision::SkipStage => {
                        state = match self.advance_stage(state, stage.name.clone(), bus).await {
                            Ok(s) => s,
                            Err((s, msg)) => return self.fail(s, "router", &msg),
                        };
                        continue;
                    }
                }
            }

            if let Some(role) = remaining.first().cloned() {
                state = match self.dispatch(role, state, bus).await {
                    Ok(s) => s,
                    Err((s, msg)) => return self.fail(s, "router", &msg),
                };
                continue;
            }

            let exit = match stage.exit_condition.eval(&state) {
                Ok(v) => v,
                Err(e) => return self.fail(state, "router", &e.to_string()),
            };

            if !exit {
                // Safety branch: avoids infinite looping on a misconfigured
                // stage. Terminal without necessarily setting `done` — a
                // valid termination shape distinct from the `done` path.
                break;
            }

            state = match self.advance_stage(state, stage.name.clone(), bus).await {
                Ok(s) => s,
                Err((s, msg)) => return self.fail(s, "router", &msg),
            };
        }
        state
    }

    async fn advance_stage(&self, mut state: SessionState, stage_name: String, bus: &EventBus) -> std::result::Result<SessionState, (SessionState, String)> {
        bus.publish(BusEvent::stage_exit(&state.session_id, &stage_name)).await;
        match self.stages.next_stage(&stage_name) {
            None => {
                state.done = true;
                Ok(state)
            }
            Some(_) if self.stages.is_terminal(&stage_name) => {
                state.done = true;
                Ok(state)
            }
            Some(next) => {
                state.stage = next.name.clone();
                Ok(state)
            }
        }
    }

    async fn dispatch(&self, role: String, mut state: SessionState, bus: &EventBus) -> std::result::Result<SessionState, (SessionState, String)> {
        let Some(node) = self.nodes.get(&role) else {
            return Err((state, format!("stage routed to unregistered agent '{role}'")));
        };
        state.agent = Some(role.clone());
        match node.run(&state).await {
            Ok(delta) => {
                merge_delta(&mut state, delta);
                Ok(state)
            }
            Err(e) => {
                // ModelError/Validation propagate out of `AgentUnit::run`;
                // the graph still must not crash the process, so the
                // failure becomes a history entry and the stage is marked
                // executed so the router does not retry it forever.
                let stage_name = state.stage.clone();
                state.history_agents.push(HistoryEntry { stage: stage_name.clone(), role: role.clone(), output: format!("[agent_error] {e}") });
                state.executed_agents_per_stage.entry(stage_name).or_default().push(role);
                Ok(state)
            }
        }
    }

    fn fail(&self, mut state: SessionState, component: &str, message: &str) -> SessionState {
        state.done = true;
        state.history_agents.push(HistoryEntry { stage: state.stage.clone(), role: component.to_string(), output: format!("[error] {message}") });
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;
    use crate::model::EchoChatModel;
    use crate::store::InMemoryStore;
    use std::fs;

    fn write_agent(dir: &std::path::Path, role: &str) {
        let agent_dir = dir.join(role);
        fs::create_dir_all(&agent_dir).unwrap();
        fs::write(agent_dir.join("skill.json"), format!(r#"{{"role": "{role}", "output_mode": "text"}}"#)).unwrap();
        fs::write(agent_dir.join("prompt.md"), "Task: {task}").unwrap();
    }

    async fn build_graph(stage_json: &str, roles: &[&str]) -> (StageGraph, Arc<EventBus>) {
        let dir = tempfile::tempdir().unwrap();
        for role in roles {
            write_agent(dir.path(), role);
        }
        let agents = AgentRegistry::load(dir.path()).unwrap();
        let stages = Arc::new(StageRegistry::load_from_str(stage_json).unwrap());
        let embeddings = Arc::new(DeterministicEmbeddingClient::new(16));
        let store: Arc<dyn crate::store::Store> = Arc::new(InMemoryStore::new(Some(embeddings.clone())));
        let memory = Arc::new(MemoryManager::new(store, embeddings, 100));
        let chat: Arc<dyn crate::model::ChatModelClient> = Arc::new(EchoChatModel::default());
        let model_manager = ModelManager::new(chat, memory.clone());
        let tool_registry = Arc::new(ToolRegistry::new());
        let policy = Arc::new(Policy::from_json_str(r#"{"agents": {}}"#).unwrap());
        let bus = Arc::new(EventBus::new());
        let graph = StageGraph::build(stages, &agents, model_manager, memory, tool_registry, policy, ExternalRegistry::new(), bus.clone(), 30).unwrap();
        (graph, bus)
    }

    #[tokio::test]
    async fn single_stage_single_agent_terminates() {
        let stage_json = r#"{"stages": [
            {"name": "solo", "allowed_agents": ["a1"], "priority": 0, "terminal": true,
             "exit_condition": "len(executed_agents_per_stage.solo) == 1"}
        ]}"#;
        let (graph, bus) = build_graph(stage_json, &["a1"]).await;
        let state = SessionState::new("s1", "hello", "solo");
        let final_state = graph.run(state, &bus).await;
        assert!(final_state.done);
        assert_eq!(final_state.history_agents.len(), 1);
        assert_eq!(final_state.history_agents[0].role, "a1");
        assert_eq!(final_state.history_agents[0].stage, "solo");
    }

    #[tokio::test]
    async fn two_stage_advance_runs_agents_in_order() {
        let stage_json = r#"{"stages": [
            {"name": "ideate", "allowed_agents": ["opt", "crit"], "next_stages": ["decide"], "priority": 0, "terminal": false,
             "exit_condition": "len(executed_agents_per_stage.ideate) == 2"},
            {"name": "decide", "allowed_agents": ["synth"], "priority": 1, "terminal": true,
             "exit_condition": "len(executed_agents_per_stage.decide) == 1"}
        ]}"#;
        let (graph, bus) = build_graph(stage_json, &["opt", "crit", "synth"]).await;
        let state = SessionState::new("s1", "propose X", "ideate");
        let final_state = graph.run(state, &bus).await;
        assert!(final_state.done);
        let roles: Vec<&str> = final_state.history_agents.iter().map(|h| h.role.as_str()).collect();
        assert_eq!(roles, vec!["opt", "crit", "synth"]);
        assert_eq!(final_state.stage, "decide");
        assert_eq!(final_state.executed_agents_per_stage["ideate"], vec!["opt", "crit"]);
        assert_eq!(final_state.executed_agents_per_stage["decide"], vec!["synth"]);
    }

    #[tokio::test]
    async fn false_exit_condition_terminates_without_looping() {
        let stage_json = r#"{"stages": [
            {"name": "solo", "allowed_agents": ["a1"], "priority": 0, "terminal": false, "exit_condition": "false"}
        ]}"#;
        let (graph, bus) = build_graph(stage_json, &["a1"]).await;
        let state = SessionState::new("s1", "hello", "solo");
        let final_state = graph.run(state, &bus).await;
        assert_eq!(final_state.history_agents.len(), 1);
    }

    #[tokio::test]
    async fn trivially_true_exit_with_no_successor_sets_done_on_first_visit() {
        let stage_json = r#"{"stages": [
            {"name": "solo", "allowed_agents": ["a1"], "priority": 0, "terminal": false, "exit_condition": "true"}
        ]}"#;
        let (graph, bus) = build_graph(stage_json, &["a1"]).await;
        let state = SessionState::new("s1", "hello", "solo");
        let final_state = graph.run(state, &bus).await;
        assert!(final_state.done);
    }

    #[tokio::test]
    async fn build_fails_when_stage_allows_unregistered_agent() {
        let dir = tempfile::tempdir().unwrap();
        let agents = AgentRegistry::load(dir.path()).unwrap();
        let stages = Arc::new(
            StageRegistry::load_from_str(r#"{"stages": [{"name": "solo", "allowed_agents": ["ghost"], "priority": 0, "terminal": true}]}"#).unwrap(),
        );
        let embeddings = Arc::new(DeterministicEmbeddingClient::new(16));
        let store: Arc<dyn crate::store::Store> = Arc::new(InMemoryStore::new(Some(embeddings.clone())));
        let memory = Arc::new(MemoryManager::new(store, embeddings, 100));
        let chat: Arc<dyn crate::model::ChatModelClient> = Arc::new(EchoChatModel::default());
        let model_manager = ModelManager::new(chat, memory.clone());
        let bus = Arc::new(EventBus::new());
        let result = StageGraph::build(
            stages,
            &agents,
            model_manager,
            memory,
            Arc::new(ToolRegistry::new()),
            Arc::new(Policy::from_json_str(r#"{"agents": {}}"#).unwrap()),
            ExternalRegistry::new(),
            bus,
            30,
        );
        assert!(result.is_err());
    }
}
