//! Shared data model: the session state object threaded through one
//! workflow, its append-only/reducer delta shape, and the typed-channel
//! merge rules. Lives above both the agent execution unit and the stage
//! graph since both read and produce these types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One agent invocation's contribution to `history_agents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub stage: String,
    pub role: String,
    pub output: String,
}

/// The single object threaded through one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub task: String,
    #[serde(default)]
    pub agent: Option<String>,
    pub stage: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub history_agents: Vec<HistoryEntry>,
    #[serde(default)]
    pub executed_agents_per_stage: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub rewards: HashMap<String, f64>,
    /// Transient: the router's chosen next node, consumed by edge selection.
    /// Never persisted as part of the durable record a caller inspects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_agent: Option<RouteTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RouteTarget {
    Agent(String),
    Terminal,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, task: impl Into<String>, first_stage: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task: task.into(),
            agent: None,
            stage: first_stage.into(),
            done: false,
            history_agents: Vec::new(),
            executed_agents_per_stage: HashMap::new(),
            rewards: HashMap::new(),
            next_agent: None,
        }
    }

    /// Field access for context resolution's `state` entries, by name.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "session_id" => Value::String(self.session_id.clone()),
            "task" => Value::String(self.task.clone()),
            "agent" => self.agent.clone().map(Value::String).unwrap_or(Value::Null),
            "stage" => Value::String(self.stage.clone()),
            "done" => Value::Bool(self.done),
            "history_agents" => serde_json::to_value(&self.history_agents).unwrap_or(Value::Null),
            "executed_agents_per_stage" => serde_json::to_value(&self.executed_agents_per_stage).unwrap_or(Value::Null),
            "rewards" => serde_json::to_value(&self.rewards).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn executed_in(&self, stage: &str) -> &[String] {
        self.executed_agents_per_stage.get(stage).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// A node's contribution, merged into the session state under the
/// channel-typed reducer rules below. Agents MUST NOT set `stage`,
/// `done`, or `next_agent` directly — those are router-only fields and are
/// not representable in `StateDelta` produced by an agent node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_agent: Option<RouteTarget>,
    #[serde(default)]
    pub history_agents: Vec<HistoryEntry>,
    #[serde(default)]
    pub executed_agents_per_stage: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub rewards: HashMap<String, f64>,
}

impl StateDelta {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Applies one delta's channel-typed merge onto `state`. Last-writer-wins
/// for scalar control fields, concatenation for the append-only topic,
/// per-key concatenation/sum for the two reducer channels.
pub fn merge_delta(state: &mut SessionState, delta: StateDelta) {
    if let Some(stage) = delta.stage {
        state.stage = stage;
    }
    if let Some(done) = delta.done {
        state.done = done;
    }
    if let Some(agent) = delta.agent {
        state.agent = Some(agent);
    }
    if let Some(next_agent) = delta.next_agent {
        state.next_agent = Some(next_agent);
    }
    state.history_agents.extend(delta.history_agents);
    for (stage, roles) in delta.executed_agents_per_stage {
        state.executed_agents_per_stage.entry(stage).or_default().extend(roles);
    }
    for (role, reward) in delta.rewards {
        *state.rewards.entry(role).or_insert(0.0) += reward;
    }
}
