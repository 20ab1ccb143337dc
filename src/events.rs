//! Event bus: the minimum event vocabulary the orchestrator, stage graph,
//! and agent unit emit as a session runs. Subscribers are awaited to
//! completion in publish order — the bus does not fan events out
//! concurrently and does not deduplicate, so subscribers MUST be
//! idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OrchestratorStart,
    OrchestratorEnd,
    GraphEvent,
    AgentStart,
    AgentDone,
    AgentError,
    ToolCall,
    ToolResult,
    ToolFailed,
    RewardAssigned,
    StageEnter,
    StageExit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrchestratorStart => "orchestrator_start",
            EventKind::OrchestratorEnd => "orchestrator_end",
            EventKind::GraphEvent => "graph_event",
            EventKind::AgentStart => "agent_start",
            EventKind::AgentDone => "agent_done",
            EventKind::AgentError => "agent_error",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::ToolFailed => "tool_failed",
            EventKind::RewardAssigned => "reward_assigned",
            EventKind::StageEnter => "stage_enter",
            EventKind::StageExit => "stage_exit",
        }
    }
}

/// One bus event. Every kind carries at minimum the session id and the name
/// of the component that emitted it; `detail` holds whatever else that
/// component wants to attach.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub kind: EventKind,
    pub session_id: String,
    pub component: String,
    pub detail: Value,
}

impl BusEvent {
    pub fn new(kind: EventKind, session_id: impl Into<String>, component: impl Into<String>, detail: Value) -> Self {
        Self { kind, session_id: session_id.into(), component: component.into(), detail }
    }

    pub fn orchestrator_start(session_id: &str) -> Self {
        Self::new(EventKind::OrchestratorStart, session_id, "orchestrator", json!({}))
    }

    pub fn orchestrator_end(session_id: &str) -> Self {
        Self::new(EventKind::OrchestratorEnd, session_id, "orchestrator", json!({}))
    }

    pub fn stage_enter(session_id: &str, stage: &str) -> Self {
        Self::new(EventKind::StageEnter, session_id, "router", json!({ "stage": stage }))
    }

    pub fn stage_exit(session_id: &str, stage: &str) -> Self {
        Self::new(EventKind::StageExit, session_id, "router", json!({ "stage": stage }))
    }

    pub fn graph_event(session_id: &str, detail: Value) -> Self {
        Self::new(EventKind::GraphEvent, session_id, "router", detail)
    }

    pub fn agent_start(session_id: &str, role: &str, stage: &str) -> Self {
        Self::new(EventKind::AgentStart, session_id, "agent", json!({ "role": role, "stage": stage }))
    }

    pub fn agent_done(session_id: &str, role: &str, stage: &str) -> Self {
        Self::new(EventKind::AgentDone, session_id, "agent", json!({ "role": role, "stage": stage }))
    }

    pub fn agent_error(session_id: &str, role: &str, stage: &str, error: &str) -> Self {
        Self::new(EventKind::AgentError, session_id, "agent", json!({ "role": role, "stage": stage, "error": error }))
    }

    pub fn tool_call(session_id: &str, role: &str, tool: &str) -> Self {
        Self::new(EventKind::ToolCall, session_id, "tool_gateway", json!({ "role": role, "tool": tool }))
    }

    pub fn tool_result(session_id: &str, role: &str, tool: &str) -> Self {
        Self::new(EventKind::ToolResult, session_id, "tool_gateway", json!({ "role": role, "tool": tool }))
    }

    pub fn tool_failed(session_id: &str, role: &str, tool: &str, error: &str) -> Self {
        Self::new(EventKind::ToolFailed, session_id, "tool_gateway", json!({ "role": role, "tool": tool, "error": error }))
    }

    pub fn reward_assigned(session_id: &str, role: &str, reward: f64) -> Self {
        Self::new(EventKind::RewardAssigned, session_id, "memory_manager", json!({ "role": role, "reward": reward }))
    }
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn handle(&self, event: &BusEvent);
}

/// Shared, subscribe-many event bus. `publish` awaits each subscriber in
/// registration order before returning: subscribers run to completion before
/// the next event is dispatched.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().await.push(subscriber);
    }

    pub async fn publish(&self, event: BusEvent) {
        let subscribers = self.subscribers.read().await.clone();
        for subscriber in subscribers {
            subscriber.handle(&event).await;
        }
    }
}

/// Test/debug subscriber that records every event it sees, in order.
#[derive(Default)]
pub struct RecordingSubscriber {
    events: tokio::sync::Mutex<Vec<BusEvent>>,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn events(&self) -> Vec<BusEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, kind: EventKind) -> usize {
        self.events.lock().await.iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    async fn handle(&self, event: &BusEvent) {
        self.events.lock().await.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = EventBus::new();
        let recorder = RecordingSubscriber::new();
        bus.subscribe(recorder.clone()).await;
        bus.publish(BusEvent::orchestrator_start("s1")).await;
        bus.publish(BusEvent::orchestrator_end("s1")).await;
        let events = recorder.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::OrchestratorStart);
        assert_eq!(events[1].kind, EventKind::OrchestratorEnd);
    }
}
