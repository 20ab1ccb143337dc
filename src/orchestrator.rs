//! C10 — one orchestrator per session, driving that session's state through
//! the workspace's compiled stage graph and narrating the run on the event
//! bus.

use std::sync::Arc;

use tracing::instrument;

use crate::events::{BusEvent, EventBus};
use crate::graph::StageGraph;
use crate::state::SessionState;

pub struct Orchestrator {
    graph: Arc<StageGraph>,
    bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(graph: Arc<StageGraph>, bus: Arc<EventBus>) -> Self {
        Self { graph, bus }
    }

    /// Runs `initial_state` to termination and returns the final state.
    /// This never fails outright — the graph itself folds internal errors
    /// into the returned state rather than propagating them, so the
    /// orchestrator's only job here is bracketing the run with its two
    /// bus events.
    #[instrument(skip(self, initial_state), fields(component = "orchestrator", session_id = %initial_state.session_id))]
    pub async fn run(&self, initial_state: SessionState) -> SessionState {
        let session_id = initial_state.session_id.clone();
        self.bus.publish(BusEvent::orchestrator_start(&session_id)).await;
        let final_state = self.graph.run(initial_state, &self.bus).await;
        self.bus.publish(BusEvent::orchestrator_end(&session_id)).await;
        final_state
    }
}
