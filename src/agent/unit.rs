use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::error::Result;
use crate::events::{BusEvent, EventBus};
use crate::memory::MemoryManager;
use crate::rag::ModelManager;
use crate::state::{HistoryEntry, SessionState, StateDelta};
use crate::store::Namespace;
use crate::tools::ToolClient;

use super::context::{resolve_entry, ResolveContext};
use super::external::ExternalRegistry;
use super::manifest::{AgentManifest, OutputMode};
use super::prompt;

/// One invocation of one agent within one stage. Stateless across
/// invocations — all state lives in the session object and memory.
pub struct AgentUnit {
    pub manifest: AgentManifest,
    model_manager: Arc<ModelManager>,
    memory: Arc<MemoryManager>,
    tool_client: ToolClient,
    external: ExternalRegistry,
    bus: Option<Arc<EventBus>>,
}

impl AgentUnit {
    pub fn new(manifest: AgentManifest, model_manager: Arc<ModelManager>, memory: Arc<MemoryManager>, tool_client: ToolClient, external: ExternalRegistry) -> Self {
        Self { manifest, model_manager, memory, tool_client, external, bus: None }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    #[instrument(skip(self, state), fields(component = "agent", role = %self.manifest.role, stage = %state.stage))]
    pub async fn run(&self, state: &SessionState) -> Result<StateDelta> {
        let namespace: Namespace = (state.session_id.clone(), format!("{}:{}", state.stage, self.manifest.role));

        if let Some(bus) = &self.bus {
            bus.publish(BusEvent::agent_start(&state.session_id, &self.manifest.role, &state.stage)).await;
        }

        let result = self.run_inner(state, &namespace).await;

        if let Some(bus) = &self.bus {
            match &result {
                Ok(_) => bus.publish(BusEvent::agent_done(&state.session_id, &self.manifest.role, &state.stage)).await,
                Err(e) => bus.publish(BusEvent::agent_error(&state.session_id, &self.manifest.role, &state.stage, &e.to_string())).await,
            }
        }

        result
    }

    async fn run_inner(&self, state: &SessionState, namespace: &Namespace) -> Result<StateDelta> {
        let resolve_ctx = ResolveContext { state, namespace, memory: &self.memory, external: &self.external };
        let mut resolved = HashMap::new();
        for entry in &self.manifest.context_schema {
            let value = resolve_entry(entry, &resolve_ctx).await;
            resolved.insert(entry.name().to_string(), value);
        }

        let prompt_text = prompt::render(&self.manifest.prompt_template, &resolved)?;

        let completion = self.model_manager.generate(&prompt_text, Some(namespace), Some(serde_json::to_value(state)?), 5, None).await?;

        let mut output_text = completion.clone();
        if self.manifest.output_mode == OutputMode::Json {
            if let Some(schema) = &self.manifest.output_schema {
                match validate_json_output(&completion, schema) {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(role = %self.manifest.role, error = %e, "agent output failed schema validation");
                        output_text = "{}".to_string();
                        if let Some(bus) = &self.bus {
                            bus.publish(BusEvent::agent_error(&state.session_id, &self.manifest.role, &state.stage, &e.to_string())).await;
                        }
                    }
                }
            }
        }

        for trigger in &self.manifest.tools {
            if trigger.trigger != "always" {
                continue;
            }
            if !self.tool_client.is_allowed(&trigger.name) {
                warn!(role = %self.manifest.role, tool = %trigger.name, "tool denied by policy");
                continue;
            }
            if let Some(bus) = &self.bus {
                bus.publish(BusEvent::tool_call(&state.session_id, &self.manifest.role, &trigger.name)).await;
            }
            match self.tool_client.call(&trigger.name, serde_json::json!({ "output": output_text, "state": state })).await {
                Ok(_) => {
                    if let Some(bus) = &self.bus {
                        bus.publish(BusEvent::tool_result(&state.session_id, &self.manifest.role, &trigger.name)).await;
                    }
                }
                Err(e) => {
                    warn!(tool = %trigger.name, error = %e, "tool call failed");
                    if let Some(bus) = &self.bus {
                        bus.publish(BusEvent::tool_failed(&state.session_id, &self.manifest.role, &trigger.name, &e.to_string())).await;
                    }
                }
            }
        }

        Ok(StateDelta {
            history_agents: vec![HistoryEntry { stage: state.stage.clone(), role: self.manifest.role.clone(), output: output_text }],
            executed_agents_per_stage: HashMap::from([(state.stage.clone(), vec![self.manifest.role.clone()])]),
            ..StateDelta::empty()
        })
    }
}

/// Extracts the first JSON object from model output and validates it
/// against the agent's declared schema. Returns a typed error rather than
/// panicking — the caller decides what to do with a validation failure.
fn validate_json_output(output: &str, schema: &Value) -> Result<()> {
    let first_object = extract_first_json_object(output)
        .ok_or_else(|| crate::error::OrchestratorError::Validation("no JSON object found in model output".into()))?;
    let parsed: Value = serde_json::from_str(&first_object).map_err(|e| crate::error::OrchestratorError::Validation(e.to_string()))?;
    let validator = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| crate::error::OrchestratorError::Config(format!("invalid output schema: {e}")))?;
    validator
        .validate(&parsed)
        .map_err(|errors| crate::error::OrchestratorError::Validation(errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ")))
}

fn extract_first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_balanced_json_object() {
        let text = "here is the answer: {\"idea\": \"x\"} trailing text";
        let obj = extract_first_json_object(text).unwrap();
        assert_eq!(obj, r#"{"idea": "x"}"#);
    }

    #[test]
    fn no_object_returns_none() {
        assert!(extract_first_json_object("not json at all").is_none());
    }

    #[test]
    fn validates_against_schema() {
        let schema = serde_json::json!({"type": "object", "required": ["idea"]});
        assert!(validate_json_output("{\"idea\": \"x\"}", &schema).is_ok());
        assert!(validate_json_output("not json at all", &schema).is_err());
    }
}
