use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

use super::context::ContextEntrySpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolTrigger {
    pub name: String,
    #[serde(default = "default_trigger")]
    pub trigger: String,
}

fn default_trigger() -> String {
    "always".to_string()
}

#[derive(Deserialize)]
struct SkillFile {
    role: String,
    output_mode: OutputMode,
    #[serde(default)]
    tools: Vec<ToolTrigger>,
}

#[derive(Deserialize)]
struct ContextFile {
    #[serde(default)]
    context: Vec<ContextEntrySpec>,
}

/// Static, loaded-once-per-workspace description of one agent role:
/// `<workspace>/agents/<role>/{skill.json, context.json, prompt.md, schema.json?}`.
#[derive(Debug, Clone)]
pub struct AgentManifest {
    pub role: String,
    pub output_mode: OutputMode,
    pub tools: Vec<ToolTrigger>,
    pub context_schema: Vec<ContextEntrySpec>,
    pub prompt_template: String,
    pub output_schema: Option<Value>,
}

impl AgentManifest {
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let skill_path = dir.join("skill.json");
        let skill_raw = fs::read_to_string(&skill_path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {e}", skill_path.display())))?;
        let skill: SkillFile = serde_json::from_str(&skill_raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;

        let context_path = dir.join("context.json");
        let context_schema = match fs::read_to_string(&context_path) {
            Ok(raw) => {
                let file: ContextFile = serde_json::from_str(&raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;
                file.context
            }
            Err(_) => Vec::new(),
        };

        let prompt_path = dir.join("prompt.md");
        let prompt_template = fs::read_to_string(&prompt_path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {e}", prompt_path.display())))?;

        let schema_path = dir.join("schema.json");
        let output_schema = match fs::read_to_string(&schema_path) {
            Ok(raw) => Some(serde_json::from_str(&raw).map_err(|e| OrchestratorError::Config(e.to_string()))?),
            Err(_) => None,
        };

        if skill.role != dir.file_name().and_then(|n| n.to_str()).unwrap_or_default() {
            return Err(OrchestratorError::Config(format!(
                "agent manifest role '{}' does not match its directory name",
                skill.role
            )));
        }

        Ok(Self {
            role: skill.role,
            output_mode: skill.output_mode,
            tools: skill.tools,
            context_schema,
            prompt_template,
            output_schema,
        })
    }
}
