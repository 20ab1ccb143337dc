//! C8 (stage half) — loads the single stage manifest, sorts stages by
//! priority, and answers the router's and graph-builder's questions about
//! them. `exit_condition` expressions are compiled once here, at load.

mod exit_condition;

pub use exit_condition::ExitCondition;

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{OrchestratorError, Result};

#[derive(Deserialize)]
struct StageFile {
    stages: Vec<StageFileEntry>,
}

#[derive(Deserialize)]
struct StageFileEntry {
    name: String,
    #[serde(default)]
    allowed_agents: Vec<String>,
    #[serde(default)]
    next_stages: Vec<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    terminal: bool,
    #[serde(default = "default_exit_condition")]
    exit_condition: String,
}

fn default_exit_condition() -> String {
    "true".to_string()
}

#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: String,
    pub allowed_agents: Vec<String>,
    pub next_stages: Vec<String>,
    pub priority: i64,
    pub terminal: bool,
    pub exit_condition: ExitCondition,
}

/// Stages sorted by `priority` ascending. `exit_condition` expressions are
/// parsed once here; evaluation happens per router visit against the live
/// session state.
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
}

impl StageRegistry {
    pub fn load_from_str(raw: &str) -> Result<Self> {
        let file: StageFile = serde_json::from_str(raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        if file.stages.is_empty() {
            return Err(OrchestratorError::Config("stage.json declares no stages".into()));
        }

        let mut stages = Vec::with_capacity(file.stages.len());
        for entry in file.stages {
            if !entry.terminal && entry.allowed_agents.is_empty() {
                return Err(OrchestratorError::RouterMisconfigured(format!(
                    "stage '{}' is non-terminal but declares no allowed_agents",
                    entry.name
                )));
            }
            let exit_condition = ExitCondition::parse(&entry.exit_condition)?;
            stages.push(StageDefinition {
                name: entry.name,
                allowed_agents: entry.allowed_agents,
                next_stages: entry.next_stages,
                priority: entry.priority,
                terminal: entry.terminal,
                exit_condition,
            });
        }
        stages.sort_by_key(|s| s.priority);

        let registry = Self { stages };
        registry.validate_successors()?;
        Ok(registry)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
        Self::load_from_str(&raw)
    }

    /// Every declared `next_stages` entry must name a stage that exists,
    /// unless the stage is terminal (in which case a successor, if any, is
    /// simply unreachable dead data, not a misconfiguration worth failing
    /// the build over).
    fn validate_successors(&self) -> Result<()> {
        for stage in &self.stages {
            for next in &stage.next_stages {
                if self.get(next).is_none() {
                    return Err(OrchestratorError::RouterMisconfigured(format!(
                        "stage '{}' names unknown successor '{next}'",
                        stage.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn list_stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn first_stage(&self) -> Option<&StageDefinition> {
        self.stages.first()
    }

    /// The first stage named in `current`'s `next_stages` that exists in
    /// this registry.
    pub fn next_stage(&self, current: &str) -> Option<&StageDefinition> {
        let stage = self.get(current)?;
        stage.next_stages.iter().find_map(|name| self.get(name))
    }

    pub fn allowed_agents(&self, name: &str) -> &[String] {
        self.get(name).map(|s| s.allowed_agents.as_slice()).unwrap_or(&[])
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.get(name).map(|s| s.terminal).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_priority_ascending() {
        let raw = r#"{"stages": [
            {"name": "b", "allowed_agents": ["x"], "priority": 2, "terminal": true},
            {"name": "a", "allowed_agents": ["x"], "priority": 1, "terminal": true}
        ]}"#;
        let registry = StageRegistry::load_from_str(raw).unwrap();
        assert_eq!(registry.list_stages()[0].name, "a");
        assert_eq!(registry.list_stages()[1].name, "b");
    }

    #[test]
    fn empty_allowed_agents_on_nonterminal_stage_fails_build() {
        let raw = r#"{"stages": [{"name": "a", "allowed_agents": [], "priority": 0, "terminal": false}]}"#;
        assert!(StageRegistry::load_from_str(raw).is_err());
    }

    #[test]
    fn unknown_successor_fails_build() {
        let raw = r#"{"stages": [
            {"name": "a", "allowed_agents": ["x"], "next_stages": ["ghost"], "priority": 0, "terminal": false, "exit_condition": "true"}
        ]}"#;
        assert!(StageRegistry::load_from_str(raw).is_err());
    }

    #[test]
    fn next_stage_resolves_first_existing_successor() {
        let raw = r#"{"stages": [
            {"name": "ideate", "allowed_agents": ["opt"], "next_stages": ["decide"], "priority": 0, "terminal": false, "exit_condition": "true"},
            {"name": "decide", "allowed_agents": ["synth"], "priority": 1, "terminal": true}
        ]}"#;
        let registry = StageRegistry::load_from_str(raw).unwrap();
        assert_eq!(registry.next_stage("ideate").unwrap().name, "decide");
    }
}
