//! C8 (agent half) — scans `<workspace>/agents/<role>/` for a manifest per
//! directory and caches them for the lifetime of the workspace's runtime
//! manager, until `reload_all` is called.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::error::{OrchestratorError, Result};

use super::manifest::AgentManifest;

pub struct AgentRegistry {
    agents_dir: PathBuf,
    agents: HashMap<String, Arc<AgentManifest>>,
}

impl AgentRegistry {
    /// Scans `agents_dir` for one subdirectory per agent role and loads each
    /// manifest. A directory without a `skill.json` is skipped rather than
    /// failing the whole registry — only a malformed manifest is fatal.
    pub fn load(agents_dir: &Path) -> Result<Self> {
        let mut agents = HashMap::new();
        let entries = fs::read_dir(agents_dir)
            .map_err(|e| OrchestratorError::Config(format!("{}: {e}", agents_dir.display())))?;

        for entry in entries {
            let entry = entry.map_err(|e| OrchestratorError::Config(e.to_string()))?;
            let path = entry.path();
            if !path.is_dir() || !path.join("skill.json").exists() {
                continue;
            }
            let manifest = AgentManifest::load_from_dir(&path)?;
            if agents.insert(manifest.role.clone(), Arc::new(manifest)).is_some() {
                warn!(role = %entry.file_name().to_string_lossy(), "duplicate agent role, overwriting");
            }
        }

        Ok(Self { agents_dir: agents_dir.to_path_buf(), agents })
    }

    pub fn get(&self, role: &str) -> Option<Arc<AgentManifest>> {
        self.agents.get(role).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<AgentManifest>> {
        self.agents.values()
    }

    pub fn roles(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn exists(&self, role: &str) -> bool {
        self.agents.contains_key(role)
    }

    /// Reloads every manifest from disk, replacing the in-memory set. The
    /// caller (the reload manager) is responsible for atomically swapping
    /// the registry this belongs to — this method mutates `self` in place
    /// once the new set is fully loaded.
    pub fn reload_all(&mut self) -> Result<()> {
        let reloaded = Self::load(&self.agents_dir)?;
        self.agents = reloaded.agents;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_agent(dir: &Path, role: &str) {
        let agent_dir = dir.join(role);
        fs::create_dir_all(&agent_dir).unwrap();
        fs::write(agent_dir.join("skill.json"), format!(r#"{{"role": "{role}", "output_mode": "text"}}"#)).unwrap();
        fs::write(agent_dir.join("prompt.md"), "Task: {task}").unwrap();
    }

    #[test]
    fn loads_one_agent_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "opt");
        write_agent(dir.path(), "crit");
        let registry = AgentRegistry::load(dir.path()).unwrap();
        assert!(registry.exists("opt"));
        assert!(registry.exists("crit"));
        assert_eq!(registry.roles().len(), 2);
    }

    #[test]
    fn reload_picks_up_new_agents() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "opt");
        let mut registry = AgentRegistry::load(dir.path()).unwrap();
        assert!(!registry.exists("crit"));
        write_agent(dir.path(), "crit");
        registry.reload_all().unwrap();
        assert!(registry.exists("crit"));
    }
}
