use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::state::SessionState;

type ExternalFn = Arc<dyn Fn(&SessionState) -> Result<Value> + Send + Sync>;

/// Compile-time registration for `external`/`computed` context functions: a
/// workspace wires up named functions once at startup, and context entries
/// refer to them by name. An unregistered name fails to resolve (logged; the
/// context entry is left `null`).
#[derive(Default, Clone)]
pub struct ExternalRegistry {
    functions: HashMap<String, ExternalFn>,
}

impl ExternalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, function: impl Fn(&SessionState) -> Result<Value> + Send + Sync + 'static) {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn call(&self, name: &str, state: &SessionState) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| OrchestratorError::Validation(format!("no external/computed function registered as '{name}'")))?;
        function(state)
    }
}
