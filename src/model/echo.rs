use async_trait::async_trait;

use crate::error::Result;

use super::{ChatModelClient, Message, Role};

/// Deterministic test double: echoes the last user message back prefixed
/// with a marker, so integration tests can assert on agent output without
/// a network call.
pub struct EchoChatModel {
    prefix: String,
}

impl EchoChatModel {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for EchoChatModel {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl ChatModelClient for EchoChatModel {
    async fn invoke(&self, messages: &[Message]) -> Result<String> {
        let last_user = messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("[{}] {}", self.prefix, last_user))
    }
}
