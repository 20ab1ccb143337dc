//! C3 — Chat model client: turns a list of role-tagged messages into a
//! completion, pluggable behind one shape.

mod echo;
mod http;
mod registry;

pub use echo::EchoChatModel;
pub use http::HttpChatModel;
pub use registry::ChatModelRegistry;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Model identifier, sampling parameters, and endpoint — the configuration a
/// chat-model client is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

#[async_trait]
pub trait ChatModelClient: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<String>;

    /// Streams the completion as a sequence of text chunks. The default
    /// implementation falls back to a single chunk from `invoke`; streaming
    /// backends override this.
    async fn stream(&self, messages: &[Message]) -> Result<BoxStream<'static, Result<String>>> {
        let text = self.invoke(messages).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}
