use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

use super::{ChatModelClient, Message, ModelConfig, Role};

/// Used when a provider config omits `timeout_secs`, matching
/// `RuntimeConfig::model_timeout_secs`'s default.
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 30;

/// Chat model client over an OpenAI/GLM-compatible `/chat/completions`
/// endpoint, streaming or not.
pub struct HttpChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    config: ModelConfig,
}

impl HttpChatModel {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, config: ModelConfig) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), api_key: api_key.into(), config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS))
    }
}

fn timed_out() -> OrchestratorError {
    OrchestratorError::Model("model call timed out (retryable)".into())
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        })
        .collect()
}

#[async_trait]
impl ChatModelClient for HttpChatModel {
    async fn invoke(&self, messages: &[Message]) -> Result<String> {
        let body = ApiRequest {
            model: self.config.model.clone(),
            messages: to_api_messages(messages),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: None,
        };
        let timeout = self.timeout();

        let resp = tokio::time::timeout(
            timeout,
            self.client
                .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| OrchestratorError::Model(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = tokio::time::timeout(timeout, resp.text()).await.map_err(|_| timed_out())?.unwrap_or_default();
            return Err(OrchestratorError::Model(format!("API error {status}: {text}")));
        }

        let parsed: ApiResponse =
            tokio::time::timeout(timeout, resp.json()).await.map_err(|_| timed_out())?.map_err(|e| OrchestratorError::Model(e.to_string()))?;
        let text = parsed.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default();
        if text.is_empty() {
            return Err(OrchestratorError::Model("API returned empty content".into()));
        }
        Ok(text)
    }

    async fn stream(&self, messages: &[Message]) -> Result<BoxStream<'static, Result<String>>> {
        let body = ApiRequest {
            model: self.config.model.clone(),
            messages: to_api_messages(messages),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: Some(true),
        };
        let timeout = self.timeout();

        let mut resp = tokio::time::timeout(
            timeout,
            self.client
                .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| OrchestratorError::Model(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = tokio::time::timeout(timeout, resp.text()).await.map_err(|_| timed_out())?.unwrap_or_default();
            return Err(OrchestratorError::Model(format!("API error {status}: {text}")));
        }

        let pending = String::new();
        let stream = futures::stream::unfold((resp, pending), move |(mut resp, mut pending)| async move {
            loop {
                if let Some((frame, rest)) = split_next_frame(&pending) {
                    pending = rest;
                    if let Some(text) = parse_sse_frame(&frame) {
                        return Some((Ok(text), (resp, pending)));
                    }
                    continue;
                }
                match tokio::time::timeout(timeout, resp.chunk()).await {
                    Ok(Ok(Some(chunk))) => {
                        pending.push_str(&String::from_utf8_lossy(&chunk));
                        continue;
                    }
                    Ok(Ok(None)) => return None,
                    Ok(Err(e)) => return Some((Err(OrchestratorError::Model(e.to_string())), (resp, pending))),
                    Err(_) => return Some((Err(timed_out()), (resp, pending))),
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

fn split_next_frame(pending: &str) -> Option<(String, String)> {
    let pos = pending.find("\n\n")?;
    Some((pending[..pos].to_string(), pending[pos + 2..].to_string()))
}

fn parse_sse_frame(frame: &str) -> Option<String> {
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<StreamEvent>(data) else { continue };
        if let Some(text) = event.choices.into_iter().next().and_then(|c| c.delta.content).filter(|t| !t.is_empty()) {
            return Some(text);
        }
    }
    None
}
