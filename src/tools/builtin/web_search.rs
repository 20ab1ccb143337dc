use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{OrchestratorError, Result};
use crate::tools::Tool;

const DEFAULT_SEARCH_URL: &str = "https://api.bocha.cn/v1/web-search";
const MAX_RESULT_CHARS: usize = 8_000;

/// Web search tool. `args` is `{"query": "..."}`. Requires `WEB_SEARCH_API_KEY`
/// in the environment; `base_url` defaults to the Bocha search endpoint but
/// can be overridden for a different provider with the same request shape.
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), base_url: DEFAULT_SEARCH_URL.to_string() }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::Tool("web_search requires a 'query' string argument".into()))?;

        let api_key = std::env::var("WEB_SEARCH_API_KEY")
            .map_err(|_| OrchestratorError::Tool("WEB_SEARCH_API_KEY environment variable not set".into()))?;

        let body = json!({ "query": query, "summary": true, "freshness": "noLimit", "count": 10 });

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::Tool(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::Tool(format!("search API error {status}: {text}")));
        }

        let parsed: Value = resp.json().await.map_err(|e| OrchestratorError::Tool(e.to_string()))?;
        let mut output = format_results(&parsed, query);
        if output.len() > MAX_RESULT_CHARS {
            let cut = output.char_indices().map(|(i, _)| i).take_while(|&i| i <= MAX_RESULT_CHARS).last().unwrap_or(0);
            output.truncate(cut);
            output.push_str("\n...[truncated]");
        }
        Ok(json!({ "output": output }))
    }
}

fn format_results(json: &Value, query: &str) -> String {
    let mut out = format!("Web search results for: \"{query}\"\n\n");

    if let Some(summary) = json.get("data").and_then(|d| d.get("summary")).and_then(|s| s.as_str()).filter(|s| !s.is_empty()) {
        out.push_str("Summary:\n");
        out.push_str(summary);
        out.push_str("\n\n");
    }

    if let Some(items) = json.get("data").and_then(|d| d.get("webPages")).and_then(|w| w.get("value")).and_then(|v| v.as_array())
    {
        out.push_str("Results:\n");
        for (i, item) in items.iter().take(5).enumerate() {
            let title = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
            out.push_str(&format!("{}. {}\n   {}\n   {}\n\n", i + 1, title, url, snippet));
        }
    }

    out
}
