use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Command;

use crate::error::{OrchestratorError, Result};
use crate::tools::safety::{assess_command, RiskLevel};
use crate::tools::Tool;

/// Runs a shell command. `args` must be `{"command": "..."}`. Commands
/// classified `Block` by the safety assessment fail outright; `Confirm`
/// commands run but the result is tagged so a caller can surface the risk.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::Tool("shell tool requires a 'command' string argument".into()))?
            .to_string();

        let (risk, reason) = assess_command(&command);
        if risk == RiskLevel::Block {
            return Err(OrchestratorError::Tool(format!("command blocked: {reason}")));
        }

        let result = tokio::task::spawn_blocking(move || run_command(&command))
            .await
            .map_err(|e| OrchestratorError::Tool(e.to_string()))??;

        Ok(json!({
            "exit_code": result.0,
            "output": result.1,
            "confirmed": risk == RiskLevel::Confirm,
        }))
    }
}

fn run_command(cmd: &str) -> Result<(i32, String)> {
    let output = if cfg!(target_os = "windows") {
        Command::new("powershell").args(["-NoProfile", "-Command", cmd]).output()
    } else {
        Command::new("bash").args(["-lc", cmd]).output()
    }
    .map_err(|e| OrchestratorError::Tool(e.to_string()))?;

    let mut text = String::new();
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if text.len() > 8_000 {
        let cut = text.char_indices().map(|(i, _)| i).take_while(|&i| i <= 8_000).last().unwrap_or(0);
        text.truncate(cut);
        text.push_str("\n...[truncated]");
    }
    Ok((output.status.code().unwrap_or(-1), text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_safe_command() {
        let tool = ShellTool;
        let result = tool.call(json!({"command": "echo hi"})).await.unwrap();
        assert_eq!(result["exit_code"], 0);
        assert!(result["output"].as_str().unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn blocks_sudo() {
        let tool = ShellTool;
        let err = tool.call(json!({"command": "sudo rm -rf /"})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Tool(_)));
    }
}
