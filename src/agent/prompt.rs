use std::collections::HashMap;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Substitutes `{name}` placeholders in `template` with `resolved` values
/// (rendered as plain text for strings, compact JSON otherwise). A
/// placeholder with no matching resolved entry fails the invocation.
pub fn render(template: &str, resolved: &HashMap<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + end];
                if is_identifier(name) {
                    let value = resolved
                        .get(name)
                        .ok_or_else(|| OrchestratorError::Validation(format!("missing placeholder '{{{name}}}' in prompt template")))?;
                    out.push_str(&stringify(value));
                    i += end + 2;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let mut resolved = HashMap::new();
        resolved.insert("task".to_string(), Value::String("propose X".to_string()));
        let out = render("Task: {task}", &resolved).unwrap();
        assert_eq!(out, "Task: propose X");
    }

    #[test]
    fn missing_placeholder_fails() {
        let resolved = HashMap::new();
        let err = render("Task: {task}", &resolved).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn braces_around_non_identifiers_pass_through() {
        let resolved = HashMap::new();
        let out = render("{\"a\": 1}", &resolved).unwrap();
        assert_eq!(out, "{\"a\": 1}");
    }
}
