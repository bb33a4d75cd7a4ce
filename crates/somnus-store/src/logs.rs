//! Read-only access to the agent's history and tool logs.
//!
//! Both logs are owned by the heartbeat executor and only ever appended to.
//! The history is a single JSON array rewritten in place; the tool log is
//! JSONL with one entry per line.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, StoreError};

/// Source of the two logs a digest reads.
pub trait LogSource {
    fn history(&self) -> Result<Vec<Value>>;
    fn tool_log(&self) -> Result<Vec<Value>>;
}

/// Logs read straight from the kernel's files.
#[derive(Debug, Clone)]
pub struct FileLogs {
    history_path: PathBuf,
    tool_log_path: PathBuf,
}

impl FileLogs {
    pub fn new(history_path: impl Into<PathBuf>, tool_log_path: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            tool_log_path: tool_log_path.into(),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn tool_log_path(&self) -> &Path {
        &self.tool_log_path
    }
}

/// File contents, or `None` when the file does not exist yet.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

impl LogSource for FileLogs {
    fn history(&self) -> Result<Vec<Value>> {
        let Some(text) = read_optional(&self.history_path)? else {
            return Ok(Vec::new());
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Array(messages) => Ok(messages),
            other => Err(StoreError::InvalidData(format!(
                "{} holds a JSON {}, expected an array",
                self.history_path.display(),
                json_kind(&other)
            ))),
        }
    }

    fn tool_log(&self) -> Result<Vec<Value>> {
        let Some(text) = read_optional(&self.tool_log_path)? else {
            return Ok(Vec::new());
        };
        Ok(parse_jsonl(&text))
    }
}

/// Parse JSONL, skipping blank and malformed lines.
pub fn parse_jsonl(text: &str) -> Vec<Value> {
    let mut skipped = 0usize;
    let entries: Vec<Value> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(v) => Some(v),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        tracing::warn!("skipped {skipped} malformed tool log line(s)");
    }
    entries
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logs(dir: &Path) -> FileLogs {
        FileLogs::new(dir.join("history.json"), dir.join("tool_log.jsonl"))
    }

    #[test]
    fn test_missing_files_are_empty_logs() {
        let dir = tempfile::tempdir().unwrap();
        let logs = logs(dir.path());
        assert!(logs.history().unwrap().is_empty());
        assert!(logs.tool_log().unwrap().is_empty());
    }

    #[test]
    fn test_history_array() {
        let dir = tempfile::tempdir().unwrap();
        let logs = logs(dir.path());
        let history = json!([
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": "hi"}
        ]);
        fs::write(logs.history_path(), history.to_string()).unwrap();
        let messages = logs.history().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_history_not_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let logs = logs(dir.path());
        fs::write(logs.history_path(), r#"{"role": "user"}"#).unwrap();
        let err = logs.history().unwrap_err();
        assert!(err.to_string().contains("expected an array"), "{err}");
    }

    #[test]
    fn test_history_truncated_write_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let logs = logs(dir.path());
        fs::write(logs.history_path(), r#"[{"role": "user", "con"#).unwrap();
        assert!(matches!(logs.history(), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_tool_log_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logs = logs(dir.path());
        fs::write(
            logs.tool_log_path(),
            "{\"type\":\"tool\",\"tool\":\"ls\"}\nnot json\n\n{\"type\":\"thinking\"}\n{\"trunc",
        )
        .unwrap();
        let entries = logs.tool_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["tool"], "ls");
        assert_eq!(entries[1]["type"], "thinking");
    }
}
