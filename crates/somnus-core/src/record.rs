//! Rendering log records into the text a summarizer sees.
//!
//! Records are kept as raw JSON values. The logs belong to the agent runtime
//! and their shape drifts; a record we cannot interpret still occupies its
//! slot so cursor offsets stay aligned with the file.

use serde::Serialize;
use serde_json::Value;

use crate::digest::{Chunk, LogKind};

const LIST_CONTENT_LIMIT: usize = 2000;
const CONTENT_LIMIT: usize = 3000;
const ARGS_LIMIT: usize = 500;
const RESULT_LIMIT: usize = 800;
const THINKING_LIMIT: usize = 800;

/// A chunk resolved to text, ready for the summarizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkText {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub label: &'static str,
    pub text: String,
}

impl ChunkText {
    /// Render `records`, which must be the slice the chunk points at.
    pub fn render(chunk: Chunk, records: &[Value]) -> Self {
        let text = match chunk.log {
            LogKind::History => render_history(records),
            LogKind::ToolLog => render_tool_log(records),
        };
        Self {
            chunk,
            label: chunk.label(),
            text,
        }
    }
}

fn truncate_chars(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn field_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Plain text for strings, compact JSON for everything else.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `[role] content` per message.
pub fn render_history(records: &[Value]) -> String {
    records
        .iter()
        .map(|msg| {
            let role = field_str(msg, "role").unwrap_or("?");
            let content = match msg.get("content") {
                Some(Value::Array(_)) => {
                    let json = msg["content"].to_string();
                    truncate_chars(&json, LIST_CONTENT_LIMIT).to_string()
                }
                Some(v) => display_value(v),
                None => String::new(),
            };
            format!("[{role}] {}", truncate_chars(&content, CONTENT_LIMIT))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per tool call, thought, or earlier digest. Unknown entry types
/// are left out of the text.
pub fn render_tool_log(records: &[Value]) -> String {
    records
        .iter()
        .filter_map(|entry| {
            let ts = field_str(entry, "ts").unwrap_or("?");
            match field_str(entry, "type")? {
                "tool" => {
                    let tool = field_str(entry, "tool").unwrap_or("?");
                    let args = entry
                        .get("args")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default()))
                        .to_string();
                    let result = entry.get("result").map(display_value).unwrap_or_default();
                    Some(format!(
                        "[{ts}] {tool}({}) → {}",
                        truncate_chars(&args, ARGS_LIMIT),
                        truncate_chars(&result, RESULT_LIMIT)
                    ))
                }
                "thinking" => {
                    let text = entry.get("text").map(display_value).unwrap_or_default();
                    Some(format!(
                        "[{ts}] THINKING: {}",
                        truncate_chars(&text, THINKING_LIMIT)
                    ))
                }
                "digest" => {
                    let len = entry
                        .get("learnings_length")
                        .map(display_value)
                        .unwrap_or_else(|| "?".to_string());
                    Some(format!("[{ts}] DIGEST: updated learnings ({len} chars)"))
                }
                _ => None,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ChunkKind;
    use serde_json::json;

    #[test]
    fn test_history_lines() {
        let records = vec![
            json!({"role": "user", "content": "hello"}),
            json!({"role": "assistant", "content": [{"type": "text", "text": "hi"}]}),
            json!({"content": 42}),
        ];
        let text = render_history(&records);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "[user] hello");
        assert!(lines[1].starts_with("[assistant] [{"));
        assert_eq!(lines[2], "[?] 42");
    }

    #[test]
    fn test_history_truncates_long_content() {
        let long = "é".repeat(5000);
        let text = render_history(&[json!({"role": "user", "content": long})]);
        assert_eq!(text.chars().count(), "[user] ".chars().count() + CONTENT_LIMIT);
    }

    #[test]
    fn test_tool_log_lines() {
        let records = vec![
            json!({"type": "tool", "ts": "2026-01-01 10:00:00", "tool": "read_file", "args": {"path": "a.md"}, "result": "ok"}),
            json!({"type": "thinking", "ts": "2026-01-01 10:00:01", "text": "hmm"}),
            json!({"type": "digest", "learnings_length": 120}),
            json!({"type": "unknown"}),
            json!({"no_type": true}),
        ];
        let text = render_tool_log(&records);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "[2026-01-01 10:00:00] read_file({\"path\":\"a.md\"}) → ok"
        );
        assert_eq!(lines[1], "[2026-01-01 10:00:01] THINKING: hmm");
        assert_eq!(lines[2], "[?] DIGEST: updated learnings (120 chars)");
    }

    #[test]
    fn test_tool_without_args_renders_empty_object() {
        let text = render_tool_log(&[json!({"type": "tool", "tool": "ls"})]);
        assert_eq!(text, "[?] ls({}) → ");
    }

    #[test]
    fn test_chunk_text_label_and_flattened_json() {
        let chunk = Chunk {
            log: LogKind::ToolLog,
            kind: ChunkKind::Replay,
            offset: 20,
            len: 1,
        };
        let rendered = ChunkText::render(chunk, &[json!({"type": "thinking", "text": "x"})]);
        assert_eq!(rendered.label, "replay_tool_activity");
        let json = serde_json::to_value(&rendered).unwrap();
        assert_eq!(json["offset"], 20);
        assert_eq!(json["log"], "tool_log");
        assert_eq!(json["kind"], "replay");
        assert_eq!(json["label"], "replay_tool_activity");
    }
}
