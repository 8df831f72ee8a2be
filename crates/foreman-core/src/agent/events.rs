//! Decoding the agent CLI's stream-json output.
//!
//! The CLI emits one JSON object per line. Lines can be truncated or
//! interleaved when a child is killed mid-write, so the decoder isolates
//! errors per line: callers drop malformed lines and keep going.

use serde_json::Value;

/// One decoded event from the agent's output stream.
///
/// Unknown event shapes are captured as [`AgentEvent::Other`] so callers
/// can ignore them without the decoder ever failing on a valid JSON line.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Session start: the agent announces its session id and model.
    Init {
        session_id: String,
        model: Option<String>,
    },
    /// A text block from the assistant.
    AssistantText { content: String },
    /// A tool invocation, with a short human-readable input summary.
    ToolUse { name: String, input_summary: String },
    /// The final result of the invocation.
    Result {
        text: String,
        cost_usd: f64,
        is_error: bool,
        duration_ms: u64,
        session_id: Option<String>,
    },
    /// Anything else; kept raw and ignored by the engine.
    Other { raw: Value },
}

/// Decode one JSONL line into zero or more events.
///
/// A single assistant message can contain several content blocks, hence
/// the `Vec`. Returns `Err` only when the line is not valid JSON; callers
/// treat that as a warning, never an abort.
pub fn decode_line(line: &str) -> Result<Vec<AgentEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    let events = match event_type {
        "system" if value.get("subtype").and_then(Value::as_str) == Some("init") => {
            let session_id = value
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            match session_id {
                Some(session_id) => vec![AgentEvent::Init {
                    session_id,
                    model: value
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }],
                None => vec![AgentEvent::Other { raw: value }],
            }
        }

        "assistant" => {
            let mut events = Vec::new();
            let blocks = value
                .pointer("/message/content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            let text = text.trim();
                            if !text.is_empty() {
                                events.push(AgentEvent::AssistantText {
                                    content: text.to_string(),
                                });
                            }
                        }
                    }
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_string();
                        let input = block.get("input").cloned().unwrap_or(Value::Null);
                        events.push(AgentEvent::ToolUse {
                            input_summary: summarize_tool_input(&name, &input),
                            name,
                        });
                    }
                    _ => {}
                }
            }
            events
        }

        "result" => vec![AgentEvent::Result {
            text: value
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            cost_usd: value
                .get("total_cost_usd")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            is_error: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            duration_ms: value
                .get("duration_ms")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            session_id: value
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }],

        _ => vec![AgentEvent::Other { raw: value }],
    };

    Ok(events)
}

/// A short one-line summary of a tool invocation's input, per tool.
pub fn summarize_tool_input(tool_name: &str, input: &Value) -> String {
    let Some(map) = input.as_object() else {
        return String::new();
    };
    let get = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or("");

    match tool_name {
        "Bash" => truncate_for_display(get("command"), 80),
        "Read" | "Write" | "Edit" => basename(get("file_path")),
        "Grep" => {
            let pattern = truncate_for_display(get("pattern"), 50);
            let path = get("path");
            if path.is_empty() {
                pattern
            } else {
                format!("{pattern} in {}", basename(path))
            }
        }
        "Glob" => truncate_for_display(get("pattern"), 50),
        "Task" => truncate_for_display(get("description"), 50),
        "WebFetch" => {
            let url = get("url");
            let host = url.split_once("://").map_or(url, |(_, rest)| {
                rest.split('/').next().unwrap_or(rest)
            });
            truncate_for_display(host, 50)
        }
        "WebSearch" => truncate_for_display(get("query"), 50),
        _ => {
            // First meaningful value wins.
            for key in ["description", "pattern", "query", "command", "file_path", "path"] {
                let value = get(key);
                if !value.is_empty() {
                    return truncate_for_display(value, 50);
                }
            }
            String::new()
        }
    }
}

/// Flatten newlines and cap the text at `max_chars` characters for
/// single-line terminal display.
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
