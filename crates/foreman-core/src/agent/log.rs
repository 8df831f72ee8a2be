//! Worker log parsing.
//!
//! A worker's merged stdout+stderr is appended to a log file while the
//! process runs, so readers must tolerate a live-growing file and a
//! truncated final line (the child may be killed mid-write).

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::events::{AgentEvent, decode_line};

/// Everything extracted from a worker log so far.
///
/// `events` holds the displayable timeline (init, text, tool use); the
/// final `result` event is folded into the completion fields instead.
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub events: Vec<AgentEvent>,
    pub is_complete: bool,
    pub is_error: bool,
    pub result_text: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

impl ParsedLog {
    fn apply(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Init { ref session_id, ref model } => {
                self.session_id = Some(session_id.clone());
                self.model = model.clone();
                self.events.push(event);
            }
            AgentEvent::AssistantText { .. } | AgentEvent::ToolUse { .. } => {
                self.events.push(event);
            }
            AgentEvent::Result {
                text,
                cost_usd,
                is_error,
                duration_ms,
                session_id,
            } => {
                self.is_complete = true;
                self.is_error = is_error;
                self.result_text = text;
                self.cost_usd = cost_usd;
                self.duration_ms = duration_ms;
                if session_id.is_some() {
                    self.session_id = session_id;
                }
            }
            AgentEvent::Other { .. } => {}
        }
    }
}

/// Parse a whole log file from the beginning.
///
/// Missing files and malformed lines yield an empty / partial result; this
/// never fails, because the engine calls it on logs in every state from
/// untouched to SIGKILL-truncated.
pub fn parse_log_file(path: &Path) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    let Ok(content) = std::fs::read_to_string(path) else {
        return parsed;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode_line(line) {
            Ok(events) => {
                for event in events {
                    parsed.apply(event);
                }
            }
            Err(err) => debug!(error = %err, "skipping malformed log line"),
        }
    }
    parsed
}

/// Incremental reader over a growing log file.
///
/// Keeps a monotonic byte offset and only ever consumes complete lines:
/// a partial line at end-of-file stays unread until its newline arrives,
/// so repeated calls with no intervening writes return nothing.
#[derive(Debug)]
pub struct LogCursor {
    path: PathBuf,
    offset: u64,
}

impl LogCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decode the events appended since the last call.
    pub fn read_new_events(&mut self) -> Vec<AgentEvent> {
        let Ok(mut file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return Vec::new();
        }
        let mut buf = Vec::new();
        if file.read_to_end(&mut buf).is_err() {
            return Vec::new();
        }

        // Only consume up to the last complete line.
        let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let consumed = &buf[..=end];
        self.offset += consumed.len() as u64;

        let text = String::from_utf8_lossy(consumed);
        let mut events = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match decode_line(line) {
                Ok(decoded) => events.extend(decoded),
                Err(err) => debug!(error = %err, "skipping malformed log line"),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"s-1","model":"m"}"#;
    const TEXT: &str =
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"working"}]}}"#;
    const TOOL: &str = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{"command":"make"}}]}}"#;
    const RESULT: &str = r#"{"type":"result","result":"done","total_cost_usd":0.01,"is_error":false,"duration_ms":5,"session_id":"s-1"}"#;

    fn write_log(dir: &TempDir, lines: &[&str]) -> PathBuf {
        let path = dir.path().join("worker.log");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    #[test]
    fn parses_a_complete_log() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, &[INIT, TEXT, TOOL, RESULT]);
        let parsed = parse_log_file(&path);
        assert_eq!(parsed.session_id.as_deref(), Some("s-1"));
        assert_eq!(parsed.model.as_deref(), Some("m"));
        assert_eq!(parsed.events.len(), 3); // init + text + tool
        assert!(parsed.is_complete);
        assert!(!parsed.is_error);
        assert_eq!(parsed.result_text, "done");
        assert_eq!(parsed.cost_usd, 0.01);
    }

    #[test]
    fn missing_file_parses_to_empty() {
        let dir = TempDir::new().unwrap();
        let parsed = parse_log_file(&dir.path().join("nope.log"));
        assert!(parsed.events.is_empty());
        assert!(!parsed.is_complete);
    }

    #[test]
    fn truncated_tail_is_dropped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        let content = format!("{INIT}\n{TEXT}\n{{\"type\":\"result\",\"resu");
        std::fs::write(&path, content).unwrap();
        let parsed = parse_log_file(&path);
        assert_eq!(parsed.session_id.as_deref(), Some("s-1"));
        assert_eq!(parsed.events.len(), 2);
        assert!(!parsed.is_complete);
    }

    #[test]
    fn cursor_reads_incrementally_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, format!("{INIT}\n")).unwrap();

        let mut cursor = LogCursor::new(&path);
        assert_eq!(cursor.read_new_events().len(), 1);
        // No new writes: nothing to read, offset unchanged.
        let offset = cursor.offset();
        assert!(cursor.read_new_events().is_empty());
        assert_eq!(cursor.offset(), offset);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{TOOL}").unwrap();
        assert_eq!(cursor.read_new_events().len(), 1);
    }

    #[test]
    fn cursor_waits_for_the_newline_of_a_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, format!("{TEXT}\n{{\"type\":\"assist")).unwrap();

        let mut cursor = LogCursor::new(&path);
        assert_eq!(cursor.read_new_events().len(), 1);

        // Complete the partial line; it becomes readable only now.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "ant\",\"message\":{{\"content\":[{{\"type\":\"text\",\"text\":\"tail\"}}]}}}}\n")
            .unwrap();
        let events = cursor.read_new_events();
        assert_eq!(
            events,
            vec![AgentEvent::AssistantText {
                content: "tail".to_string()
            }]
        );
    }

    #[test]
    fn cursor_on_missing_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        let mut cursor = LogCursor::new(dir.path().join("nope.log"));
        assert!(cursor.read_new_events().is_empty());
        assert_eq!(cursor.offset(), 0);
    }
}
