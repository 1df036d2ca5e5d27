//! Incremental classification of streamed reviewer output.
//!
//! Structured reviewers emit newline-delimited JSON events on stdout.
//! The probe reads only the bytes appended since its last poll, holds
//! back any unterminated trailing fragment until the next read (agents
//! flush mid-line), and sorts each complete event into "progress" or
//! "final" so the supervisor can tell thinking from answering. Lines
//! that fail to parse are skipped; interleaved garbage is expected.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output format a reviewer command emits on stdout.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Plain text; no event classification is possible.
    #[default]
    Generic,
    /// Codex CLI `exec --json` output (thread/turn/item events).
    CodexJson,
    /// Claude CLI `--output-format stream-json` output.
    ClaudeStreamJson,
}

impl ProbeKind {
    pub fn is_structured(self) -> bool {
        !matches!(self, ProbeKind::Generic)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProbeKind::Generic => "generic",
            ProbeKind::CodexJson => "codex_json",
            ProbeKind::ClaudeStreamJson => "claude_stream_json",
        })
    }
}

/// In-flight work vs. a terminal answer or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Progress,
    Final,
}

/// Per-invocation probe cursor and counters.
///
/// Created when the subprocess is spawned, discarded when it exits.
#[derive(Debug, Default)]
pub struct ProbeState {
    offset: u64,
    tail: String,
    pub progress_count: u64,
    pub final_count: u64,
    pub last_progress: Option<String>,
    pub last_final: Option<String>,
}

impl ProbeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly appended stdout bytes through the classifier.
    ///
    /// Reads from `stdout_path` starting at the saved byte offset; an
    /// unterminated trailing fragment is kept and prepended on the next
    /// call, so events split across flushes are still counted exactly
    /// once. A no-op for [`ProbeKind::Generic`].
    pub fn update(&mut self, kind: ProbeKind, stdout_path: &Path) {
        if !kind.is_structured() {
            return;
        }
        let Some(chunk) = self.read_new_chunk(stdout_path) else {
            return;
        };
        if chunk.is_empty() {
            return;
        }

        let text = format!("{}{}", self.tail, chunk);
        self.tail.clear();

        let mut rest = text.as_str();
        while let Some(pos) = rest.find('\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];
            self.classify_line(kind, line);
        }
        self.tail = rest.to_string();
    }

    fn classify_line(&mut self, kind: ProbeKind, line: &str) {
        let line = line.trim();
        if !line.starts_with('{') {
            return;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            return;
        };
        match classify(kind, &event) {
            Some((EventKind::Progress, label)) => {
                self.progress_count += 1;
                self.last_progress = Some(label);
            }
            Some((EventKind::Final, label)) => {
                self.final_count += 1;
                self.last_final = Some(label);
            }
            None => {}
        }
    }

    fn read_new_chunk(&mut self, path: &Path) -> Option<String> {
        let mut file = File::open(path).ok()?;
        file.seek(SeekFrom::Start(self.offset)).ok()?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).ok()?;
        self.offset += buf.len() as u64;
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Classify one parsed event into progress/final with a display label.
///
/// Returns `None` for non-objects and objects without a `type` tag.
pub fn classify(kind: ProbeKind, event: &Value) -> Option<(EventKind, String)> {
    if !event.is_object() {
        return None;
    }
    match kind {
        ProbeKind::Generic => None,
        ProbeKind::CodexJson => classify_codex(event),
        ProbeKind::ClaudeStreamJson => classify_claude(event),
    }
}

fn classify_codex(event: &Value) -> Option<(EventKind, String)> {
    let top = event.get("type")?.as_str()?;
    match top {
        "thread.started" | "turn.started" | "item.started" => {
            Some((EventKind::Progress, compact_label(top)))
        }
        "turn.completed" | "thread.completed" | "error" | "turn.failed" => {
            Some((EventKind::Final, compact_label(top)))
        }
        "item.completed" => {
            let Some(item_type) = event
                .get("item")
                .and_then(|item| item.get("type"))
                .and_then(Value::as_str)
            else {
                return Some((EventKind::Progress, "item.completed".to_string()));
            };
            let kind = match item_type {
                "agent_message" | "assistant_message" => EventKind::Final,
                _ => EventKind::Progress,
            };
            Some((kind, format!("item.{}", compact_label(item_type))))
        }
        // Unknown top-level types count as progress: the stream is alive.
        other => Some((EventKind::Progress, compact_label(other))),
    }
}

fn classify_claude(event: &Value) -> Option<(EventKind, String)> {
    let top = event.get("type")?.as_str()?;
    match top {
        "result" | "assistant" => Some((EventKind::Final, compact_label(top))),
        "system" => {
            let label = event.get("subtype").and_then(Value::as_str).map_or_else(
                || "system".to_string(),
                |subtype| format!("system.{subtype}"),
            );
            Some((EventKind::Progress, compact_label(&label)))
        }
        "stream_event" => {
            let Some(event_type) = event
                .get("event")
                .and_then(|nested| nested.get("type"))
                .and_then(Value::as_str)
            else {
                return Some((EventKind::Progress, "stream_event".to_string()));
            };
            let kind = if event_type == "message_stop" {
                EventKind::Final
            } else {
                EventKind::Progress
            };
            Some((kind, compact_label(&format!("stream.{event_type}"))))
        }
        other => Some((EventKind::Progress, compact_label(other))),
    }
}

const LABEL_MAX_BYTES: usize = 80;

fn re_whitespace() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\s+").unwrap())
}

/// Normalize an event label for compact heartbeat output.
fn compact_label(label: &str) -> String {
    let collapsed = re_whitespace().replace_all(label.trim(), " ");
    truncate_safe(&collapsed, LABEL_MAX_BYTES).to_string()
}

/// Truncate at a valid UTF-8 char boundary.
fn truncate_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn codex(json: &str) -> Option<(EventKind, String)> {
        classify(ProbeKind::CodexJson, &serde_json::from_str(json).unwrap())
    }

    fn claude(json: &str) -> Option<(EventKind, String)> {
        classify(
            ProbeKind::ClaudeStreamJson,
            &serde_json::from_str(json).unwrap(),
        )
    }

    #[test]
    fn codex_lifecycle_events() {
        assert_eq!(
            codex(r#"{"type": "thread.started"}"#),
            Some((EventKind::Progress, "thread.started".to_string()))
        );
        assert_eq!(
            codex(r#"{"type": "turn.completed"}"#),
            Some((EventKind::Final, "turn.completed".to_string()))
        );
        assert_eq!(
            codex(r#"{"type": "turn.failed"}"#),
            Some((EventKind::Final, "turn.failed".to_string()))
        );
        // Permissive default: unknown types still prove liveness
        assert_eq!(
            codex(r#"{"type": "token.usage"}"#),
            Some((EventKind::Progress, "token.usage".to_string()))
        );
    }

    #[test]
    fn codex_completed_items_split_by_nested_type() {
        assert_eq!(
            codex(r#"{"type": "item.completed", "item": {"type": "reasoning"}}"#),
            Some((EventKind::Progress, "item.reasoning".to_string()))
        );
        assert_eq!(
            codex(r#"{"type": "item.completed", "item": {"type": "tool_call"}}"#),
            Some((EventKind::Progress, "item.tool_call".to_string()))
        );
        assert_eq!(
            codex(r#"{"type": "item.completed", "item": {"type": "agent_message"}}"#),
            Some((EventKind::Final, "item.agent_message".to_string()))
        );
        // Missing nested type degrades to progress
        assert_eq!(
            codex(r#"{"type": "item.completed"}"#),
            Some((EventKind::Progress, "item.completed".to_string()))
        );
    }

    #[test]
    fn claude_events() {
        assert_eq!(
            claude(r#"{"type": "result"}"#),
            Some((EventKind::Final, "result".to_string()))
        );
        assert_eq!(
            claude(r#"{"type": "assistant"}"#),
            Some((EventKind::Final, "assistant".to_string()))
        );
        assert_eq!(
            claude(r#"{"type": "system", "subtype": "init"}"#),
            Some((EventKind::Progress, "system.init".to_string()))
        );
        assert_eq!(
            claude(r#"{"type": "system"}"#),
            Some((EventKind::Progress, "system".to_string()))
        );
        assert_eq!(
            claude(r#"{"type": "stream_event", "event": {"type": "message_stop"}}"#),
            Some((EventKind::Final, "stream.message_stop".to_string()))
        );
        assert_eq!(
            claude(r#"{"type": "stream_event", "event": {"type": "content_block_delta"}}"#),
            Some((EventKind::Progress, "stream.content_block_delta".to_string()))
        );
    }

    #[test]
    fn untagged_and_non_object_values_are_unclassified() {
        assert_eq!(codex(r#"{"item": {"type": "reasoning"}}"#), None);
        assert_eq!(codex(r#"{"type": 42}"#), None);
        assert_eq!(classify(ProbeKind::CodexJson, &Value::from("text")), None);
        assert_eq!(
            classify(ProbeKind::Generic, &serde_json::json!({"type": "result"})),
            None
        );
    }

    #[test]
    fn labels_are_collapsed_and_truncated() {
        let long = format!("{{\"type\": \"{}\"}}", "x".repeat(200));
        let (_, label) = codex(&long).unwrap();
        assert_eq!(label.len(), LABEL_MAX_BYTES);

        let spaced = r#"{"type": "some   spaced\n label"}"#;
        let (_, label) = codex(spaced).unwrap();
        assert_eq!(label, "some spaced label");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld".repeat(20);
        let t = truncate_safe(&s, 80);
        assert!(t.len() <= 80);
        assert!(s.starts_with(t));
    }

    #[test]
    fn update_counts_events_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stdout.log");
        std::fs::write(
            &log,
            concat!(
                "{\"type\": \"thread.started\"}\n",
                "not json at all\n",
                "{\"type\": \"item.completed\", \"item\": {\"type\": \"reasoning\"}}\n",
            ),
        )
        .unwrap();

        let mut state = ProbeState::new();
        state.update(ProbeKind::CodexJson, &log);
        assert_eq!(state.progress_count, 2);
        assert_eq!(state.final_count, 0);
        assert_eq!(state.last_progress.as_deref(), Some("item.reasoning"));

        // Append a final event; only the new bytes are read
        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(
            f,
            "{}",
            r#"{"type": "item.completed", "item": {"type": "agent_message", "text": "done"}}"#
        )
        .unwrap();
        state.update(ProbeKind::CodexJson, &log);
        assert_eq!(state.progress_count, 2);
        assert_eq!(state.final_count, 1);
        assert_eq!(state.last_final.as_deref(), Some("item.agent_message"));
    }

    #[test]
    fn reasoning_then_answer_stream_counts_one_of_each() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stdout.log");
        std::fs::write(
            &log,
            concat!(
                "{\"type\": \"item.completed\", \"item\": {\"type\": \"reasoning\", \"text\": \"hmm\"}}\n",
                "{\"type\": \"item.completed\", \"item\": {\"type\": \"assistant_message\", \"text\": \"hello\"}}\n",
            ),
        )
        .unwrap();

        let mut state = ProbeState::new();
        state.update(ProbeKind::CodexJson, &log);
        assert_eq!(state.progress_count, 1);
        assert_eq!(state.final_count, 1);
        assert_eq!(state.last_progress.as_deref(), Some("item.reasoning"));
        assert_eq!(state.last_final.as_deref(), Some("item.assistant_message"));
    }

    #[test]
    fn update_reassembles_lines_split_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stdout.log");
        let full = r#"{"type": "turn.completed"}"#;
        let (head, rest) = full.split_at(12);

        std::fs::write(&log, head).unwrap();
        let mut state = ProbeState::new();
        state.update(ProbeKind::CodexJson, &log);
        assert_eq!(state.final_count, 0, "partial line must not be classified");

        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(f, "{rest}").unwrap();
        state.update(ProbeKind::CodexJson, &log);
        assert_eq!(state.final_count, 1);
        assert_eq!(state.last_final.as_deref(), Some("turn.completed"));
    }

    #[test]
    fn generic_probe_does_no_io() {
        let mut state = ProbeState::new();
        state.update(ProbeKind::Generic, Path::new("/nonexistent/stdout.log"));
        assert_eq!(state.progress_count, 0);
        assert_eq!(state.final_count, 0);
    }

    #[test]
    fn missing_file_is_not_fatal() {
        let mut state = ProbeState::new();
        state.update(ProbeKind::CodexJson, Path::new("/nonexistent/stdout.log"));
        assert_eq!(state.progress_count, 0);
    }

    #[test]
    fn probe_kind_roundtrips_through_serde() {
        let kind: ProbeKind = serde_json::from_str("\"claude_stream_json\"").unwrap();
        assert_eq!(kind, ProbeKind::ClaudeStreamJson);
        assert_eq!(serde_json::to_string(&ProbeKind::CodexJson).unwrap(), "\"codex_json\"");
    }
}
