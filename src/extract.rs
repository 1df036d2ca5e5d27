//! Final-answer extraction from captured reviewer stdout.
//!
//! Structured reviewers wrap the answer in protocol events; after the
//! process exits these helpers strip the envelope. When multiple
//! candidate events exist the last one wins, and anything unrecognized
//! degrades to the raw output rather than failing. Pure functions of
//! their input.

use serde_json::Value;

use crate::probe::ProbeKind;

/// Reduce raw stdout to the user-facing answer text.
pub fn final_output(kind: ProbeKind, raw: &str) -> String {
    match kind {
        ProbeKind::Generic => raw.to_string(),
        ProbeKind::CodexJson => codex_final_output(raw),
        ProbeKind::ClaudeStreamJson => claude_final_output(raw),
    }
}

/// Text of the last completed agent/assistant message item.
fn codex_final_output(raw: &str) -> String {
    let mut final_text: Option<String> = None;
    for event in iter_json_lines(raw) {
        if event.get("type").and_then(Value::as_str) != Some("item.completed") {
            continue;
        }
        let Some(item) = event.get("item").filter(|item| item.is_object()) else {
            continue;
        };
        if !matches!(
            item.get("type").and_then(Value::as_str),
            Some("agent_message" | "assistant_message")
        ) {
            continue;
        }
        if let Some(text) = item.get("text").and_then(Value::as_str) {
            final_text = Some(text.to_string());
        }
    }
    final_text.unwrap_or_else(|| raw.to_string())
}

/// The last `result` string, else the text blocks of the last assistant
/// message, else the raw output.
fn claude_final_output(raw: &str) -> String {
    let mut result_text: Option<String> = None;
    let mut assistant_text: Option<String> = None;

    for event in iter_json_lines(raw) {
        match event.get("type").and_then(Value::as_str) {
            Some("result") => {
                if let Some(value) = event.get("result").and_then(Value::as_str) {
                    result_text = Some(value.to_string());
                }
            }
            Some("assistant") => {
                if let Some(text) = message_text(event.get("message")) {
                    assistant_text = Some(text);
                }
            }
            _ => {}
        }
    }

    result_text
        .or(assistant_text)
        .unwrap_or_else(|| raw.to_string())
}

/// Concatenated `text` content blocks of an assistant message.
fn message_text(message: Option<&Value>) -> Option<String> {
    let content = message?.get("content")?.as_array()?;
    let parts: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

/// Parse newline-delimited JSON objects, skipping malformed lines.
fn iter_json_lines(raw: &str) -> impl Iterator<Item = Value> + '_ {
    raw.lines().filter_map(|line| {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str::<Value>(line).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_passes_through() {
        let raw = "plain answer\nwith two lines\n";
        assert_eq!(final_output(ProbeKind::Generic, raw), raw);
    }

    #[test]
    fn codex_picks_last_agent_message() {
        let raw = concat!(
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"reasoning\", \"text\": \"thinking\"}}\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"agent_message\", \"text\": \"draft\"}}\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"agent_message\", \"text\": \"hello\"}}\n",
        );
        assert_eq!(final_output(ProbeKind::CodexJson, raw), "hello");
    }

    #[test]
    fn codex_reasoning_then_answer() {
        let raw = concat!(
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"reasoning\", \"text\": \"hmm\"}}\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"assistant_message\", \"text\": \"hello\"}}\n",
        );
        assert_eq!(final_output(ProbeKind::CodexJson, raw), "hello");
    }

    #[test]
    fn codex_without_answer_returns_raw() {
        let raw = concat!(
            "{\"type\": \"turn.started\"}\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"tool_call\"}}\n",
        );
        assert_eq!(final_output(ProbeKind::CodexJson, raw), raw);
    }

    #[test]
    fn claude_prefers_result_field() {
        let raw = concat!(
            "{\"type\": \"assistant\", \"message\": {\"content\": [{\"type\": \"text\", \"text\": \"from assistant\"}]}}\n",
            "{\"type\": \"result\", \"result\": \"from result\"}\n",
        );
        assert_eq!(final_output(ProbeKind::ClaudeStreamJson, raw), "from result");
    }

    #[test]
    fn claude_falls_back_to_assistant_text_blocks() {
        let raw = concat!(
            "{\"type\": \"system\", \"subtype\": \"init\"}\n",
            "{\"type\": \"assistant\", \"message\": {\"content\": [",
            "{\"type\": \"text\", \"text\": \"part one\"}, ",
            "{\"type\": \"tool_use\", \"name\": \"bash\"}, ",
            "{\"type\": \"text\", \"text\": \" part two\"}]}}\n",
        );
        assert_eq!(
            final_output(ProbeKind::ClaudeStreamJson, raw),
            "part one part two"
        );
    }

    #[test]
    fn claude_last_event_supersedes_earlier() {
        let raw = concat!(
            "{\"type\": \"result\", \"result\": \"first\"}\n",
            "{\"type\": \"result\", \"result\": \"second\"}\n",
        );
        assert_eq!(final_output(ProbeKind::ClaudeStreamJson, raw), "second");
    }

    #[test]
    fn claude_without_matches_returns_raw() {
        let raw = "{\"type\": \"system\"}\nnoise\n";
        assert_eq!(final_output(ProbeKind::ClaudeStreamJson, raw), raw);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let raw = concat!(
            "{broken json\n",
            "{\"type\": \"result\", \"result\": \"ok\"}\n",
            "{also broken\n",
        );
        assert_eq!(final_output(ProbeKind::ClaudeStreamJson, raw), "ok");
    }

    #[test]
    fn extraction_is_idempotent_on_its_input() {
        let raw = concat!(
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"agent_message\", \"text\": \"stable\"}}\n",
        );
        let first = final_output(ProbeKind::CodexJson, raw);
        let second = final_output(ProbeKind::CodexJson, raw);
        assert_eq!(first, second);
        assert_eq!(first, "stable");
    }
}
