// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn chunk(text: &str) -> Value {
    json!({
        "sessionId": "sess-1",
        "update": {
            "sessionUpdate": "agent_message_chunk",
            "content": {"type": "text", "text": text},
        },
    })
}

#[test]
fn extracts_agent_message_text() {
    assert_eq!(update_text(&chunk("hello")), Some("hello"));
}

#[test]
fn ignores_non_chunk_updates() {
    let notification = json!({
        "sessionId": "sess-1",
        "update": {"sessionUpdate": "agent_thought_chunk", "content": {"type": "text", "text": "x"}},
    });
    assert_eq!(update_text(&notification), None);
}

#[test]
fn ignores_malformed_notifications() {
    assert_eq!(update_text(&json!({})), None);
    assert_eq!(update_text(&json!({"update": {}})), None);
    assert_eq!(update_text(&json!({"update": {"sessionUpdate": "agent_message_chunk"}})), None);
}

#[test]
fn extracts_tool_call_title() {
    let notification = json!({
        "sessionId": "sess-1",
        "update": {"sessionUpdate": "tool_call", "toolCallId": "t1", "title": "Read file"},
    });
    assert_eq!(update_tool_title(&notification), Some("Read file"));
    assert_eq!(update_text(&notification), None);
}

#[test]
fn quiet_formatter_swallows_everything() {
    // Mostly a smoke test: no panics, no output assertions needed.
    let mut formatter = Formatter::new(OutputFormat::Quiet);
    formatter.on_update(&chunk("hi"));
    formatter.on_client_operation(&json!({"kind": "fs_read_text_file", "path": "x"}));
    formatter.on_done("end_turn");
    formatter.on_result(&PromptResultBody {
        stop_reason: "end_turn".to_owned(),
        duration_ms: 1,
        update_count: 1,
        permission_denied: false,
    });
    formatter.on_error(&ErrorBody {
        code: "runtime".to_owned(),
        detail_code: "QUEUE_RUNTIME_PROMPT_FAILED".to_owned(),
        origin: crate::error::ErrorOrigin::Runtime,
        message: "boom".to_owned(),
        retryable: true,
        acp: None,
    });
}
