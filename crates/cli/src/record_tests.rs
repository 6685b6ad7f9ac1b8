// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::paths::SessionKey;
use crate::test_support::temp_paths;
use std::path::PathBuf;

fn test_key() -> SessionKey {
    SessionKey::new(
        vec!["claude-code-acp".to_owned()],
        PathBuf::from("/work/project"),
        Some("dev".to_owned()),
    )
}

#[test]
fn ensure_creates_then_reloads() {
    let ctx = temp_paths();
    let key = test_key();
    let created = ensure(&ctx.paths, &key).expect("create");
    assert_eq!(created.id, key.digest());
    assert_eq!(created.agent_command, vec!["claude-code-acp"]);
    assert_eq!(created.cwd, PathBuf::from("/work/project"));
    assert_eq!(created.name.as_deref(), Some("dev"));
    assert!(created.acp_session_id.is_none());

    let reloaded = ensure(&ctx.paths, &key).expect("reload");
    assert_eq!(reloaded, created);
}

#[test]
fn touch_updates_last_used_and_session_id() {
    let ctx = temp_paths();
    let key = test_key();
    let mut record = ensure(&ctx.paths, &key).expect("create");
    let before = record.last_used_at;
    std::thread::sleep(std::time::Duration::from_millis(5));

    touch(&ctx.paths, &mut record, Some("sess-42")).expect("touch");
    let reloaded = load(&ctx.paths, &record.id).expect("io").expect("record");
    assert!(reloaded.last_used_at >= before);
    assert_eq!(reloaded.acp_session_id.as_deref(), Some("sess-42"));

    // A later touch without a session id keeps the stored one.
    touch(&ctx.paths, &mut record, None).expect("touch");
    let reloaded = load(&ctx.paths, &record.id).expect("io").expect("record");
    assert_eq!(reloaded.acp_session_id.as_deref(), Some("sess-42"));
}

#[test]
fn load_missing_returns_none() {
    let ctx = temp_paths();
    assert!(load(&ctx.paths, "ffffffffffffffffffffffff").expect("io").is_none());
}

#[test]
fn unreadable_record_reads_as_none() {
    let ctx = temp_paths();
    let key = test_key();
    let record = ensure(&ctx.paths, &key).expect("create");
    std::fs::write(ctx.paths.record_path(&record.id), "{broken").expect("write");
    assert!(load(&ctx.paths, &record.id).expect("io").is_none());
}

#[test]
fn wire_field_spellings_are_camel_case() {
    let record = SessionRecord::from_key(&test_key());
    let value = serde_json::to_value(&record).expect("serialize");
    assert!(value.get("agentCommand").is_some());
    assert!(value.get("createdAt").is_some());
    assert!(value.get("lastUsedAt").is_some());
    assert!(value.get("agent_command").is_none());
}
