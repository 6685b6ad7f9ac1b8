// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

/// Build a permission request from its wire form; keeps the test independent
/// of the protocol crate's constructors.
fn request(options: serde_json::Value) -> acp::RequestPermissionRequest {
    serde_json::from_value(json!({
        "sessionId": "sess-1",
        "toolCall": {"toolCallId": "call-1"},
        "options": options,
    }))
    .expect("valid permission request")
}

fn outcome_option_id(outcome: &acp::RequestPermissionOutcome) -> Option<String> {
    match serde_json::to_value(outcome).expect("serialize") {
        serde_json::Value::Object(map) => map
            .get("optionId")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        _ => None,
    }
}

#[test]
fn allow_prefers_allow_once() {
    let policy = PermissionPolicy::new(PermissionAnswer::Allow);
    let req = request(json!([
        {"optionId": "always", "name": "Always", "kind": "allow_always"},
        {"optionId": "once", "name": "Once", "kind": "allow_once"},
    ]));
    let outcome = policy.decide(&req);
    assert_eq!(outcome_option_id(&outcome).as_deref(), Some("once"));
    assert!(!policy.denied());
}

#[test]
fn allow_falls_back_to_first_option() {
    let policy = PermissionPolicy::new(PermissionAnswer::Allow);
    let req = request(json!([
        {"optionId": "reject", "name": "Reject", "kind": "reject_once"},
    ]));
    let outcome = policy.decide(&req);
    assert_eq!(outcome_option_id(&outcome).as_deref(), Some("reject"));
}

#[test]
fn allow_with_no_options_cancels() {
    let policy = PermissionPolicy::new(PermissionAnswer::Allow);
    let req = request(json!([]));
    let outcome = policy.decide(&req);
    assert!(matches!(outcome, acp::RequestPermissionOutcome::Cancelled));
}

#[test]
fn deny_picks_reject_once_and_records_denial() {
    let policy = PermissionPolicy::new(PermissionAnswer::Deny);
    let req = request(json!([
        {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
        {"optionId": "no", "name": "No", "kind": "reject_once"},
    ]));
    let outcome = policy.decide(&req);
    assert_eq!(outcome_option_id(&outcome).as_deref(), Some("no"));
    assert!(policy.denied());
}

#[test]
fn deny_without_reject_option_cancels() {
    let policy = PermissionPolicy::new(PermissionAnswer::Deny);
    let req = request(json!([
        {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
    ]));
    let outcome = policy.decide(&req);
    assert!(matches!(outcome, acp::RequestPermissionOutcome::Cancelled));
    assert!(policy.denied());
}

#[test]
fn reset_clears_denial_between_turns() {
    let policy = PermissionPolicy::new(PermissionAnswer::Deny);
    let req = request(json!([]));
    let _ = policy.decide(&req);
    assert!(policy.denied());
    policy.reset();
    assert!(!policy.denied());
}

#[test]
fn answer_can_change_per_prompt() {
    let policy = PermissionPolicy::new(PermissionAnswer::Deny);
    policy.set_answer(PermissionAnswer::Allow);
    let req = request(json!([
        {"optionId": "once", "name": "Once", "kind": "allow_once"},
    ]));
    let outcome = policy.decide(&req);
    assert_eq!(outcome_option_id(&outcome).as_deref(), Some("once"));
    assert!(!policy.denied());
}
