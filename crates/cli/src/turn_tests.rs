// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::ScriptedController;
use serde_json::json;

fn controller() -> Rc<ScriptedController> {
    Rc::new(ScriptedController::default())
}

#[tokio::test]
async fn begin_turn_only_from_idle() {
    let turn = TurnController::new();
    assert_eq!(turn.phase(), TurnPhase::Idle);
    assert!(turn.begin_turn());
    assert_eq!(turn.phase(), TurnPhase::Starting);
    assert!(!turn.begin_turn());

    turn.end_turn();
    assert_eq!(turn.phase(), TurnPhase::Idle);
    assert!(turn.begin_turn());
}

#[tokio::test]
async fn closing_wins_over_end_turn() {
    let turn = TurnController::new();
    assert!(turn.begin_turn());
    turn.begin_closing();
    turn.end_turn();
    assert_eq!(turn.phase(), TurnPhase::Closing);
    assert!(!turn.begin_turn());
}

#[tokio::test]
async fn cancel_in_starting_is_accepted_and_deferred() {
    let turn = TurnController::new();
    let ctrl = controller();
    assert!(turn.begin_turn());

    // No controller installed yet: accepted, nothing delivered.
    assert!(turn.request_cancel("r1").await);
    assert_eq!(ctrl.cancels(), 0);

    // Installing the controller while still Starting does not deliver.
    turn.set_active_controller(ctrl.clone()).await;
    assert_eq!(ctrl.cancels(), 0);

    // The prompt going active delivers exactly once.
    turn.mark_prompt_active().await;
    assert_eq!(ctrl.cancels(), 1);
}

#[tokio::test]
async fn cancel_applies_when_controller_arrives_after_active() {
    let turn = TurnController::new();
    let ctrl = controller();
    assert!(turn.begin_turn());
    turn.mark_prompt_active().await;

    // Active but no controller: accepted and deferred.
    assert!(turn.request_cancel("r1").await);
    assert_eq!(ctrl.cancels(), 0);

    turn.set_active_controller(ctrl.clone()).await;
    assert_eq!(ctrl.cancels(), 1);
}

#[tokio::test]
async fn cancel_in_active_goes_straight_to_the_adapter() {
    let turn = TurnController::new();
    let ctrl = controller();
    assert!(turn.begin_turn());
    turn.set_active_controller(ctrl.clone()).await;
    turn.mark_prompt_active().await;

    assert!(turn.request_cancel("r1").await);
    assert_eq!(ctrl.cancels(), 1);
}

#[tokio::test]
async fn second_cancel_in_one_turn_is_idempotent() {
    let turn = TurnController::new();
    let ctrl = controller();
    assert!(turn.begin_turn());
    turn.set_active_controller(ctrl.clone()).await;
    turn.mark_prompt_active().await;

    assert!(turn.request_cancel("r1").await);
    assert!(turn.request_cancel("r2").await);
    assert!(turn.request_cancel("r3").await);
    assert_eq!(ctrl.cancels(), 1);
}

#[tokio::test]
async fn pending_cancel_is_discarded_at_turn_end() {
    let turn = TurnController::new();
    let ctrl = controller();
    assert!(turn.begin_turn());
    assert!(turn.request_cancel("r1").await);
    turn.end_turn();

    // A new turn must not inherit the stale cancel.
    assert!(turn.begin_turn());
    turn.set_active_controller(ctrl.clone()).await;
    turn.mark_prompt_active().await;
    assert_eq!(ctrl.cancels(), 0);
}

#[tokio::test]
async fn cancel_while_closing_is_rejected() {
    let turn = TurnController::new();
    turn.begin_closing();
    assert!(!turn.request_cancel("r1").await);
}

#[tokio::test]
async fn failed_adapter_cancel_reports_false_but_counts_as_delivered() {
    let turn = TurnController::new();
    let ctrl = controller();
    *ctrl.fail_cancel.borrow_mut() = Some("adapter went away".to_owned());
    assert!(turn.begin_turn());
    turn.set_active_controller(ctrl.clone()).await;
    turn.mark_prompt_active().await;

    assert!(!turn.request_cancel("r1").await);
    // The delivery slot is spent; the adapter is not re-invoked.
    *ctrl.fail_cancel.borrow_mut() = None;
    assert!(turn.request_cancel("r2").await);
    assert_eq!(ctrl.cancels(), 0);
}

#[tokio::test]
async fn set_mode_routes_through_active_controller() {
    let turn = TurnController::new();
    let active = controller();
    let fallback = controller();
    turn.set_fallback(fallback.clone());

    assert!(turn.begin_turn());
    turn.set_active_controller(active.clone()).await;
    turn.set_session_mode("plan", None).await.expect("set mode");

    assert_eq!(active.modes.borrow().as_slice(), ["plan"]);
    assert!(fallback.modes.borrow().is_empty());
}

#[tokio::test]
async fn set_mode_falls_back_without_active_controller() {
    let turn = TurnController::new();
    let fallback = controller();
    turn.set_fallback(fallback.clone());

    turn.set_session_mode("code", None).await.expect("set mode");
    assert_eq!(fallback.modes.borrow().as_slice(), ["code"]);
}

#[tokio::test]
async fn set_mode_without_any_target_fails() {
    let turn = TurnController::new();
    let err = turn.set_session_mode("plan", None).await.expect_err("no target");
    assert!(matches!(err, QueueError::Runtime { .. }));
}

#[tokio::test]
async fn controls_reject_while_closing() {
    let turn = TurnController::new();
    let fallback = controller();
    turn.set_fallback(fallback.clone());
    turn.begin_closing();

    let err = turn.set_session_mode("plan", None).await.expect_err("closing");
    assert!(err.to_string().contains("closing"), "got: {err}");
    let err = turn
        .set_session_config_option("model", json!("fast"), None)
        .await
        .expect_err("closing");
    assert!(err.to_string().contains("closing"), "got: {err}");
}

#[tokio::test]
async fn set_config_option_returns_adapter_response() {
    let turn = TurnController::new();
    let fallback = controller();
    turn.set_fallback(fallback.clone());

    let response = turn
        .set_session_config_option("model", json!("fast"), None)
        .await
        .expect("set config");
    assert_eq!(response, json!({"configId": "model", "value": "fast"}));
    assert_eq!(fallback.config_options.borrow().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn control_timeout_is_enforced() {
    struct StuckFallback;
    #[async_trait::async_trait(?Send)]
    impl ControlFallback for StuckFallback {
        async fn set_mode(&self, _mode_id: &str) -> Result<(), QueueError> {
            std::future::pending().await
        }
        async fn set_config_option(
            &self,
            _config_id: &str,
            _value: serde_json::Value,
        ) -> Result<serde_json::Value, QueueError> {
            std::future::pending().await
        }
    }

    let turn = TurnController::new();
    turn.set_fallback(Rc::new(StuckFallback));
    let err = turn.set_session_mode("plan", Some(50)).await.expect_err("timeout");
    assert!(matches!(err, QueueError::Timeout(_)));
}

// ---------------------------------------------------------------------------
// Deferred-cancel property: for any interleaving of cancel requests around
// the starting window, the adapter sees at most one cancel, and exactly one
// when any cancel arrived before the turn ended.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Step {
    Cancel,
    InstallController,
    MarkActive,
}

fn run_interleaving(steps: &[Step]) -> (u32, bool) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async {
        let turn = TurnController::new();
        let ctrl = Rc::new(ScriptedController::default());
        assert!(turn.begin_turn());
        let mut any_cancel = false;
        for step in steps {
            match step {
                Step::Cancel => {
                    assert!(turn.request_cancel("r").await);
                    any_cancel = true;
                }
                Step::InstallController => {
                    turn.set_active_controller(ctrl.clone()).await;
                }
                Step::MarkActive => {
                    turn.mark_prompt_active().await;
                }
            }
        }
        // Finish the handshake so a recorded cancel has every chance to land.
        turn.set_active_controller(ctrl.clone()).await;
        turn.mark_prompt_active().await;
        turn.end_turn();
        (ctrl.cancels(), any_cancel)
    })
}

proptest::proptest! {
    #[test]
    fn deferred_cancel_is_delivered_exactly_once(
        steps in proptest::collection::vec(
            proptest::prop_oneof![
                proptest::strategy::Just(Step::Cancel),
                proptest::strategy::Just(Step::InstallController),
                proptest::strategy::Just(Step::MarkActive),
            ],
            0..8,
        )
    ) {
        let (cancels, any_cancel) = run_interleaving(&steps);
        if any_cancel {
            proptest::prop_assert_eq!(cancels, 1);
        } else {
            proptest::prop_assert_eq!(cancels, 0);
        }
    }
}
