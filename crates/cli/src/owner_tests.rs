// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::queue::protocol::PromptSubmission;
use crate::test_support::ScriptedRunner;
use yare::parameterized;

#[parameterized(
    unset = { None, Some(300_000) },
    negative = { Some(-1), Some(300_000) },
    very_negative = { Some(i64::MIN), Some(300_000) },
    zero = { Some(0), None },
    positive = { Some(1_500), Some(1_500) },
)]
fn ttl_normalization(raw: Option<i64>, expect_ms: Option<u64>) {
    assert_eq!(normalized_ttl(raw), expect_ms.map(Duration::from_millis));
}

fn prompt_task(request_id: &str) -> (PromptTask, mpsc::Receiver<QueueResponse>) {
    let (replies, rx) = mpsc::channel(16);
    let task = PromptTask {
        request_id: request_id.to_owned(),
        submission: PromptSubmission {
            message: "hi".to_owned(),
            permission_mode: None,
            non_interactive_permissions: None,
            timeout_ms: None,
            suppress_sdk_console_errors: false,
            wait_for_completion: true,
        },
        replies,
    };
    (task, rx)
}

#[tokio::test]
async fn prompt_turn_emits_updates_then_done_then_result() {
    let turn = Rc::new(TurnController::new());
    let runner = ScriptedRunner { updates_per_turn: 2, ..ScriptedRunner::default() };
    let (task, mut rx) = prompt_task("r-1");

    run_prompt_turn(&task, &turn, &runner).await;
    drop(task);

    let mut kinds = Vec::new();
    while let Some(message) = rx.recv().await {
        kinds.push(match message {
            QueueResponse::SessionUpdate { .. } => "update",
            QueueResponse::Done { stop_reason, .. } => {
                assert_eq!(stop_reason, "end_turn");
                "done"
            }
            QueueResponse::Result { result, .. } => {
                assert_eq!(result.update_count, 2);
                "result"
            }
            other => panic!("unexpected message: {other:?}"),
        });
    }
    assert_eq!(kinds, ["update", "update", "done", "result"]);
    // The turn is over; the controller is reusable.
    assert!(turn.begin_turn());
}

#[tokio::test]
async fn prompt_turn_while_closing_is_rejected() {
    let turn = Rc::new(TurnController::new());
    turn.begin_closing();
    let runner = ScriptedRunner::default();
    let (task, mut rx) = prompt_task("r-2");

    run_prompt_turn(&task, &turn, &runner).await;
    drop(task);

    match rx.recv().await.expect("one message") {
        QueueResponse::Error { request_id, body } => {
            assert_eq!(request_id.as_deref(), Some("r-2"));
            assert_eq!(body.detail_code, "QUEUE_NOT_ACCEPTING_REQUESTS");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn runner_failure_becomes_a_terminal_error() {
    struct FailingRunner;
    #[async_trait(?Send)]
    impl PromptRunner for FailingRunner {
        async fn run_prompt(
            &self,
            _task: &PromptTask,
            _turn: &Rc<TurnController>,
        ) -> Result<PromptResultBody, QueueError> {
            Err(QueueError::prompt_failed(
                ErrorOrigin::Runtime,
                "adapter exited with code 1",
                None,
            ))
        }
    }

    let turn = Rc::new(TurnController::new());
    let (task, mut rx) = prompt_task("r-3");
    run_prompt_turn(&task, &turn, &FailingRunner).await;
    drop(task);

    match rx.recv().await.expect("one message") {
        QueueResponse::Error { body, .. } => {
            assert_eq!(body.detail_code, "QUEUE_RUNTIME_PROMPT_FAILED");
            assert_eq!(body.origin, crate::error::ErrorOrigin::Runtime);
            assert!(body.retryable);
        }
        other => panic!("expected error, got {other:?}"),
    }
    // The failed turn still releases the controller for the next one.
    assert!(turn.begin_turn());
}

#[tokio::test(start_paused = true)]
async fn queue_loop_exits_on_idle_ttl() {
    let turn = Rc::new(TurnController::new());
    let runner: Rc<dyn PromptRunner> = Rc::new(ScriptedRunner::default());
    let (_tx, mut rx) = mpsc::channel::<PromptTask>(4);
    let depth = QueueDepth::new();
    let shutdown = CancellationToken::new();

    let started = tokio::time::Instant::now();
    run_queue_loop(turn, runner, &mut rx, depth, Some(Duration::from_millis(500)), shutdown)
        .await;
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn queue_loop_exits_when_channel_closes() {
    let turn = Rc::new(TurnController::new());
    let runner: Rc<dyn PromptRunner> = Rc::new(ScriptedRunner::default());
    let (tx, mut rx) = mpsc::channel::<PromptTask>(4);
    drop(tx);
    let depth = QueueDepth::new();
    run_queue_loop(turn, runner, &mut rx, depth, None, CancellationToken::new()).await;
}

#[tokio::test]
async fn queue_loop_runs_tasks_in_order() {
    let turn = Rc::new(TurnController::new());
    let runner: Rc<dyn PromptRunner> = Rc::new(ScriptedRunner::default());
    let (tx, mut rx) = mpsc::channel::<PromptTask>(4);
    let depth = QueueDepth::new();
    let shutdown = CancellationToken::new();

    let (task_a, mut rx_a) = prompt_task("a");
    let (task_b, mut rx_b) = prompt_task("b");
    depth.enqueued();
    tx.send(task_a).await.expect("send a");
    depth.enqueued();
    tx.send(task_b).await.expect("send b");
    drop(tx);

    run_queue_loop(turn, runner, &mut rx, depth.clone(), None, shutdown).await;
    assert_eq!(depth.current(), 0);

    let mut last_a = None;
    while let Some(message) = rx_a.recv().await {
        last_a = Some(message);
    }
    assert!(matches!(last_a, Some(QueueResponse::Result { .. })));
    let mut last_b = None;
    while let Some(message) = rx_b.recv().await {
        last_b = Some(message);
    }
    assert!(matches!(last_b, Some(QueueResponse::Result { .. })));
}
