// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::DetailCode;
use std::cell::Cell;

#[tokio::test]
async fn immediate_success_spawns_nothing() {
    let spawned = Cell::new(0u32);
    let result: Result<u32, QueueError> = attach_with(
        || async { Ok(Some(7)) },
        || {
            spawned.set(spawned.get() + 1);
            Ok(())
        },
        ATTACH_DEADLINE,
    )
    .await;
    assert_eq!(result.expect("value"), 7);
    assert_eq!(spawned.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_owner_triggers_one_paced_spawn() {
    let attempts = Cell::new(0u32);
    let spawned = Cell::new(0u32);
    let result: Result<u32, QueueError> = attach_with(
        || {
            let n = attempts.get() + 1;
            attempts.set(n);
            // Owner appears on the fourth attempt (~150 ms in).
            async move { Ok((n >= 4).then_some(42)) }
        },
        || {
            spawned.set(spawned.get() + 1);
            Ok(())
        },
        ATTACH_DEADLINE,
    )
    .await;
    assert_eq!(result.expect("value"), 42);
    // Attempts at 0/50/100 ms all saw no owner, but the 250 ms pacing allows
    // only the first to spawn.
    assert_eq!(spawned.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn spawn_pacing_allows_a_second_spawn_after_the_interval() {
    let attempts = Cell::new(0u32);
    let spawned = Cell::new(0u32);
    let result: Result<u32, QueueError> = attach_with(
        || {
            let n = attempts.get() + 1;
            attempts.set(n);
            // Owner appears after 400 ms (attempt 9), past the pacing window.
            async move { Ok((n >= 9).then_some(1)) }
        },
        || {
            spawned.set(spawned.get() + 1);
            Ok(())
        },
        ATTACH_DEADLINE,
    )
    .await;
    assert!(result.is_ok());
    assert_eq!(spawned.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_raises_not_accepting() {
    let result: Result<u32, QueueError> = attach_with(
        || async { Ok(None) },
        || Ok(()),
        std::time::Duration::from_millis(300),
    )
    .await;
    let err = result.expect_err("deadline");
    assert_eq!(err.detail(), Some(DetailCode::NotAcceptingRequests));
    assert!(err.retryable());
}

#[tokio::test(start_paused = true)]
async fn retryable_errors_re_enter_the_loop() {
    let attempts = Cell::new(0u32);
    let result: Result<u32, QueueError> = attach_with(
        || {
            let n = attempts.get() + 1;
            attempts.set(n);
            async move {
                if n < 3 {
                    Err(QueueError::connection(DetailCode::DisconnectedBeforeAck, "flaky"))
                } else {
                    Ok(Some(9))
                }
            }
        },
        || Ok(()),
        ATTACH_DEADLINE,
    )
    .await;
    assert_eq!(result.expect("value"), 9);
    assert_eq!(attempts.get(), 3);
}

#[tokio::test]
async fn non_retryable_errors_surface_immediately() {
    let spawned = Cell::new(0u32);
    let result: Result<u32, QueueError> = attach_with(
        || async {
            Err(QueueError::protocol(DetailCode::ProtocolMalformedMessage, "bad owner"))
        },
        || {
            spawned.set(spawned.get() + 1);
            Ok(())
        },
        ATTACH_DEADLINE,
    )
    .await;
    let err = result.expect_err("protocol error");
    assert_eq!(err.detail(), Some(DetailCode::ProtocolMalformedMessage));
    assert_eq!(spawned.get(), 0);
}

#[tokio::test]
async fn spawn_failure_surfaces_as_not_accepting() {
    let result: Result<u32, QueueError> = attach_with(
        || async { Ok(None) },
        || Err(std::io::Error::other("no such binary")),
        ATTACH_DEADLINE,
    )
    .await;
    let err = result.expect_err("spawn failure");
    assert_eq!(err.detail(), Some(DetailCode::NotAcceptingRequests));
    assert!(err.to_string().contains("failed to start queue owner"));
}
