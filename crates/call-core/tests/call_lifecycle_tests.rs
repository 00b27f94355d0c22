//! Call lifecycle: creation, two-phase clearing, the garbage collector,
//! and engine shutdown.

mod common;

use std::time::Duration;

use common::{MockEndpoint, TrackingHandler};
use tandem_call_core::{CallEndReason, CallEngine, CallToken, EngineConfig, EngineError};

/// Engine with a fast collector so tests never wait long on a tick.
fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_collector_period(Duration::from_millis(20))
        .with_shutdown_grace(Duration::from_secs(2))
}

/// Engine whose collector effectively never runs, to observe the window
/// between marking and physical destruction.
fn slow_config() -> EngineConfig {
    EngineConfig::new().with_collector_period(Duration::from_secs(3600))
}

#[tokio::test]
async fn set_up_call_returns_live_token() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip.clone()).await;

    let token = engine.set_up_call("sip:alice", "sip:bob").await.unwrap();

    let call = engine.find_call(&token).await.expect("call should be live");
    assert_eq!(call.party_a(), "sip:alice");
    assert_eq!(call.party_b(), "sip:bob");
    assert_eq!(call.connection_count(), 1);
    assert!(call.end_reason().is_none());
    drop(call);

    assert_eq!(sip.requests(), vec!["sip:alice".to_string()]);
    engine.shutdown().await;
}

#[tokio::test]
async fn set_up_call_without_endpoints_fails() {
    let engine = CallEngine::new(fast_config(), None);
    let err = engine.set_up_call("sip:alice", "sip:bob").await.unwrap_err();
    assert!(matches!(err, EngineError::NoEndpoint { .. }));
    assert_eq!(engine.registry().len().await, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn failed_setup_clears_call_with_leg_reason() {
    let handler = TrackingHandler::new();
    let engine = CallEngine::new(fast_config(), Some(handler.clone()));
    let sip = MockEndpoint::new("sip");
    sip.setup_fails.store(true, std::sync::atomic::Ordering::SeqCst);
    engine.attach_endpoint(sip).await;

    let err = engine.set_up_call("sip:alice", "sip:bob").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ConnectionFailed {
            reason: CallEndReason::EndedByConnectFail
        }
    ));

    // The failed call is gone from the live map at once.
    assert_eq!(engine.registry().len().await, 0);
    let events = handler.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("cleared:"));
    assert!(events[0].ends_with(&CallEndReason::EndedByConnectFail.to_string()));
    engine.shutdown().await;
}

#[tokio::test]
async fn cleared_call_is_unfindable_before_collector_runs() {
    let engine = CallEngine::new(slow_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:alice", "sip:bob").await.unwrap();
    engine
        .clear_call(&token, CallEndReason::EndedByRemoteUser)
        .await
        .unwrap();

    // The collector has not ticked, yet every lookup mode already misses.
    assert!(engine.find_call(&token).await.is_none());
    assert!(engine.find_call_mut(&token).await.is_none());
    assert!(engine.registry().find_reference(&token).await.is_none());
    assert!(!engine.is_call_established(&token).await);
}

#[tokio::test]
async fn second_clear_reports_not_found() {
    let engine = CallEngine::new(slow_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();

    engine
        .clear_call(&token, CallEndReason::EndedByLocalUser)
        .await
        .unwrap();
    let err = engine
        .clear_call(&token, CallEndReason::EndedByRemoteUser)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CallNotFound { .. }));
}

#[tokio::test]
async fn concurrent_clears_produce_one_transition() {
    let engine = CallEngine::new(slow_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let engine = engine.clone();
        let token = token.clone();
        let reason = if i % 2 == 0 {
            CallEndReason::EndedByLocalUser
        } else {
            CallEndReason::EndedByRemoteUser
        };
        tasks.push(tokio::spawn(async move {
            engine.clear_call(&token, reason).await.is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn end_reason_is_stable_after_first_clear() {
    let engine = CallEngine::new(slow_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();

    // Hold a reference across the clear; the mark must not wait for us and
    // the reason must be visible through our handle.
    let slot = engine.registry().find_reference(&token).await.unwrap();
    engine
        .clear_call(&token, CallEndReason::EndedByRemoteUser)
        .await
        .unwrap();

    assert!(slot.is_cleared());
    assert_eq!(slot.end_reason(), Some(CallEndReason::EndedByRemoteUser));
}

#[tokio::test]
async fn outstanding_reference_defers_destruction() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();
    let slot = engine.registry().find_reference(&token).await.unwrap();

    engine
        .clear_call(&token, CallEndReason::EndedByLocalUser)
        .await
        .unwrap();

    // Give the collector several periods; our reference pins the call.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.registry().stats().total_destroyed, 0);

    drop(slot);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.registry().stats().total_destroyed, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn synchronous_clear_waits_for_destruction() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();
    engine
        .clear_call_synchronous(&token, CallEndReason::EndedByLocalUser)
        .await
        .unwrap();

    // Once we return, the collector has physically destroyed the call.
    assert_eq!(engine.registry().stats().total_destroyed, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn clear_all_calls_waits_for_drain() {
    let handler = TrackingHandler::new();
    let engine = CallEngine::new(fast_config(), Some(handler.clone()));
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    for _ in 0..5 {
        engine.set_up_call("sip:a", "sip:b").await.unwrap();
    }
    assert_eq!(engine.registry().len().await, 5);

    engine
        .clear_all_calls(CallEndReason::EndedByOutOfService, true)
        .await;

    assert_eq!(engine.registry().len().await, 0);
    assert_eq!(engine.registry().stats().total_destroyed, 5);
    assert_eq!(
        handler
            .events()
            .iter()
            .filter(|e| e.starts_with("cleared:"))
            .count(),
        5
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn collector_polls_endpoints() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip.clone()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sip.gc_calls.load(std::sync::atomic::Ordering::SeqCst) > 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn undrained_endpoint_holds_the_barrier() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    sip.drained.store(false, std::sync::atomic::Ordering::SeqCst);
    engine.attach_endpoint(sip.clone()).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();
    engine
        .clear_call(&token, CallEndReason::EndedByLocalUser)
        .await
        .unwrap();

    let wait = tokio::time::timeout(
        Duration::from_millis(150),
        engine.clear_all_calls(CallEndReason::EndedByLocalUser, true),
    );
    assert!(wait.await.is_err(), "barrier should not release");

    // Endpoint drains; the next pass releases the barrier.
    sip.drained.store(true, std::sync::atomic::Ordering::SeqCst);
    tokio::time::timeout(
        Duration::from_secs(2),
        engine.clear_all_calls(CallEndReason::EndedByLocalUser, true),
    )
    .await
    .expect("barrier should release once drained");
    engine.shutdown().await;
}

#[tokio::test]
async fn established_flag_and_hook() {
    let handler = TrackingHandler::new();
    let engine = CallEngine::new(fast_config(), Some(handler.clone()));
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();
    assert!(!engine.is_call_established(&token).await);

    engine.on_established(&token).await.unwrap();
    assert!(engine.is_call_established(&token).await);
    assert!(handler
        .events()
        .contains(&format!("established:{token}")));

    // Unknown token is an error, not a panic.
    let bogus = CallToken::from("no-such-call");
    assert!(engine.on_established(&bogus).await.is_err());
    engine.shutdown().await;
}

#[tokio::test]
async fn media_bypass_requires_both_legs() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();
    // Only the A-leg exists.
    assert!(!engine.is_media_bypass_possible(&token, 1).await);

    let call = engine.find_call(&token).await.unwrap();
    engine
        .make_connection(&call, "sip:b", &Default::default())
        .await
        .unwrap();
    drop(call);
    assert!(engine.is_media_bypass_possible(&token, 1).await);
    engine.shutdown().await;
}

#[tokio::test]
async fn tokens_are_distinct_across_calls() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let a = engine.set_up_call("sip:a", "").await.unwrap();
    let b = engine.set_up_call("sip:b", "").await.unwrap();
    let c = engine.set_up_call("sip:c", "").await.unwrap();
    assert_ne!(a, b);
    assert_ne!(b, c);
    assert_ne!(a, c);
    engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_final() {
    let engine = CallEngine::new(fast_config(), None);
    let sip = MockEndpoint::new("sip");
    engine.attach_endpoint(sip).await;

    let token = engine.set_up_call("sip:a", "sip:b").await.unwrap();

    engine.shutdown().await;
    engine.shutdown().await;

    // Calls were cleared and destroyed during shutdown.
    assert!(engine.find_call(&token).await.is_none());
    assert_eq!(engine.registry().stats().total_destroyed, 1);

    // No new calls after shutdown.
    let err = engine.set_up_call("sip:x", "sip:y").await.unwrap_err();
    assert!(matches!(err, EngineError::ShutDown));
    assert!(engine.interface_events().is_none());
}
