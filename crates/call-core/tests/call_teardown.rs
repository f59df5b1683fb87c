//! Hangup paths and what a finished call leaves behind

mod common;

use std::time::Duration;

use common::{Endpoint, advance, wait_for_state};
use peercall_call_core::{CallConfig, CallEndReason, CallError, CallEvent, CallState};
use peercall_signal_core::{CallId, InMemoryRelay, SignalKind};
use tokio_test::assert_ok;

async fn connect(relay: &InMemoryRelay, call_id: &CallId) -> (Endpoint, Endpoint) {
    let caller = Endpoint::new(relay, CallConfig::default());
    let callee = Endpoint::new(relay, CallConfig::default());
    caller.controller.start_call(call_id.clone()).await.unwrap();
    callee.controller.accept_call(call_id.clone()).await.unwrap();
    wait_for_state(&caller.controller, CallState::Connected).await;
    wait_for_state(&callee.controller, CallState::Connected).await;
    (caller, callee)
}

/// Test that a local hangup reaches the remote side and ends both calls
#[tokio::test(start_paused = true)]
async fn test_hangup_ends_both_sides() {
    let relay = InMemoryRelay::new();
    let call_id = CallId::new("hangup");
    let (mut caller, mut callee) = connect(&relay, &call_id).await;

    assert_ok!(caller.controller.hangup().await);
    assert_eq!(caller.controller.state(), CallState::Ended);
    assert_eq!(relay.sent_count(SignalKind::Hangup), 1);

    wait_for_state(&callee.controller, CallState::Ended).await;
    assert!(!callee.controller.is_active());

    let caller_events = caller.drain_events();
    assert!(
        caller_events
            .iter()
            .any(|e| matches!(e, CallEvent::CallEnded { reason: CallEndReason::LocalHangup, .. }))
    );
    let callee_events = callee.drain_events();
    assert!(
        callee_events
            .iter()
            .any(|e| matches!(e, CallEvent::CallEnded { reason: CallEndReason::RemoteHangup, .. }))
    );
    assert!(!callee_events.iter().any(|e| matches!(e, CallEvent::CallFailed { .. })));

    let records = callee.call_log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].end_reason, CallEndReason::RemoteHangup);
    assert!(records[0].was_connected());
}

/// Test that nothing polls, samples, or holds devices after teardown
#[tokio::test(start_paused = true)]
async fn test_teardown_stops_timers_and_releases_media() {
    let relay = InMemoryRelay::new();
    let call_id = CallId::new("teardown");
    let (caller, callee) = connect(&relay, &call_id).await;

    advance(Duration::from_secs(10)).await;
    let caller_peer = caller.peers.peer(0);
    let callee_peer = callee.peers.peer(0);
    assert!(caller_peer.stats_calls() >= 3);
    assert!(caller.controller.snapshot().unwrap().last_rating.is_some());

    caller.controller.hangup().await.unwrap();
    wait_for_state(&callee.controller, CallState::Ended).await;

    let polls = relay.poll_count();
    let caller_stats = caller_peer.stats_calls();
    let callee_stats = callee_peer.stats_calls();
    advance(Duration::from_secs(60)).await;

    assert_eq!(relay.poll_count(), polls);
    assert_eq!(caller_peer.stats_calls(), caller_stats);
    assert_eq!(callee_peer.stats_calls(), callee_stats);

    for side in [&caller, &callee] {
        assert!(side.media.streams().iter().all(|s| s.is_stopped()));
        assert_eq!(side.render.detached(), 1);
        assert!(side.peers.peer(0).is_closed());
        assert!(side.controller.snapshot().is_none());
    }
}

/// Test that ending the session locally does not signal the remote side
#[tokio::test(start_paused = true)]
async fn test_end_session_sends_no_hangup() {
    let relay = InMemoryRelay::new();
    let call_id = CallId::new("end-session");
    let (caller, callee) = connect(&relay, &call_id).await;

    assert_ok!(caller.controller.end_session().await);
    advance(Duration::from_secs(10)).await;

    assert_eq!(caller.controller.state(), CallState::Ended);
    assert_eq!(relay.sent_count(SignalKind::Hangup), 0);
    assert_eq!(callee.controller.state(), CallState::Connected);
    assert_eq!(caller.call_log.records()[0].end_reason, CallEndReason::SessionEnded);
}

/// Test that hanging up with no call is reported, and a new call can follow
#[tokio::test(start_paused = true)]
async fn test_controller_is_reusable_after_hangup() {
    let relay = InMemoryRelay::new();
    let caller = Endpoint::new(&relay, CallConfig::default());
    assert_eq!(caller.controller.hangup().await, Err(CallError::NoActiveCall));

    caller.controller.start_call(CallId::new("one")).await.unwrap();
    caller.controller.hangup().await.unwrap();
    caller.controller.start_call(CallId::new("two")).await.unwrap();

    assert_eq!(caller.controller.snapshot().unwrap().call_id, CallId::new("two"));
    assert_eq!(caller.peers.created(), 2);
    assert!(caller.media.streams()[0].is_stopped());
    assert!(!caller.media.streams()[1].is_stopped());
}
