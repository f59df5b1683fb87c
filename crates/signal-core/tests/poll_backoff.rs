//! Poll cadence against a flaky relay

use std::time::Duration;

use peercall_signal_core::{
    CallId, InMemoryRelay, PollConfig, PollOutcome, PollScheduler, Role, SessionDescription,
    SignalKind, SignalMessage, SignalTransport, TransportFactory,
};
use tokio_test::{assert_err, assert_ok};
use tracing_test::traced_test;

/// Test that a relay outage backs off to the ceiling, escalates, and that
/// recovery resets the cadence
#[tokio::test]
async fn test_outage_escalates_after_threshold() {
    let relay = InMemoryRelay::new();
    let call = CallId::new("outage");
    let transport = relay.open(&call, Role::Callee).await.unwrap();
    let mut scheduler = PollScheduler::new(PollConfig::default());

    relay.set_available(false);
    let mut outcomes = Vec::new();
    for _ in 0..5 {
        assert_err!(transport.poll(&call).await);
        outcomes.push(scheduler.on_failure());
    }
    assert_eq!(outcomes.last(), Some(&PollOutcome::Escalate { failures: 5 }));
    assert_eq!(scheduler.interval(), Duration::from_millis(5000));

    relay.set_available(true);
    assert_ok!(transport.poll(&call).await);
    scheduler.on_success();
    assert_eq!(scheduler.consecutive_failures(), 0);
    assert_eq!(relay.poll_count(), 6);
}

/// Test that polling with nothing pending is an empty batch, not an error
#[tokio::test]
async fn test_empty_poll_is_not_an_error() {
    let relay = InMemoryRelay::new();
    let call = CallId::generate();
    let transport = relay.open(&call, Role::Caller).await.unwrap();
    for _ in 0..3 {
        let batch = assert_ok!(transport.poll(&call).await);
        assert!(batch.is_empty());
    }
}

/// Test that closing one session's endpoint leaves the relay usable for a fresh one
#[tokio::test]
async fn test_fresh_endpoint_after_close() {
    let relay = InMemoryRelay::new();
    let call = CallId::new("fresh");
    let first = relay.open(&call, Role::Caller).await.unwrap();
    first.close().await.unwrap();
    assert!(first.is_closed());
    assert_err!(first.send(&SignalMessage::hangup(call.clone())).await);

    let second = relay.open(&call, Role::Caller).await.unwrap();
    assert_ok!(
        second
            .send(&SignalMessage::offer(call.clone(), SessionDescription::offer("v=0")))
            .await
    );
    assert_eq!(relay.sent_count(SignalKind::Offer), 1);
    assert_eq!(relay.pending(&call, Role::Callee), 1);
}

/// Test that a best-effort send during an outage is logged, not raised
#[tokio::test]
#[traced_test]
async fn test_best_effort_send_logs_failure() {
    let relay = InMemoryRelay::new();
    let call = CallId::new("best-effort");
    let transport = relay.open(&call, Role::Callee).await.unwrap();

    relay.set_available(false);
    assert!(!transport.send_best_effort(&SignalMessage::hangup(call.clone())).await);
    assert!(logs_contain("Signal send failed"));
    assert_eq!(relay.sent_count(SignalKind::Hangup), 0);
}
