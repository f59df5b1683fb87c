//! Quality monitoring and sender adaptation on a live call

mod common;

use std::time::Duration;

use common::{Endpoint, LinkConditions, advance, wait_for_state};
use peercall_call_core::{CallConfig, CallEvent, CallState};
use peercall_quality_core::{DeviceState, QualityRating, VideoProfile};
use peercall_signal_core::{CallId, InMemoryRelay};

async fn connect(relay: &InMemoryRelay, call_id: &CallId) -> (Endpoint, Endpoint) {
    let caller = Endpoint::new(relay, CallConfig::default());
    let callee = Endpoint::new(relay, CallConfig::default());
    caller.controller.start_call(call_id.clone()).await.unwrap();
    callee.controller.accept_call(call_id.clone()).await.unwrap();
    wait_for_state(&caller.controller, CallState::Connected).await;
    wait_for_state(&callee.controller, CallState::Connected).await;
    (caller, callee)
}

/// Test that heavy loss raises an alert and cuts the pushed bitrate
#[tokio::test(start_paused = true)]
async fn test_heavy_loss_alerts_and_reduces_bitrate() {
    let relay = InMemoryRelay::new();
    let (mut caller, _callee) = connect(&relay, &CallId::new("lossy")).await;
    advance(Duration::from_secs(5)).await;
    let before = caller.controller.snapshot().unwrap().bitrate_bps;
    caller.drain_events();

    caller.peers.peer(0).set_link(LinkConditions {
        loss_pct: 12.0,
        ..LinkConditions::default()
    });
    advance(Duration::from_secs(5)).await;

    let events = caller.drain_events();
    assert!(events.iter().any(|e| matches!(e, CallEvent::QualityAlert { rating: QualityRating::Critical, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::QualityChanged { previous: Some(previous), .. } if previous.is_healthy()
    )));
    let cut = events.iter().find_map(|e| match e {
        CallEvent::BitrateChanged { current_bps, .. } => Some(*current_bps),
        _ => None,
    });
    let cut = cut.expect("no bitrate change");
    assert!(cut < before);

    let snapshot = caller.controller.snapshot().unwrap();
    assert_eq!(snapshot.last_rating, Some(QualityRating::Critical));
    assert!(
        caller
            .peers
            .peer(0)
            .encodings()
            .iter()
            .any(|p| p.max_bitrate_bps == Some(cut))
    );
}

/// Test that a clean link produces no alerts and no downgrades
#[tokio::test(start_paused = true)]
async fn test_clean_link_stays_quiet() {
    let relay = InMemoryRelay::new();
    let (mut caller, _callee) = connect(&relay, &CallId::new("clean")).await;
    advance(Duration::from_secs(30)).await;

    let events = caller.drain_events();
    assert!(!events.iter().any(|e| matches!(e, CallEvent::QualityAlert { .. })));
    assert!(!events.iter().any(|e| matches!(
        e,
        CallEvent::ProfileChanged { previous, current, .. } if current < previous
    )));
    let rating = caller.controller.snapshot().unwrap().last_rating.unwrap();
    assert!(rating.is_healthy());
}

/// Test that a draining battery caps the video profile on the next tick
#[tokio::test(start_paused = true)]
async fn test_low_battery_downgrades_profile() {
    let relay = InMemoryRelay::new();
    let (mut caller, _callee) = connect(&relay, &CallId::new("battery")).await;
    advance(Duration::from_secs(3)).await;
    caller.drain_events();

    caller
        .controller
        .update_device_state(DeviceState {
            battery_level: Some(0.1),
            charging: false,
            ..DeviceState::default()
        })
        .await
        .unwrap();
    advance(Duration::from_secs(3)).await;

    let events = caller.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::ProfileChanged { current: VideoProfile::Mobile, .. }
    )));
    assert_eq!(caller.controller.snapshot().unwrap().profile, VideoProfile::Mobile);
    let mobile = caller.peers.peer(0).encodings().into_iter().rev().find(|p| p.width.is_some());
    assert_eq!(mobile.and_then(|p| p.width), Some(VideoProfile::Mobile.width()));
}
