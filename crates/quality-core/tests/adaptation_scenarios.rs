//! End-to-end runs of the quality pipeline over scripted network conditions

use std::time::{Duration, Instant};

use peercall_quality_core::{
    AdaptiveBitrateController, BitrateConfig, DeviceState, MediaCounters, MonitorConfig, NetworkClass,
    NetworkConditions, PredictionThresholds, ProfileSelector, QualityMonitor, QualityRating, QualitySample,
    QualityThresholds, StatsSampler, StatsSnapshot, VideoProfile,
};

#[test]
fn test_loss_spike_raises_a_single_alert() {
    let mut monitor = QualityMonitor::new(QualityThresholds::default(), MonitorConfig::default());
    let start = Instant::now();
    let at = |secs: u64| start + Duration::from_secs(secs);

    let clean = monitor.observe(QualitySample::nominal(at(0)).with_packet_loss(0.05), at(0));
    assert_eq!(clean.assessment.overall, QualityRating::Excellent);
    assert!(clean.alert.is_none());

    let mut alerts = 0;
    let mut changes = 0;
    for secs in [2, 4, 6] {
        let update = monitor.observe(QualitySample::nominal(at(secs)).with_packet_loss(12.0), at(secs));
        assert_eq!(update.assessment.packet_loss, QualityRating::Critical);
        assert_eq!(update.assessment.overall, QualityRating::Critical);
        changes += update.change.is_some() as usize;
        alerts += update.alert.is_some() as usize;
    }

    assert_eq!(changes, 1);
    assert_eq!(alerts, 1);
    assert_eq!(monitor.alert_history().count(), 1);
}

#[test]
fn test_sustained_poor_network_converges_down() {
    let mut controller = AdaptiveBitrateController::new(BitrateConfig::default(), PredictionThresholds::default());
    let poor = NetworkConditions {
        bandwidth_bps: 1_000_000.0,
        latency_ms: 150.0,
        packet_loss_pct: 1.5,
    };

    // Each step closes a tenth of the gap to 80% of the current rate
    let trajectory = [980_000.0, 960_400.0, 941_192.0, 922_368.16, 903_920.7968];
    for expected in trajectory {
        let decision = controller.adapt(&poor);
        assert_eq!(decision.class, NetworkClass::Poor);
        assert!(decision.current_bps < decision.previous_bps);
        assert!((decision.current_bps - expected).abs() < 1.0, "{} vs {expected}", decision.current_bps);
    }

    let current = controller.current_bps();
    assert!((current - 903_920.8).abs() < 1.0, "{current}");
    assert!(current >= 250_000.0);
}

#[test]
fn test_stats_pipeline_from_cumulative_counters() {
    let start = Instant::now();
    let mut sampler = StatsSampler::new();
    let mut monitor = QualityMonitor::new(QualityThresholds::default(), MonitorConfig::default());

    let mut video_sent = 0u64;
    let mut audio_sent = 0u64;
    let mut received = 0u64;
    let mut updates = Vec::new();
    for tick in 0..4u64 {
        let snapshot = StatsSnapshot {
            captured_at: start + Duration::from_secs(tick * 2),
            audio: Some(MediaCounters {
                bytes_sent: audio_sent,
                bytes_received: audio_sent,
            }),
            video: Some(MediaCounters {
                bytes_sent: video_sent,
                bytes_received: video_sent,
            }),
            packets_lost: 0,
            packets_received: received,
            jitter_ms: 4.0,
            round_trip_time_ms: 35.0,
        };
        if let Some(sample) = sampler.sample(snapshot) {
            updates.push(monitor.observe(sample, start + Duration::from_secs(tick * 2)));
        }
        // 1.2 Mbps video and 80 kbps audio over each 2 s interval
        video_sent += 300_000;
        audio_sent += 20_000;
        received += 400;
    }

    assert_eq!(updates.len(), 3);
    assert!(updates[0].change.is_some());
    assert!(updates.iter().skip(1).all(|u| u.change.is_none()));
    assert!(updates.iter().all(|u| u.assessment.overall == QualityRating::Excellent));
    assert_eq!(monitor.history().len(), 3);
}

#[test]
fn test_profile_follows_network_and_device() {
    let mut selector = ProfileSelector::default();
    let mut device = DeviceState::default();
    let fast = NetworkConditions {
        bandwidth_bps: 6_000_000.0,
        latency_ms: 30.0,
        packet_loss_pct: 0.1,
    };

    assert!(selector.evaluate(&fast, NetworkClass::Excellent, &device).is_none());
    let decision = selector.evaluate(&fast, NetworkClass::Excellent, &device).unwrap();
    assert_eq!(decision.profile, VideoProfile::Ultra);
    assert_eq!(decision.frame_rate, 60);

    device.battery_level = Some(0.15);
    let decision = selector.evaluate(&fast, NetworkClass::Excellent, &device).unwrap();
    assert_eq!(decision.profile, VideoProfile::Mobile);
    assert_eq!(decision.bitrate_bps, 250_000);
}
