//! Raw connection statistics and per-interval quality samples

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Cumulative byte counters for one media kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// A stats report as a peer connection produces it
///
/// Counters are cumulative since the connection started; jitter and RTT
/// are the latest point values.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub captured_at: Instant,
    /// `None` when the call carries no audio track
    pub audio: Option<MediaCounters>,
    /// `None` when the call carries no video track
    pub video: Option<MediaCounters>,
    /// Packets the remote reports as lost
    pub packets_lost: u64,
    pub packets_received: u64,
    pub jitter_ms: f64,
    pub round_trip_time_ms: f64,
}

/// Directional bitrate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bitrate {
    pub inbound_bps: f64,
    pub outbound_bps: f64,
}

impl Bitrate {
    pub fn total_bps(&self) -> f64 {
        self.inbound_bps + self.outbound_bps
    }
}

/// Point-in-time measurement over one sampling interval
#[derive(Debug, Clone, PartialEq)]
pub struct QualitySample {
    pub timestamp: Instant,
    /// Packets lost during the interval
    pub packets_lost: u64,
    /// Loss over the interval, in percent
    pub packet_loss_pct: f64,
    pub jitter_ms: f64,
    pub round_trip_time_ms: f64,
    pub bitrate: Bitrate,
    /// Outbound video bitrate; `None` without a video track
    pub video_bitrate_bps: Option<f64>,
    /// Outbound audio bitrate; `None` without an audio track
    pub audio_bitrate_bps: Option<f64>,
}

impl QualitySample {
    /// A healthy audio+video sample, handy as a starting point
    pub fn nominal(timestamp: Instant) -> Self {
        Self {
            timestamp,
            packets_lost: 0,
            packet_loss_pct: 0.0,
            jitter_ms: 5.0,
            round_trip_time_ms: 40.0,
            bitrate: Bitrate {
                inbound_bps: 1_500_000.0,
                outbound_bps: 1_500_000.0,
            },
            video_bitrate_bps: Some(1_400_000.0),
            audio_bitrate_bps: Some(96_000.0),
        }
    }

    pub fn with_packet_loss(mut self, pct: f64) -> Self {
        self.packet_loss_pct = pct;
        self
    }

    pub fn with_round_trip_time(mut self, rtt_ms: f64) -> Self {
        self.round_trip_time_ms = rtt_ms;
        self
    }

    pub fn with_jitter(mut self, jitter_ms: f64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_bandwidth(mut self, inbound_bps: f64, outbound_bps: f64) -> Self {
        self.bitrate = Bitrate {
            inbound_bps,
            outbound_bps,
        };
        self
    }

    pub fn with_media_bitrates(mut self, video_bps: Option<f64>, audio_bps: Option<f64>) -> Self {
        self.video_bitrate_bps = video_bps;
        self.audio_bitrate_bps = audio_bps;
        self
    }
}

/// Turns consecutive cumulative snapshots into interval samples
#[derive(Debug, Default)]
pub struct StatsSampler {
    previous: Option<StatsSnapshot>,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the baseline, e.g. after the peer connection was replaced
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Feed a snapshot; the first one only establishes the baseline
    pub fn sample(&mut self, snapshot: StatsSnapshot) -> Option<QualitySample> {
        let Some(previous) = self.previous.take() else {
            self.previous = Some(snapshot);
            return None;
        };

        let elapsed = snapshot
            .captured_at
            .saturating_duration_since(previous.captured_at)
            .as_secs_f64();
        if elapsed <= 0.0 {
            self.previous = Some(previous);
            return None;
        }

        let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 * 8.0 / elapsed;
        let media = |now: Option<MediaCounters>, before: Option<MediaCounters>| {
            now.map(|n| {
                let b = before.unwrap_or_default();
                Bitrate {
                    inbound_bps: rate(n.bytes_received, b.bytes_received),
                    outbound_bps: rate(n.bytes_sent, b.bytes_sent),
                }
            })
        };
        let audio = media(snapshot.audio, previous.audio);
        let video = media(snapshot.video, previous.video);

        let lost = snapshot.packets_lost.saturating_sub(previous.packets_lost);
        let received = snapshot.packets_received.saturating_sub(previous.packets_received);
        let packet_loss_pct = if lost + received > 0 {
            lost as f64 / (lost + received) as f64 * 100.0
        } else {
            0.0
        };

        let bitrate = [audio, video].iter().flatten().fold(Bitrate::default(), |acc, b| Bitrate {
            inbound_bps: acc.inbound_bps + b.inbound_bps,
            outbound_bps: acc.outbound_bps + b.outbound_bps,
        });

        let sample = QualitySample {
            timestamp: snapshot.captured_at,
            packets_lost: lost,
            packet_loss_pct,
            jitter_ms: snapshot.jitter_ms,
            round_trip_time_ms: snapshot.round_trip_time_ms,
            bitrate,
            video_bitrate_bps: video.map(|b| b.outbound_bps),
            audio_bitrate_bps: audio.map(|b| b.outbound_bps),
        };
        trace!(
            loss_pct = sample.packet_loss_pct,
            rtt_ms = sample.round_trip_time_ms,
            total_bps = sample.bitrate.total_bps(),
            "Derived quality sample"
        );

        self.previous = Some(snapshot);
        Some(sample)
    }
}
