//! Per-tick quality wiring
//!
//! Turns one stats snapshot into a quality update and, when warranted, new
//! sender parameters. The session driver calls [`MediaAdapter::on_snapshot`]
//! on every stats tick while the call is connected.

use peercall_quality_core::{
    AdaptiveBitrateController, DeviceState, NetworkConditions, ProfileDecision, ProfileSelector, QualityMonitor,
    QualityUpdate, StatsSampler, StatsSnapshot, VideoProfile,
};
use tracing::debug;

use crate::config::CallConfig;
use crate::peer::EncodingParameters;

/// Everything one stats tick produced
#[derive(Debug, Clone)]
pub struct AdaptationOutcome {
    pub update: QualityUpdate,
    /// `(previous, current)` when the pushed bitrate moved
    pub bitrate_change: Option<(u64, u64)>,
    pub profile_change: Option<ProfileDecision>,
    /// Parameters to push; empty when nothing moved enough
    pub encoding: EncodingParameters,
}

pub struct MediaAdapter {
    sampler: StatsSampler,
    monitor: QualityMonitor,
    bitrate: AdaptiveBitrateController,
    profiles: ProfileSelector,
    video: bool,
    push_threshold: f64,
    increase_after: u32,
    healthy_streak: u32,
    pushed_bps: u64,
}

impl MediaAdapter {
    pub fn new(config: &CallConfig) -> Self {
        let bitrate = AdaptiveBitrateController::new(config.bitrate.clone(), config.prediction.clone());
        let pushed_bps = bitrate.current_encoding_bps();
        Self {
            sampler: StatsSampler::new(),
            monitor: QualityMonitor::new(config.thresholds.clone(), config.monitor.clone()),
            bitrate,
            profiles: ProfileSelector::new(config.profile.clone()),
            video: config.media.video.is_some(),
            push_threshold: config.bitrate_push_threshold,
            increase_after: config.increase_after_good_samples,
            healthy_streak: 0,
            pushed_bps,
        }
    }

    pub fn profile(&self) -> VideoProfile {
        self.profiles.current()
    }

    pub fn current_bps(&self) -> u64 {
        self.bitrate.current_encoding_bps()
    }

    pub fn monitor(&self) -> &QualityMonitor {
        &self.monitor
    }

    /// Drop the stats baseline after the peer connection was replaced
    pub fn restart(&mut self) {
        self.sampler.reset();
        self.healthy_streak = 0;
    }

    /// Feed one snapshot; the first after a restart only sets the baseline
    pub fn on_snapshot(&mut self, snapshot: StatsSnapshot, device: &DeviceState) -> Option<AdaptationOutcome> {
        let sample = self.sampler.sample(snapshot)?;
        let now = sample.timestamp;
        let conditions = NetworkConditions::from(&sample);
        let update = self.monitor.observe(sample, now);
        let overall = update.assessment.overall;

        let entered_alert = update
            .change
            .is_some_and(|c| c.current.overall.is_alerting() && !c.previous.is_some_and(|p| p.overall.is_alerting()));

        if entered_alert {
            self.bitrate.preemptively_reduce();
            self.healthy_streak = 0;
        } else {
            self.bitrate.adapt(&conditions);
            if overall.is_healthy() {
                self.healthy_streak += 1;
                if self.healthy_streak >= self.increase_after {
                    self.bitrate.gradually_increase();
                    self.healthy_streak = 0;
                }
            } else {
                self.healthy_streak = 0;
            }
        }

        let mut encoding = EncodingParameters::default();
        let current_bps = self.bitrate.current_encoding_bps();
        let moved = current_bps.abs_diff(self.pushed_bps) as f64 / self.pushed_bps.max(1) as f64;
        let bitrate_change = if moved >= self.push_threshold && current_bps != self.pushed_bps {
            let previous = self.pushed_bps;
            self.pushed_bps = current_bps;
            encoding.max_bitrate_bps = Some(current_bps);
            Some((previous, current_bps))
        } else {
            None
        };

        let profile_change = if self.video {
            let class = self.bitrate.classify(&conditions);
            self.profiles.evaluate(&conditions, class, device)
        } else {
            None
        };
        if let Some(decision) = &profile_change {
            encoding.width = Some(decision.width);
            encoding.height = Some(decision.height);
            encoding.max_frame_rate = Some(decision.frame_rate);
        }

        debug!(
            overall = %overall,
            mos = update.score.mos,
            bitrate_kbps = current_bps / 1000,
            pushed = !encoding.is_empty(),
            "Quality tick"
        );

        Some(AdaptationOutcome {
            update,
            bitrate_change,
            profile_change,
            encoding,
        })
    }
}
