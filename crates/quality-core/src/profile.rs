//! Resolution and frame-rate ladder
//!
//! The network picks a rung, the device caps it, and the lower of the two
//! wins. Downgrades apply at once; upgrades wait for confirmation.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bitrate::{NetworkClass, NetworkConditions};
use crate::error::{QualityError, QualityResult};

/// Video profile, ordered from lowest to highest quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoProfile {
    Mobile,
    Low,
    Medium,
    High,
    Ultra,
}

impl VideoProfile {
    pub const LADDER: [VideoProfile; 5] = [
        VideoProfile::Mobile,
        VideoProfile::Low,
        VideoProfile::Medium,
        VideoProfile::High,
        VideoProfile::Ultra,
    ];

    pub fn width(&self) -> u32 {
        match self {
            VideoProfile::Mobile => 640,
            VideoProfile::Low => 854,
            VideoProfile::Medium => 1280,
            VideoProfile::High | VideoProfile::Ultra => 1920,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            VideoProfile::Mobile => 360,
            VideoProfile::Low => 480,
            VideoProfile::Medium => 720,
            VideoProfile::High | VideoProfile::Ultra => 1080,
        }
    }

    pub fn frame_rate(&self) -> u32 {
        match self {
            VideoProfile::Mobile => 20,
            VideoProfile::Low => 24,
            VideoProfile::Medium | VideoProfile::High => 30,
            VideoProfile::Ultra => 60,
        }
    }

    pub fn bitrate_bps(&self) -> u64 {
        match self {
            VideoProfile::Mobile => 250_000,
            VideoProfile::Low => 500_000,
            VideoProfile::Medium => 1_000_000,
            VideoProfile::High => 2_500_000,
            VideoProfile::Ultra => 4_000_000,
        }
    }

    /// One rung lower, saturating at Mobile
    pub fn step_down(self) -> VideoProfile {
        match self {
            VideoProfile::Mobile | VideoProfile::Low => VideoProfile::Mobile,
            VideoProfile::Medium => VideoProfile::Low,
            VideoProfile::High => VideoProfile::Medium,
            VideoProfile::Ultra => VideoProfile::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProfile::Mobile => "mobile",
            VideoProfile::Low => "low",
            VideoProfile::Medium => "medium",
            VideoProfile::High => "high",
            VideoProfile::Ultra => "ultra",
        }
    }
}

impl fmt::Display for VideoProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// Device conditions reported by the media source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    /// 0.0 to 1.0; `None` on mains-only devices
    pub battery_level: Option<f64>,
    pub charging: bool,
    pub thermal: ThermalState,
    /// 0 to 100
    pub cpu_load_pct: Option<f64>,
    pub supports_ultra: bool,
    pub supports_high: bool,
    pub supports_hardware_acceleration: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            battery_level: None,
            charging: false,
            thermal: ThermalState::Nominal,
            cpu_load_pct: None,
            supports_ultra: true,
            supports_high: true,
            supports_hardware_acceleration: true,
        }
    }
}

impl DeviceState {
    /// Highest profile the device can sustain right now
    pub fn ceiling(&self) -> VideoProfile {
        let battery = match self.battery_level {
            Some(level) if !self.charging && level < 0.2 => VideoProfile::Mobile,
            Some(level) if !self.charging && level < 0.5 => VideoProfile::Low,
            Some(level) if !self.charging && level < 0.8 => VideoProfile::Medium,
            _ => VideoProfile::Ultra,
        };

        let thermal = match self.thermal {
            ThermalState::Critical => VideoProfile::Mobile,
            ThermalState::Serious => VideoProfile::Low,
            ThermalState::Fair => VideoProfile::Medium,
            ThermalState::Nominal => VideoProfile::Ultra,
        };

        let cpu = match self.cpu_load_pct {
            Some(load) if load >= 80.0 => VideoProfile::Low,
            Some(load) if load >= 70.0 => VideoProfile::Medium,
            Some(load) if load >= 50.0 => VideoProfile::High,
            _ => VideoProfile::Ultra,
        };

        let capability = if !self.supports_high {
            VideoProfile::Medium
        } else if !self.supports_ultra || !self.supports_hardware_acceleration {
            VideoProfile::High
        } else {
            VideoProfile::Ultra
        };

        battery.min(thermal).min(cpu).min(capability)
    }

    /// Frame-rate multiplier under thermal pressure
    pub fn frame_rate_scale(&self) -> f64 {
        match self.thermal {
            ThermalState::Nominal => 1.0,
            ThermalState::Fair => 0.9,
            ThermalState::Serious => 0.7,
            ThermalState::Critical => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub initial: VideoProfile,
    /// Consecutive evaluations an upgrade target must hold before it applies
    pub upgrade_confirmations: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            initial: VideoProfile::Medium,
            upgrade_confirmations: 2,
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> QualityResult<()> {
        if self.upgrade_confirmations == 0 {
            return Err(QualityError::invalid_configuration(
                "upgrade_confirmations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Encoder settings for a newly applied profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDecision {
    pub previous: VideoProfile,
    pub profile: VideoProfile,
    pub width: u32,
    pub height: u32,
    /// Ladder frame rate after thermal scaling
    pub frame_rate: u32,
    pub bitrate_bps: u64,
}

pub struct ProfileSelector {
    config: ProfileConfig,
    current: VideoProfile,
    frame_rate: u32,
    pending_upgrade: Option<(VideoProfile, u32)>,
}

impl ProfileSelector {
    pub fn new(config: ProfileConfig) -> Self {
        let current = config.initial;
        Self {
            config,
            current,
            frame_rate: current.frame_rate(),
            pending_upgrade: None,
        }
    }

    pub fn current(&self) -> VideoProfile {
        self.current
    }

    /// Profile the network alone would allow
    pub fn network_choice(conditions: &NetworkConditions, class: NetworkClass, device: &DeviceState) -> VideoProfile {
        if class == NetworkClass::Critical {
            return VideoProfile::Mobile;
        }

        let bandwidth = conditions.bandwidth_bps;
        let cpu = device.cpu_load_pct.unwrap_or(0.0);
        let mut profile = if bandwidth > 5_000_000.0 && cpu < 50.0 && device.supports_ultra {
            VideoProfile::Ultra
        } else if bandwidth > 2_000_000.0 && device.supports_high {
            VideoProfile::High
        } else if bandwidth > 1_000_000.0 {
            VideoProfile::Medium
        } else if bandwidth > 500_000.0 {
            VideoProfile::Low
        } else {
            VideoProfile::Mobile
        };

        if conditions.packet_loss_pct > 5.0 {
            profile = profile.step_down();
        }
        if conditions.latency_ms > 200.0 {
            profile = profile.step_down();
        }
        profile
    }

    /// Returns a decision only when the applied profile or frame rate changes
    pub fn evaluate(
        &mut self,
        conditions: &NetworkConditions,
        class: NetworkClass,
        device: &DeviceState,
    ) -> Option<ProfileDecision> {
        let network = Self::network_choice(conditions, class, device);
        let ceiling = device.ceiling();
        let target = network.min(ceiling);
        debug!(network = %network, ceiling = %ceiling, current = %self.current, "Evaluated video profile");

        if target > self.current {
            let confirmations = match self.pending_upgrade {
                Some((pending, count)) if pending == target => count + 1,
                _ => 1,
            };
            if confirmations < self.config.upgrade_confirmations {
                self.pending_upgrade = Some((target, confirmations));
                return self.rescale(device);
            }
        }
        self.pending_upgrade = None;

        if target == self.current {
            return self.rescale(device);
        }
        Some(self.apply(target, device))
    }

    /// Re-apply the current profile when thermal scaling changed its frame rate
    fn rescale(&mut self, device: &DeviceState) -> Option<ProfileDecision> {
        let frame_rate = Self::scaled_frame_rate(self.current, device);
        if frame_rate == self.frame_rate {
            return None;
        }
        Some(self.apply(self.current, device))
    }

    fn apply(&mut self, profile: VideoProfile, device: &DeviceState) -> ProfileDecision {
        let previous = self.current;
        let frame_rate = Self::scaled_frame_rate(profile, device);
        self.current = profile;
        self.frame_rate = frame_rate;

        if profile != previous {
            info!(from = %previous, to = %profile, frame_rate, "Switching video profile");
        }
        ProfileDecision {
            previous,
            profile,
            width: profile.width(),
            height: profile.height(),
            frame_rate,
            bitrate_bps: profile.bitrate_bps(),
        }
    }

    fn scaled_frame_rate(profile: VideoProfile, device: &DeviceState) -> u32 {
        ((profile.frame_rate() as f64 * device.frame_rate_scale()).round() as u32).max(1)
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
        self.frame_rate = self.current.frame_rate();
        self.pending_upgrade = None;
    }
}

impl Default for ProfileSelector {
    fn default() -> Self {
        Self::new(ProfileConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(bandwidth_bps: f64) -> NetworkConditions {
        NetworkConditions {
            bandwidth_bps,
            latency_ms: 40.0,
            packet_loss_pct: 0.0,
        }
    }

    #[test]
    fn test_network_choice_ladder() {
        let device = DeviceState::default();
        let good = NetworkClass::Good;
        assert_eq!(ProfileSelector::network_choice(&network(6e6), good, &device), VideoProfile::Ultra);
        assert_eq!(ProfileSelector::network_choice(&network(3e6), good, &device), VideoProfile::High);
        assert_eq!(ProfileSelector::network_choice(&network(1.5e6), good, &device), VideoProfile::Medium);
        assert_eq!(ProfileSelector::network_choice(&network(600e3), good, &device), VideoProfile::Low);
        assert_eq!(ProfileSelector::network_choice(&network(300e3), good, &device), VideoProfile::Mobile);

        let lossy_and_slow = NetworkConditions {
            bandwidth_bps: 3e6,
            latency_ms: 250.0,
            packet_loss_pct: 6.0,
        };
        assert_eq!(ProfileSelector::network_choice(&lossy_and_slow, good, &device), VideoProfile::Low);
        assert_eq!(
            ProfileSelector::network_choice(&network(6e6), NetworkClass::Critical, &device),
            VideoProfile::Mobile
        );
    }

    #[test]
    fn test_device_ceiling() {
        let low_battery = DeviceState {
            battery_level: Some(0.3),
            ..DeviceState::default()
        };
        assert_eq!(low_battery.ceiling(), VideoProfile::Low);

        let charging = DeviceState {
            charging: true,
            ..low_battery
        };
        assert_eq!(charging.ceiling(), VideoProfile::Ultra);

        let hot = DeviceState {
            thermal: ThermalState::Serious,
            ..DeviceState::default()
        };
        assert_eq!(hot.ceiling(), VideoProfile::Low);
        assert_eq!(hot.frame_rate_scale(), 0.7);
    }

    #[test]
    fn test_downgrade_is_immediate_upgrade_needs_confirmation() {
        let mut selector = ProfileSelector::default();
        let device = DeviceState::default();

        let decision = selector.evaluate(&network(300e3), NetworkClass::Poor, &device).unwrap();
        assert_eq!(decision.profile, VideoProfile::Mobile);
        assert_eq!((decision.width, decision.height, decision.frame_rate), (640, 360, 20));

        assert!(selector.evaluate(&network(3e6), NetworkClass::Good, &device).is_none());
        assert_eq!(selector.current(), VideoProfile::Mobile);
        let decision = selector.evaluate(&network(3e6), NetworkClass::Good, &device).unwrap();
        assert_eq!(decision.profile, VideoProfile::High);
        assert_eq!(decision.previous, VideoProfile::Mobile);
    }

    #[test]
    fn test_device_never_lifts_critical_downgrade() {
        let mut selector = ProfileSelector::default();
        let charging = DeviceState {
            charging: true,
            battery_level: Some(1.0),
            ..DeviceState::default()
        };
        let decision = selector.evaluate(&network(8e6), NetworkClass::Critical, &charging).unwrap();
        assert_eq!(decision.profile, VideoProfile::Mobile);
    }

    #[test]
    fn test_thermal_change_rescales_frame_rate() {
        let mut selector = ProfileSelector::default();
        let medium = network(1.5e6);
        assert!(selector.evaluate(&medium, NetworkClass::Good, &DeviceState::default()).is_none());

        let warm = DeviceState {
            thermal: ThermalState::Fair,
            ..DeviceState::default()
        };
        let decision = selector.evaluate(&medium, NetworkClass::Good, &warm).unwrap();
        assert_eq!(decision.profile, VideoProfile::Medium);
        assert_eq!(decision.frame_rate, 27);
        assert!(selector.evaluate(&medium, NetworkClass::Good, &warm).is_none());
    }
}
