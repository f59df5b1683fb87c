//! Adaptive bitrate control
//!
//! Each sample is classified by a simple additive score, the class picks a
//! multiplier, and the current bitrate moves a fraction of the way toward
//! the resulting target. `min_bps <= current <= max_bps` holds after every
//! update.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{QualityError, QualityResult};
use crate::sample::QualitySample;

const DECISION_HISTORY: usize = 50;

/// Network measurements the predictor scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    pub bandwidth_bps: f64,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
}

impl From<&QualitySample> for NetworkConditions {
    fn from(sample: &QualitySample) -> Self {
        Self {
            bandwidth_bps: sample.bitrate.total_bps(),
            latency_ms: sample.round_trip_time_ms,
            packet_loss_pct: sample.packet_loss_pct,
        }
    }
}

/// Predicted network class, best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkClass::Excellent => "excellent",
            NetworkClass::Good => "good",
            NetworkClass::Fair => "fair",
            NetworkClass::Poor => "poor",
            NetworkClass::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Score tiers for the predictor; a metric earns 3/2/1 points for meeting
/// the excellent/good/fair tier and 0 otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionThresholds {
    /// Minimum bandwidth per tier, bits per second
    pub bandwidth_bps: [f64; 3],
    /// Maximum latency per tier, milliseconds
    pub latency_ms: [f64; 3],
    /// Maximum loss per tier, percent
    pub packet_loss_pct: [f64; 3],
    /// Minimum summed score for excellent/good/fair/poor
    pub class_scores: [u32; 4],
}

impl Default for PredictionThresholds {
    fn default() -> Self {
        Self {
            bandwidth_bps: [3_000_000.0, 1_500_000.0, 800_000.0],
            latency_ms: [50.0, 100.0, 200.0],
            packet_loss_pct: [0.5, 1.0, 2.0],
            class_scores: [8, 6, 4, 2],
        }
    }
}

impl PredictionThresholds {
    pub fn validate(&self) -> QualityResult<()> {
        let [b0, b1, b2] = self.bandwidth_bps;
        if !(b0 >= b1 && b1 >= b2) {
            return Err(QualityError::unordered("prediction.bandwidth_bps", "tiers must be descending"));
        }
        let [l0, l1, l2] = self.latency_ms;
        if !(l0 <= l1 && l1 <= l2) {
            return Err(QualityError::unordered("prediction.latency_ms", "tiers must be ascending"));
        }
        let [p0, p1, p2] = self.packet_loss_pct;
        if !(p0 <= p1 && p1 <= p2) {
            return Err(QualityError::unordered("prediction.packet_loss_pct", "tiers must be ascending"));
        }
        let [s0, s1, s2, s3] = self.class_scores;
        if !(s0 >= s1 && s1 >= s2 && s2 >= s3) {
            return Err(QualityError::unordered("prediction.class_scores", "scores must be descending"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BitratePredictor {
    thresholds: PredictionThresholds,
}

impl BitratePredictor {
    pub fn new(thresholds: PredictionThresholds) -> Self {
        Self { thresholds }
    }

    /// Summed 0-9 score
    pub fn score(&self, conditions: &NetworkConditions) -> u32 {
        let t = &self.thresholds;
        let tier = |hits: [bool; 3]| match hits {
            [true, _, _] => 3,
            [_, true, _] => 2,
            [_, _, true] => 1,
            _ => 0,
        };

        let bandwidth = tier(t.bandwidth_bps.map(|min| conditions.bandwidth_bps >= min));
        let latency = tier(t.latency_ms.map(|max| conditions.latency_ms <= max));
        let loss = tier(t.packet_loss_pct.map(|max| conditions.packet_loss_pct <= max));
        bandwidth + latency + loss
    }

    pub fn predict(&self, conditions: &NetworkConditions) -> NetworkClass {
        let score = self.score(conditions);
        let [excellent, good, fair, poor] = self.thresholds.class_scores;
        if score >= excellent {
            NetworkClass::Excellent
        } else if score >= good {
            NetworkClass::Good
        } else if score >= fair {
            NetworkClass::Fair
        } else if score >= poor {
            NetworkClass::Poor
        } else {
            NetworkClass::Critical
        }
    }
}

/// Bounds and step sizes for the adaptive bitrate controller
///
/// # Examples
///
/// ```rust
/// # use peercall_quality_core::BitrateConfig;
/// let config = BitrateConfig::default();
/// assert_eq!(config.initial_bps, 1_000_000.0);
/// assert!(config.validate().is_ok());
///
/// // Audio-only calls never need more than 128 kbps
/// let audio = BitrateConfig {
///     initial_bps: 64_000.0,
///     min_bps: 16_000.0,
///     max_bps: 128_000.0,
///     ..BitrateConfig::default()
/// };
/// assert!(audio.validate().is_ok());
///
/// let stalled = BitrateConfig {
///     adaptation_speed: 0.0,
///     ..BitrateConfig::default()
/// };
/// assert!(stalled.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    pub initial_bps: f64,
    pub min_bps: f64,
    pub max_bps: f64,
    /// Fraction of the gap to the target closed per step, in (0, 1]
    pub adaptation_speed: f64,
    /// Target multiplier per class: excellent, good, fair, poor, critical
    pub multipliers: [f64; 5],
    pub preemptive_factor: f64,
    pub increase_factor: f64,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            initial_bps: 1_000_000.0,
            min_bps: 250_000.0,
            max_bps: 4_000_000.0,
            adaptation_speed: 0.1,
            multipliers: [1.2, 1.1, 1.0, 0.8, 0.6],
            preemptive_factor: 0.7,
            increase_factor: 1.3,
        }
    }
}

impl BitrateConfig {
    pub fn validate(&self) -> QualityResult<()> {
        if !(self.min_bps > 0.0) {
            return Err(QualityError::invalid_bitrate("min_bps", "must be positive"));
        }
        if self.min_bps > self.max_bps {
            return Err(QualityError::invalid_bitrate(
                "max_bps",
                format!("min {} exceeds max {}", self.min_bps, self.max_bps),
            ));
        }
        if !(self.adaptation_speed > 0.0 && self.adaptation_speed <= 1.0) {
            return Err(QualityError::invalid_bitrate("adaptation_speed", "must be in (0, 1]"));
        }
        if self.multipliers.iter().any(|m| !(*m > 0.0)) {
            return Err(QualityError::invalid_bitrate("multipliers", "must be positive"));
        }
        Ok(())
    }

    fn multiplier(&self, class: NetworkClass) -> f64 {
        match class {
            NetworkClass::Excellent => self.multipliers[0],
            NetworkClass::Good => self.multipliers[1],
            NetworkClass::Fair => self.multipliers[2],
            NetworkClass::Poor => self.multipliers[3],
            NetworkClass::Critical => self.multipliers[4],
        }
    }
}

/// Outcome of one adaptation step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BitrateDecision {
    pub class: NetworkClass,
    pub previous_bps: f64,
    pub target_bps: f64,
    pub current_bps: f64,
}

impl BitrateDecision {
    /// Relative change from the previous bitrate
    pub fn relative_change(&self) -> f64 {
        if self.previous_bps <= 0.0 {
            return 0.0;
        }
        (self.current_bps - self.previous_bps).abs() / self.previous_bps
    }
}

pub struct AdaptiveBitrateController {
    config: BitrateConfig,
    predictor: BitratePredictor,
    current_bps: f64,
    decisions: VecDeque<BitrateDecision>,
}

impl AdaptiveBitrateController {
    pub fn new(config: BitrateConfig, thresholds: PredictionThresholds) -> Self {
        let current_bps = config.initial_bps.clamp(config.min_bps, config.max_bps);
        Self {
            config,
            predictor: BitratePredictor::new(thresholds),
            current_bps,
            decisions: VecDeque::with_capacity(DECISION_HISTORY),
        }
    }

    pub fn current_bps(&self) -> f64 {
        self.current_bps
    }

    /// Current bitrate rounded for an encoder
    pub fn current_encoding_bps(&self) -> u64 {
        self.current_bps.round() as u64
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.config.min_bps, self.config.max_bps)
    }

    pub fn classify(&self, conditions: &NetworkConditions) -> NetworkClass {
        self.predictor.predict(conditions)
    }

    /// One smoothed step toward the class target
    pub fn adapt(&mut self, conditions: &NetworkConditions) -> BitrateDecision {
        let class = self.predictor.predict(conditions);
        let previous_bps = self.current_bps;
        let target_bps = self.clamp(previous_bps * self.config.multiplier(class));

        self.current_bps = self.clamp(previous_bps + (target_bps - previous_bps) * self.config.adaptation_speed);

        let decision = BitrateDecision {
            class,
            previous_bps,
            target_bps,
            current_bps: self.current_bps,
        };
        match class {
            NetworkClass::Poor | NetworkClass::Critical => debug!(
                class = %class,
                bitrate_kbps = (self.current_bps / 1000.0) as u64,
                "Adapting to poor network: decreasing bitrate"
            ),
            _ => debug!(
                class = %class,
                bitrate_kbps = (self.current_bps / 1000.0) as u64,
                "Adapting bitrate"
            ),
        }
        self.record(decision);
        decision
    }

    /// Immediate cut on a sudden critical signal
    pub fn preemptively_reduce(&mut self) -> f64 {
        let previous = self.current_bps;
        self.current_bps = self.clamp(previous * self.config.preemptive_factor);
        warn!(
            from_kbps = (previous / 1000.0) as u64,
            to_kbps = (self.current_bps / 1000.0) as u64,
            "Preemptively reducing bitrate"
        );
        self.current_bps
    }

    /// Step up after sustained good conditions
    pub fn gradually_increase(&mut self) -> f64 {
        let previous = self.current_bps;
        self.current_bps = self.clamp(previous * self.config.increase_factor);
        info!(
            from_kbps = (previous / 1000.0) as u64,
            to_kbps = (self.current_bps / 1000.0) as u64,
            "Increasing bitrate after sustained good quality"
        );
        self.current_bps
    }

    /// Recent decisions, oldest first
    pub fn decisions(&self) -> impl Iterator<Item = &BitrateDecision> {
        self.decisions.iter()
    }

    fn clamp(&self, bps: f64) -> f64 {
        if bps.is_nan() {
            return self.config.min_bps;
        }
        bps.clamp(self.config.min_bps, self.config.max_bps)
    }

    fn record(&mut self, decision: BitrateDecision) {
        if self.decisions.len() >= DECISION_HISTORY {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }
}

impl Default for AdaptiveBitrateController {
    fn default() -> Self {
        Self::new(BitrateConfig::default(), PredictionThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn conditions(bandwidth_bps: f64, latency_ms: f64, packet_loss_pct: f64) -> NetworkConditions {
        NetworkConditions {
            bandwidth_bps,
            latency_ms,
            packet_loss_pct,
        }
    }

    #[test]
    fn test_prediction_classes() {
        let predictor = BitratePredictor::default();
        assert_eq!(predictor.predict(&conditions(4e6, 30.0, 0.1)), NetworkClass::Excellent);
        assert_eq!(predictor.score(&conditions(2e6, 80.0, 0.8)), 6);
        assert_eq!(predictor.predict(&conditions(2e6, 80.0, 0.8)), NetworkClass::Good);
        assert_eq!(predictor.predict(&conditions(1e6, 150.0, 1.5)), NetworkClass::Poor);
        assert_eq!(predictor.predict(&conditions(100e3, 600.0, 12.0)), NetworkClass::Critical);
    }

    #[test]
    fn test_smoothing_moves_a_fraction_of_the_gap() {
        let mut controller = AdaptiveBitrateController::default();
        let decision = controller.adapt(&conditions(4e6, 30.0, 0.1));
        assert_eq!(decision.class, NetworkClass::Excellent);
        assert!((decision.target_bps - 1_200_000.0).abs() < 1e-6);
        assert!((decision.current_bps - 1_020_000.0).abs() < 1e-6);
        assert!((decision.relative_change() - 0.02).abs() < 1e-9);
    }

    #[test]
    #[traced_test]
    fn test_emergency_paths_are_clamped() {
        let mut controller = AdaptiveBitrateController::default();
        for _ in 0..10 {
            controller.preemptively_reduce();
        }
        assert_eq!(controller.current_bps(), 250_000.0);
        for _ in 0..20 {
            controller.gradually_increase();
        }
        assert_eq!(controller.current_bps(), 4_000_000.0);
        assert!(logs_contain("Preemptively reducing bitrate"));
    }

    #[test]
    fn test_config_validation() {
        assert!(BitrateConfig::default().validate().is_ok());
        let inverted = BitrateConfig {
            min_bps: 5e6,
            ..BitrateConfig::default()
        };
        assert!(inverted.validate().is_err());
        let frozen = BitrateConfig {
            adaptation_speed: 0.0,
            ..BitrateConfig::default()
        };
        assert!(frozen.validate().is_err());
        assert!(PredictionThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_decision_history_is_bounded() {
        let mut controller = AdaptiveBitrateController::default();
        for _ in 0..80 {
            controller.adapt(&conditions(2e6, 80.0, 0.8));
        }
        assert_eq!(controller.decisions().count(), DECISION_HISTORY);
    }
}
