use serde::{Deserialize, Serialize};

use crate::sample::QualitySample;

/// Quality score (including MOS, R-factor)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Mean Opinion Score (1.0-4.5)
    pub mos: f64,
    /// R-factor (0-100, 0=worst, 100=best)
    pub r_factor: f64,
    pub level: QualityLevel,
}

impl Default for QualityScore {
    fn default() -> Self {
        Self {
            mos: 4.0,
            r_factor: 80.0,
            level: QualityLevel::Good,
        }
    }
}

/// Quality level categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// MOS >= 4.3
    Excellent,
    /// MOS 4.0-4.3
    Good,
    /// MOS 3.6-4.0
    Fair,
    /// MOS 3.1-3.6
    Poor,
    /// MOS < 3.1
    Bad,
}

impl QualityLevel {
    pub fn from_mos(mos: f64) -> Self {
        if mos >= 4.3 {
            Self::Excellent
        } else if mos >= 4.0 {
            Self::Good
        } else if mos >= 3.6 {
            Self::Fair
        } else if mos >= 3.1 {
            Self::Poor
        } else {
            Self::Bad
        }
    }

    pub fn from_r_factor(r: f64) -> Self {
        if r >= 90.0 {
            Self::Excellent
        } else if r >= 80.0 {
            Self::Good
        } else if r >= 70.0 {
            Self::Fair
        } else if r >= 60.0 {
            Self::Poor
        } else {
            Self::Bad
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent quality, very satisfied",
            Self::Good => "Good quality, satisfied",
            Self::Fair => "Fair quality, some users dissatisfied",
            Self::Poor => "Poor quality, many users dissatisfied",
            Self::Bad => "Bad quality, nearly all users dissatisfied",
        }
    }
}

/// Continuous quality score from RTT, loss and jitter (ITU-T G.107 E-model, simplified)
///
/// Independent of the discrete [`QualityRating`](crate::QualityRating); used
/// for finer-grained display.
#[derive(Debug, Clone)]
pub struct QualityEstimator {
    last_score: QualityScore,
    base_r_factor: f64,
}

impl QualityEstimator {
    pub fn new() -> Self {
        Self {
            last_score: QualityScore::default(),
            base_r_factor: 93.2,
        }
    }

    /// Use a codec-specific base R-factor (Opus is about 93.5)
    pub fn with_codec_quality(base_r_factor: f64) -> Self {
        Self {
            last_score: QualityScore::default(),
            base_r_factor: base_r_factor.clamp(0.0, 100.0),
        }
    }

    pub fn estimate(&mut self, sample: &QualitySample) -> QualityScore {
        let r_factor = self.r_factor(sample.round_trip_time_ms, sample.packet_loss_pct, sample.jitter_ms);
        let mos = Self::mos_from_r(r_factor);
        self.last_score = QualityScore {
            mos,
            r_factor,
            level: QualityLevel::from_mos(mos),
        };
        self.last_score
    }

    /// Last calculated score
    pub fn score(&self) -> QualityScore {
        self.last_score
    }

    /// R = R0 - Id - Ie_eff - Is
    pub fn r_factor(&self, rtt_ms: f64, loss_pct: f64, jitter_ms: f64) -> f64 {
        let id = Self::delay_impairment(rtt_ms / 2.0);
        let ie_eff = Self::loss_impairment(loss_pct);
        let is = Self::jitter_impairment(jitter_ms);
        (self.base_r_factor - id - ie_eff - is).clamp(0.0, 100.0)
    }

    pub fn mos_from_r(r: f64) -> f64 {
        if r <= 0.0 {
            return 1.0;
        }
        let mos = 1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7.0e-6;
        mos.clamp(1.0, 4.5)
    }

    fn delay_impairment(one_way_delay_ms: f64) -> f64 {
        // Negligible below 100ms one-way
        if one_way_delay_ms < 100.0 {
            return 0.0;
        }
        let excess = (one_way_delay_ms - 177.3).max(0.0);
        (0.024 * one_way_delay_ms + 0.11 * excess).clamp(0.0, 30.0)
    }

    fn loss_impairment(loss_pct: f64) -> f64 {
        let loss = loss_pct.max(0.0);
        (30.0 * loss / (loss + 10.0)).clamp(0.0, 40.0)
    }

    fn jitter_impairment(jitter_ms: f64) -> f64 {
        if jitter_ms < 20.0 {
            0.0
        } else {
            ((jitter_ms - 20.0) * 0.2).clamp(0.0, 15.0)
        }
    }
}

impl Default for QualityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_clean_path_scores_high() {
        let mut estimator = QualityEstimator::new();
        let score = estimator.estimate(&QualitySample::nominal(Instant::now()));
        assert!((score.r_factor - 93.2).abs() < 1e-9);
        assert!(score.mos > 4.3);
        assert_eq!(score.level, QualityLevel::Excellent);
    }

    #[test]
    fn test_each_impairment_lowers_score() {
        let estimator = QualityEstimator::new();
        let clean = estimator.r_factor(40.0, 0.0, 5.0);
        assert!(estimator.r_factor(400.0, 0.0, 5.0) < clean);
        assert!(estimator.r_factor(40.0, 5.0, 5.0) < clean);
        assert!(estimator.r_factor(40.0, 0.0, 60.0) < clean);
    }

    #[test]
    fn test_mos_bounds() {
        assert_eq!(QualityEstimator::mos_from_r(-5.0), 1.0);
        assert!(QualityEstimator::mos_from_r(100.0) <= 4.5);
        let heavy = QualityEstimator::new().r_factor(1200.0, 30.0, 200.0);
        assert_eq!(QualityLevel::from_mos(QualityEstimator::mos_from_r(heavy)), QualityLevel::Bad);
    }
}
