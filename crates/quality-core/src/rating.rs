//! Discrete quality ratings
//!
//! Each sub-metric is rated on its own; the overall rating is the worst of
//! them, so a single degraded metric is never hidden by healthy ones.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QualityError, QualityResult};
use crate::sample::QualitySample;

/// Rating ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityRating {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
    Disconnected,
}

impl QualityRating {
    /// The more severe of two ratings
    pub fn worst(self, other: QualityRating) -> QualityRating {
        self.max(other)
    }

    /// Ratings that warrant a user-facing alert
    pub fn is_alerting(&self) -> bool {
        matches!(self, QualityRating::Critical | QualityRating::Disconnected)
    }

    /// Excellent or good
    pub fn is_healthy(&self) -> bool {
        matches!(self, QualityRating::Excellent | QualityRating::Good)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRating::Excellent => "excellent",
            QualityRating::Good => "good",
            QualityRating::Fair => "fair",
            QualityRating::Poor => "poor",
            QualityRating::Critical => "critical",
            QualityRating::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for QualityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for metrics where more is better (bitrates)
///
/// A value at or above a threshold earns that rating; below `critical`
/// the stream is treated as gone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HigherIsBetter {
    pub excellent: f64,
    pub good: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fair: Option<f64>,
    pub poor: f64,
    pub critical: f64,
}

impl HigherIsBetter {
    pub fn rate(&self, value: f64) -> QualityRating {
        if value >= self.excellent {
            QualityRating::Excellent
        } else if value >= self.good {
            QualityRating::Good
        } else if self.fair.is_some_and(|fair| value >= fair) {
            QualityRating::Fair
        } else if value >= self.poor {
            QualityRating::Poor
        } else if value >= self.critical {
            QualityRating::Critical
        } else {
            QualityRating::Disconnected
        }
    }

    fn validate(&self, metric: &'static str) -> QualityResult<()> {
        let fair = self.fair.unwrap_or(self.poor);
        if !(self.excellent >= self.good && self.good >= fair && fair >= self.poor && self.poor >= self.critical) {
            return Err(QualityError::unordered(metric, "expected excellent >= good >= fair >= poor >= critical"));
        }
        if self.critical < 0.0 {
            return Err(QualityError::unordered(metric, "critical threshold must not be negative"));
        }
        Ok(())
    }
}

/// Thresholds for metrics where less is better (loss, RTT)
///
/// Values past `critical` still rate critical: a lossy or slow path is
/// degraded, not disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowerIsBetter {
    pub excellent: f64,
    pub good: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fair: Option<f64>,
    pub poor: f64,
    pub critical: f64,
}

impl LowerIsBetter {
    pub fn rate(&self, value: f64) -> QualityRating {
        if value <= self.excellent {
            QualityRating::Excellent
        } else if value <= self.good {
            QualityRating::Good
        } else if self.fair.is_some_and(|fair| value <= fair) {
            QualityRating::Fair
        } else if value <= self.poor {
            QualityRating::Poor
        } else {
            QualityRating::Critical
        }
    }

    fn validate(&self, metric: &'static str) -> QualityResult<()> {
        let fair = self.fair.unwrap_or(self.good);
        if !(self.excellent <= self.good && self.good <= fair && fair <= self.poor && self.poor <= self.critical) {
            return Err(QualityError::unordered(metric, "expected excellent <= good <= fair <= poor <= critical"));
        }
        if self.excellent < 0.0 {
            return Err(QualityError::unordered(metric, "excellent threshold must not be negative"));
        }
        Ok(())
    }
}

/// Per-metric thresholds; defaults are empirically chosen and configurable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub video_bitrate_kbps: HigherIsBetter,
    pub audio_bitrate_kbps: HigherIsBetter,
    pub packet_loss_pct: LowerIsBetter,
    pub round_trip_time_ms: LowerIsBetter,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            video_bitrate_kbps: HigherIsBetter {
                excellent: 1000.0,
                good: 500.0,
                fair: None,
                poor: 100.0,
                critical: 50.0,
            },
            audio_bitrate_kbps: HigherIsBetter {
                excellent: 64.0,
                good: 32.0,
                fair: None,
                poor: 16.0,
                critical: 8.0,
            },
            packet_loss_pct: LowerIsBetter {
                excellent: 0.1,
                good: 1.0,
                fair: None,
                poor: 5.0,
                critical: 10.0,
            },
            round_trip_time_ms: LowerIsBetter {
                excellent: 50.0,
                good: 150.0,
                fair: None,
                poor: 300.0,
                critical: 500.0,
            },
        }
    }
}

impl QualityThresholds {
    pub fn validate(&self) -> QualityResult<()> {
        self.video_bitrate_kbps.validate("video_bitrate_kbps")?;
        self.audio_bitrate_kbps.validate("audio_bitrate_kbps")?;
        self.packet_loss_pct.validate("packet_loss_pct")?;
        self.round_trip_time_ms.validate("round_trip_time_ms")?;
        Ok(())
    }

    /// Rate the latest sample; nothing from earlier samples is mixed in
    pub fn assess(&self, sample: &QualitySample) -> QualityAssessment {
        let video = sample
            .video_bitrate_bps
            .map(|bps| self.video_bitrate_kbps.rate(bps / 1000.0));
        let audio = sample
            .audio_bitrate_bps
            .map(|bps| self.audio_bitrate_kbps.rate(bps / 1000.0));
        let packet_loss = self.packet_loss_pct.rate(sample.packet_loss_pct);
        let round_trip_time = self.round_trip_time_ms.rate(sample.round_trip_time_ms);
        let network = packet_loss.worst(round_trip_time);

        let overall = [video, audio]
            .into_iter()
            .flatten()
            .fold(network, QualityRating::worst);

        QualityAssessment {
            video,
            audio,
            packet_loss,
            round_trip_time,
            network,
            overall,
        }
    }
}

/// Sub-ratings and the derived overall rating for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub video: Option<QualityRating>,
    pub audio: Option<QualityRating>,
    pub packet_loss: QualityRating,
    pub round_trip_time: QualityRating,
    /// Worst of loss and RTT
    pub network: QualityRating,
    /// Worst of every rated sub-metric
    pub overall: QualityRating,
}

impl QualityAssessment {
    /// Whether any rating a display would show differs
    pub fn differs_from(&self, other: &QualityAssessment) -> bool {
        self.overall != other.overall
            || self.video != other.video
            || self.audio != other.audio
            || self.network != other.network
    }
}
