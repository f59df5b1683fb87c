use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::estimation::QualityScore;
use crate::sample::QualitySample;

/// Number of recent samples used for stability
const STABILITY_WINDOW: usize = 10;
/// MOS difference that counts as a trend
const TREND_THRESHOLD: f64 = 0.2;

/// Quality trend over recent samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTrend {
    Improving,
    Stable,
    Degrading,
}

/// A sample paired with its continuous score
#[derive(Debug, Clone)]
pub struct ScoredSample {
    pub sample: QualitySample,
    pub score: QualityScore,
}

/// Bounded FIFO of recent samples for trend and variance calculations
#[derive(Debug, Clone)]
pub struct QualityHistory {
    entries: VecDeque<ScoredSample>,
    capacity: usize,
}

impl QualityHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: QualitySample, score: QualityScore) -> Option<ScoredSample> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(ScoredSample { sample, score });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&ScoredSample> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredSample> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn average_bandwidth_bps(&self) -> Option<f64> {
        self.average(|e| e.sample.bitrate.total_bps())
    }

    pub fn average_round_trip_time_ms(&self) -> Option<f64> {
        self.average(|e| e.sample.round_trip_time_ms)
    }

    fn average(&self, metric: impl Fn(&ScoredSample) -> f64) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.iter().map(metric).sum::<f64>() / self.entries.len() as f64)
    }

    /// Bandwidth stability over the last few samples, 0 (erratic) to 100 (flat)
    pub fn stability(&self) -> f64 {
        let recent: Vec<f64> = self
            .entries
            .iter()
            .rev()
            .take(STABILITY_WINDOW)
            .map(|e| e.sample.bitrate.total_bps())
            .collect();
        if recent.len() < 2 {
            return 100.0;
        }

        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let variance = recent.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / recent.len() as f64;
        let coefficient = variance.sqrt() / mean;
        (100.0 - coefficient * 100.0).clamp(0.0, 100.0)
    }

    /// Compare the latest MOS with the average of the three before it
    pub fn trend(&self) -> QualityTrend {
        if self.entries.len() < 4 {
            return QualityTrend::Stable;
        }

        let mut recent = self.entries.iter().rev();
        let Some(latest) = recent.next() else {
            return QualityTrend::Stable;
        };
        let previous: Vec<f64> = recent.take(3).map(|e| e.score.mos).collect();
        let avg_previous = previous.iter().sum::<f64>() / previous.len() as f64;

        if latest.score.mos > avg_previous + TREND_THRESHOLD {
            QualityTrend::Improving
        } else if latest.score.mos < avg_previous - TREND_THRESHOLD {
            QualityTrend::Degrading
        } else {
            QualityTrend::Stable
        }
    }
}

impl Default for QualityHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
