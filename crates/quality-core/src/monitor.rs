//! Edge-triggered quality monitoring
//!
//! [`QualityMonitor::observe`] rates each sample, reports a change only
//! when a rating differs from the previous sample, and raises alerts for
//! critical/disconnected ratings no more often than the cooldown allows.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{QualityError, QualityResult};
use crate::estimation::{QualityEstimator, QualityScore};
use crate::history::{QualityHistory, QualityTrend};
use crate::rating::{QualityAssessment, QualityRating, QualityThresholds};
use crate::sample::QualitySample;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum gap between two alerts
    pub alert_cooldown_ms: u64,
    pub history_capacity: usize,
    pub alert_history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_cooldown_ms: 5000,
            history_capacity: 100,
            alert_history_capacity: 50,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> QualityResult<()> {
        if self.history_capacity == 0 {
            return Err(QualityError::invalid_configuration(
                "history_capacity",
                "history must hold at least one sample",
            ));
        }
        Ok(())
    }
}

/// A rating transition between consecutive samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingChange {
    /// `None` for the first sample of a session
    pub previous: Option<QualityAssessment>,
    pub current: QualityAssessment,
}

impl RatingChange {
    pub fn overall_changed(&self) -> bool {
        self.previous.map(|p| p.overall) != Some(self.current.overall)
    }

    pub fn is_degradation(&self) -> bool {
        self.previous
            .is_some_and(|p| self.current.overall > p.overall)
    }
}

/// A user-facing alert for a critical/disconnected rating
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAlert {
    pub rating: QualityRating,
    pub raised_at: Instant,
    pub message: String,
}

/// Result of observing one sample
#[derive(Debug, Clone)]
pub struct QualityUpdate {
    pub assessment: QualityAssessment,
    pub score: QualityScore,
    pub trend: QualityTrend,
    /// Set only when a rating differs from the previous sample
    pub change: Option<RatingChange>,
    /// Set only when an alert passes the cooldown
    pub alert: Option<QualityAlert>,
}

pub struct QualityMonitor {
    thresholds: QualityThresholds,
    config: MonitorConfig,
    estimator: QualityEstimator,
    history: QualityHistory,
    last: Option<QualityAssessment>,
    last_alert_at: Option<Instant>,
    alerts: VecDeque<QualityAlert>,
    muted: bool,
}

impl QualityMonitor {
    pub fn new(thresholds: QualityThresholds, config: MonitorConfig) -> Self {
        let history = QualityHistory::new(config.history_capacity);
        Self {
            thresholds,
            config,
            estimator: QualityEstimator::new(),
            history,
            last: None,
            last_alert_at: None,
            alerts: VecDeque::new(),
            muted: false,
        }
    }

    pub fn observe(&mut self, sample: QualitySample, now: Instant) -> QualityUpdate {
        let assessment = self.thresholds.assess(&sample);
        let score = self.estimator.estimate(&sample);
        self.history.push(sample, score);
        let trend = self.history.trend();

        let change = match self.last {
            Some(previous) if !assessment.differs_from(&previous) => None,
            previous => Some(RatingChange {
                previous,
                current: assessment,
            }),
        };
        self.last = Some(assessment);

        if let Some(change) = &change {
            if change.overall_changed() {
                info!(
                    from = change.previous.map(|p| p.overall.as_str()).unwrap_or("none"),
                    to = %assessment.overall,
                    mos = score.mos,
                    "Call quality changed"
                );
            } else {
                debug!(overall = %assessment.overall, "Call quality sub-rating changed");
            }
        }

        let alert = match &change {
            Some(_) if assessment.overall.is_alerting() => self.raise_alert(assessment.overall, now),
            _ => None,
        };

        QualityUpdate {
            assessment,
            score,
            trend,
            change,
            alert,
        }
    }

    fn raise_alert(&mut self, rating: QualityRating, now: Instant) -> Option<QualityAlert> {
        if self.muted {
            debug!(rating = %rating, "Quality alert muted");
            return None;
        }

        let cooldown = Duration::from_millis(self.config.alert_cooldown_ms);
        if let Some(last) = self.last_alert_at {
            if now.saturating_duration_since(last) < cooldown {
                debug!(rating = %rating, "Quality alert suppressed by cooldown");
                return None;
            }
        }

        let message = match rating {
            QualityRating::Disconnected => "Media stream lost".to_string(),
            _ => "Call quality is critical".to_string(),
        };
        warn!(rating = %rating, "{}", message);

        let alert = QualityAlert {
            rating,
            raised_at: now,
            message,
        };
        self.last_alert_at = Some(now);
        if self.alerts.len() >= self.config.alert_history_capacity.max(1) {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert.clone());
        Some(alert)
    }

    pub fn mute_alerts(&mut self) {
        self.muted = true;
    }

    pub fn unmute_alerts(&mut self) {
        self.muted = false;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Alerts raised so far, oldest first
    pub fn alert_history(&self) -> impl Iterator<Item = &QualityAlert> {
        self.alerts.iter()
    }

    pub fn last_assessment(&self) -> Option<QualityAssessment> {
        self.last
    }

    pub fn history(&self) -> &QualityHistory {
        &self.history
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Drop per-connection state, keeping configuration and alert history
    pub fn reset(&mut self) {
        self.history.clear();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> QualityMonitor {
        QualityMonitor::new(QualityThresholds::default(), MonitorConfig::default())
    }

    #[test]
    fn test_first_sample_reports_change() {
        let mut monitor = monitor();
        let update = monitor.observe(QualitySample::nominal(Instant::now()), Instant::now());
        let change = update.change.unwrap();
        assert!(change.previous.is_none());
        assert_eq!(change.current.overall, QualityRating::Excellent);
        assert!(update.alert.is_none());
    }

    #[test]
    fn test_same_rating_is_not_a_change() {
        let mut monitor = monitor();
        let now = Instant::now();
        monitor.observe(QualitySample::nominal(now), now);
        let update = monitor.observe(QualitySample::nominal(now).with_round_trip_time(45.0), now);
        assert!(update.change.is_none());
    }

    #[test]
    fn test_muted_alerts_are_not_raised() {
        let mut monitor = monitor();
        monitor.mute_alerts();
        let now = Instant::now();
        let update = monitor.observe(QualitySample::nominal(now).with_packet_loss(20.0), now);
        assert_eq!(update.assessment.overall, QualityRating::Critical);
        assert!(update.alert.is_none());

        monitor.unmute_alerts();
        monitor.observe(QualitySample::nominal(now), now);
        let update = monitor.observe(QualitySample::nominal(now).with_packet_loss(20.0), now);
        assert!(update.alert.is_some());
        assert_eq!(monitor.alert_history().count(), 1);
    }

    #[test]
    fn test_cooldown_spans_critical_disconnected_flaps() {
        let mut monitor = monitor();
        let start = Instant::now();
        let lossy = QualitySample::nominal(start).with_packet_loss(15.0);
        let gone = lossy.clone().with_media_bitrates(Some(0.0), Some(0.0));

        assert!(monitor.observe(lossy.clone(), start).alert.is_some());
        assert!(monitor.observe(gone, start + Duration::from_secs(2)).alert.is_none());
        assert!(monitor.observe(lossy.clone(), start + Duration::from_secs(4)).alert.is_none());

        let gone_again = lossy.with_media_bitrates(Some(0.0), Some(0.0));
        let update = monitor.observe(gone_again, start + Duration::from_secs(6));
        assert_eq!(update.alert.map(|a| a.rating), Some(QualityRating::Disconnected));
    }
}
