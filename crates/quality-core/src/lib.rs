//! Quality monitoring and media adaptation for peercall
//!
//! The pipeline per stats tick is:
//!
//! ```text
//! StatsSnapshot -> StatsSampler -> QualitySample -> QualityMonitor -> QualityUpdate
//!                                        |
//!                                        +-> NetworkConditions -> AdaptiveBitrateController
//!                                                              -> ProfileSelector
//! ```
//!
//! Everything here is synchronous and clock-free: callers pass `now`
//! explicitly, which keeps cooldowns and cadences testable.

pub mod bitrate;
pub mod error;
pub mod estimation;
pub mod history;
pub mod monitor;
pub mod profile;
pub mod rating;
pub mod sample;

pub use bitrate::{
    AdaptiveBitrateController, BitrateConfig, BitrateDecision, BitratePredictor, NetworkClass,
    NetworkConditions, PredictionThresholds,
};
pub use error::{QualityError, QualityResult};
pub use estimation::{QualityEstimator, QualityLevel, QualityScore};
pub use history::{QualityHistory, QualityTrend, ScoredSample};
pub use monitor::{MonitorConfig, QualityAlert, QualityMonitor, QualityUpdate, RatingChange};
pub use profile::{DeviceState, ProfileConfig, ProfileDecision, ProfileSelector, ThermalState, VideoProfile};
pub use rating::{HigherIsBetter, LowerIsBetter, QualityAssessment, QualityRating, QualityThresholds};
pub use sample::{Bitrate, MediaCounters, QualitySample, StatsSampler, StatsSnapshot};
