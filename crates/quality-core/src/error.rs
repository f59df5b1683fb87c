use thiserror::Error;

/// Result type for quality configuration
pub type QualityResult<T> = Result<T, QualityError>;

/// Errors raised when validating quality and adaptation settings
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityError {
    /// Thresholds for a metric are not monotonic
    #[error("Thresholds for {metric} are out of order: {reason}")]
    UnorderedThresholds { metric: &'static str, reason: String },

    /// Bitrate bounds or smoothing factor are unusable
    #[error("Invalid bitrate configuration: {field} - {reason}")]
    InvalidBitrate { field: &'static str, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },
}

impl QualityError {
    pub fn unordered(metric: &'static str, reason: impl Into<String>) -> Self {
        Self::UnorderedThresholds {
            metric,
            reason: reason.into(),
        }
    }

    pub fn invalid_bitrate(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidBitrate {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_configuration(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            QualityError::UnorderedThresholds { .. } => "thresholds",
            QualityError::InvalidBitrate { .. } => "bitrate",
            QualityError::InvalidConfiguration { .. } => "configuration",
        }
    }
}
