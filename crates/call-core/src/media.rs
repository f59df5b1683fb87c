//! Media collaborators
//!
//! Capture, rendering, and call history live outside this crate. The
//! session controller only talks to them through these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use peercall_quality_core::{DeviceState, QualityRating, VideoProfile};
use peercall_signal_core::{CallId, Role};
use serde::{Deserialize, Serialize};

use crate::error::CallResult;
use crate::events::CallEndReason;

/// Requested capture resolution and frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl From<VideoProfile> for VideoConstraints {
    fn from(profile: VideoProfile) -> Self {
        Self {
            width: profile.width(),
            height: profile.height(),
            frame_rate: profile.frame_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    /// `None` for an audio-only call
    pub video: Option<VideoConstraints>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoProfile::Medium.into()),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            video: None,
            ..Self::default()
        }
    }

    /// Same constraints with the video size taken from a ladder profile
    pub fn with_profile(mut self, profile: VideoProfile) -> Self {
        if self.video.is_some() {
            self.video = Some(profile.into());
        }
        self
    }
}

/// A local or remote media stream
pub trait MediaStream: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn has_audio(&self) -> bool;

    fn has_video(&self) -> bool;

    /// Stop every track; idempotent
    fn stop(&self);
}

/// Local capture
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fails with `PermissionDenied`, `DeviceNotFound`, or `DeviceBusy`
    async fn acquire_local_media(&self, constraints: &MediaConstraints) -> CallResult<Arc<dyn MediaStream>>;

    /// Battery, thermal, and capability state used to cap the video profile
    fn device_state(&self) -> DeviceState {
        DeviceState::default()
    }
}

/// Remote media display
#[async_trait]
pub trait RenderSink: Send + Sync {
    async fn attach_remote_stream(&self, stream: Arc<dyn MediaStream>) -> CallResult<()>;

    async fn detach_remote_stream(&self);
}

/// Summary of a finished call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub role: Role,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    /// Connected time in whole seconds; zero if never connected
    pub duration_secs: i64,
    pub end_reason: CallEndReason,
    pub last_rating: Option<QualityRating>,
}

impl CallRecord {
    pub fn was_connected(&self) -> bool {
        self.connected_at.is_some()
    }
}

/// Display-only call history; failures never affect the call
#[async_trait]
pub trait CallLog: Send + Sync {
    async fn record(&self, record: CallRecord) -> CallResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints_follow_profile() {
        let constraints = MediaConstraints::default().with_profile(VideoProfile::Low);
        assert_eq!(
            constraints.video,
            Some(VideoConstraints {
                width: 854,
                height: 480,
                frame_rate: 24
            })
        );
        assert!(MediaConstraints::audio_only().with_profile(VideoProfile::High).video.is_none());
    }
}
