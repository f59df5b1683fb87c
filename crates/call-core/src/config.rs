//! Call configuration
//!
//! Every threshold and interval here is a tunable default. Configuration
//! can be built in code, parsed from TOML, or layered from `PEERCALL_*`
//! environment variables over the defaults.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use peercall_quality_core::{BitrateConfig, MonitorConfig, PredictionThresholds, ProfileConfig, QualityThresholds};
use peercall_signal_core::{
    HttpTransportConfig, HttpTransportFactory, PollConfig, TransportFactory, WebSocketConfig, WebSocketFactory,
};
use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};
use crate::media::MediaConstraints;
use crate::peer::{IceServer, PeerConfiguration};
use crate::sdp::NegotiationOptions;

const ENV_PREFIX: &str = "PEERCALL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Relay endpoint; `ws://`/`wss://` selects the socket transport
    pub signal_url: Option<String>,
    pub peer: PeerConfiguration,
    pub media: MediaConstraints,
    pub negotiation: NegotiationOptions,
    pub poll: PollConfig,
    pub stats_interval_ms: u64,
    /// Bound for the first local candidate to appear
    pub ice_gathering_timeout_ms: u64,
    /// Bound for each create/set description step
    pub negotiation_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub monitor: MonitorConfig,
    pub thresholds: QualityThresholds,
    pub bitrate: BitrateConfig,
    pub prediction: PredictionThresholds,
    pub profile: ProfileConfig,
    /// Consecutive good-or-better samples before a bitrate step up
    pub increase_after_good_samples: u32,
    /// Minimum relative bitrate change worth pushing to the sender
    pub bitrate_push_threshold: f64,
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signal_url: None,
            peer: PeerConfiguration::default(),
            media: MediaConstraints::default(),
            negotiation: NegotiationOptions::default(),
            poll: PollConfig::default(),
            stats_interval_ms: 2000,
            ice_gathering_timeout_ms: 8000,
            negotiation_timeout_ms: 10_000,
            reconnect_delay_ms: 2000,
            max_reconnect_attempts: 1,
            monitor: MonitorConfig::default(),
            thresholds: QualityThresholds::default(),
            bitrate: BitrateConfig::default(),
            prediction: PredictionThresholds::default(),
            profile: ProfileConfig::default(),
            increase_after_good_samples: 5,
            bitrate_push_threshold: 0.05,
            event_capacity: 256,
        }
    }
}

impl CallConfig {
    pub fn from_toml_str(input: &str) -> CallResult<Self> {
        let config: CallConfig =
            toml::from_str(input).map_err(|e| CallError::configuration("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `PEERCALL_*` environment variables
    pub fn from_env() -> CallResult<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> CallResult<Self> {
        if let Some(url) = env_var("SIGNAL_URL") {
            self.signal_url = Some(url);
        }
        if let Some(urls) = env_var("ICE_SERVERS") {
            let username = env_var("TURN_USERNAME");
            let credential = env_var("TURN_CREDENTIAL");
            self.peer.ice_servers = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(|url| {
                    if url.starts_with("turn:") || url.starts_with("turns:") {
                        IceServer {
                            urls: vec![url.to_string()],
                            username: username.clone(),
                            credential: credential.clone(),
                        }
                    } else {
                        IceServer::stun(url)
                    }
                })
                .collect();
        }
        if let Some(v) = env_parse("POLL_FLOOR_MS")? {
            self.poll.floor_ms = v;
        }
        if let Some(v) = env_parse("POLL_CEILING_MS")? {
            self.poll.ceiling_ms = v;
        }
        if let Some(v) = env_parse("POLL_MAX_FAILURES")? {
            self.poll.max_consecutive_failures = v;
        }
        if let Some(v) = env_parse("STATS_INTERVAL_MS")? {
            self.stats_interval_ms = v;
        }
        if let Some(v) = env_parse("ICE_GATHERING_TIMEOUT_MS")? {
            self.ice_gathering_timeout_ms = v;
        }
        if let Some(v) = env_parse("RECONNECT_DELAY_MS")? {
            self.reconnect_delay_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CallResult<()> {
        self.poll.validate()?;
        self.thresholds.validate()?;
        self.bitrate.validate()?;
        self.prediction.validate()?;
        self.profile.validate()?;
        self.monitor.validate()?;

        for (field, value) in [
            ("stats_interval_ms", self.stats_interval_ms),
            ("ice_gathering_timeout_ms", self.ice_gathering_timeout_ms),
            ("negotiation_timeout_ms", self.negotiation_timeout_ms),
        ] {
            if value == 0 {
                return Err(CallError::configuration(field, "must be positive"));
            }
        }
        if !(self.bitrate_push_threshold >= 0.0 && self.bitrate_push_threshold < 1.0) {
            return Err(CallError::configuration("bitrate_push_threshold", "must be in [0, 1)"));
        }
        if self.increase_after_good_samples == 0 {
            return Err(CallError::configuration("increase_after_good_samples", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(CallError::configuration("event_capacity", "must be positive"));
        }
        if self.peer.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err(CallError::configuration("peer.ice_servers", "every server needs a url"));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Transport factory for `signal_url`
    pub fn transport_factory(&self) -> CallResult<Arc<dyn TransportFactory>> {
        let Some(url) = &self.signal_url else {
            return Err(CallError::configuration("signal_url", "no relay endpoint configured"));
        };
        if url.starts_with("ws://") || url.starts_with("wss://") {
            let config = WebSocketConfig {
                url: url.clone(),
                ..WebSocketConfig::default()
            };
            return Ok(Arc::new(WebSocketFactory::new(config)));
        }
        let config = HttpTransportConfig::default().with_base_url(url.clone());
        Ok(Arc::new(HttpTransportFactory::new(config)?))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> CallResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CallError::configuration(format!("{}{}", ENV_PREFIX, name), format!("{}: {}", raw, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll.floor_ms, 2000);
        assert_eq!(config.monitor.alert_cooldown_ms, 5000);
        assert_eq!(config.peer.ice_candidate_pool_size, 10);
    }

    #[test]
    fn test_from_toml_overrides() {
        let config = CallConfig::from_toml_str(
            r#"
            signal_url = "https://relay.example.com/api/"
            stats_interval_ms = 1000

            [poll]
            floor_ms = 1000
            ceiling_ms = 4000

            [bitrate]
            min_bps = 300000.0
            max_bps = 2000000.0

            [[peer.ice_servers]]
            urls = ["turn:turn.example.com:3478"]
            username = "agent"
            credential = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.stats_interval_ms, 1000);
        assert_eq!(config.poll.floor_ms, 1000);
        assert_eq!(config.poll.success_step_ms, 500);
        assert_eq!(config.bitrate.max_bps, 2_000_000.0);
        assert_eq!(config.peer.ice_servers[0].username.as_deref(), Some("agent"));
        assert!(config.transport_factory().is_ok());
    }

    #[test]
    fn test_toml_validation_errors() {
        let err = CallConfig::from_toml_str("[poll]\nfloor_ms = 9000\nceiling_ms = 1000\n").unwrap_err();
        assert_eq!(err.category(), "signaling");

        let err = CallConfig::from_toml_str("[bitrate]\nmin_bps = 5000000.0\n").unwrap_err();
        assert!(matches!(err, CallError::Configuration { .. }));

        let err = CallConfig::from_toml_str("stats_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, CallError::Configuration { ref field, .. } if field == "stats_interval_ms"));
    }

    #[test]
    fn test_transport_factory_requires_url() {
        assert!(matches!(
            CallConfig::default().transport_factory(),
            Err(CallError::Configuration { .. })
        ));
        let ws = CallConfig {
            signal_url: Some("wss://relay.example.com/ws".to_string()),
            ..CallConfig::default()
        };
        assert!(ws.transport_factory().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("PEERCALL_SIGNAL_URL", "wss://relay.example.com/ws");
            std::env::set_var("PEERCALL_ICE_SERVERS", "stun:stun.example.com:3478, turn:turn.example.com:3478");
            std::env::set_var("PEERCALL_TURN_USERNAME", "agent");
            std::env::set_var("PEERCALL_TURN_CREDENTIAL", "secret");
            std::env::set_var("PEERCALL_STATS_INTERVAL_MS", "1500");
        }

        let config = CallConfig::from_env().unwrap();
        assert_eq!(config.signal_url.as_deref(), Some("wss://relay.example.com/ws"));
        assert_eq!(config.stats_interval_ms, 1500);
        assert_eq!(config.peer.ice_servers.len(), 2);
        assert!(config.peer.ice_servers[0].username.is_none());
        assert_eq!(config.peer.ice_servers[1].credential.as_deref(), Some("secret"));

        unsafe {
            std::env::set_var("PEERCALL_STATS_INTERVAL_MS", "soon");
        }
        assert!(matches!(CallConfig::from_env(), Err(CallError::Configuration { .. })));

        unsafe {
            for name in [
                "PEERCALL_SIGNAL_URL",
                "PEERCALL_ICE_SERVERS",
                "PEERCALL_TURN_USERNAME",
                "PEERCALL_TURN_CREDENTIAL",
                "PEERCALL_STATS_INTERVAL_MS",
            ] {
                std::env::remove_var(name);
            }
        }
    }
}
