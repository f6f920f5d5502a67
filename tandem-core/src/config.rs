use crate::model::{IceServerConfig, QualityThresholds};
use crate::utils::{DEFAULT_STUN_ADDR, REFRESH_PATH, RELAY_CREDENTIALS_PATH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capture request handed to the local media source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_frame_rate: u32,
    pub max_frame_rate: u32,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            ideal_width: 1280,
            ideal_height: 720,
            ideal_frame_rate: 30,
            max_frame_rate: 30,
        }
    }
}

/// Policy knobs for one match session and its peer links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub signaling_url: String,
    pub relay_credentials_path: String,
    pub refresh_path: String,
    /// Path prefixes that belong to the auth flow and never trigger a refresh.
    pub auth_flow_paths: Vec<String>,
    pub connect_timeout_ms: u64,
    pub stats_interval_ms: u64,
    pub max_video_bitrate_kbps: u32,
    pub quality: QualityThresholds,
    /// Used when the relay credential fetch fails.
    pub fallback_ice_servers: Vec<IceServerConfig>,
    pub media: MediaConstraints,
    /// Re-enter the queue after a link failure or connection timeout.
    pub auto_requeue: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_owned(),
            signaling_url: "ws://localhost:5000/ws".to_owned(),
            relay_credentials_path: RELAY_CREDENTIALS_PATH.to_owned(),
            refresh_path: REFRESH_PATH.to_owned(),
            auth_flow_paths: [
                "/auth/login",
                "/auth/signup",
                "/auth/verify",
                "/auth/resend",
                "/auth/refresh",
                "/api/auth/login",
                "/api/auth/signup",
                "/api/auth/verify",
                "/api/auth/resend",
                "/api/auth/refresh",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            connect_timeout_ms: 10_000,
            stats_interval_ms: 2_000,
            max_video_bitrate_kbps: 500,
            quality: QualityThresholds::default(),
            fallback_ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_ADDR)],
            media: MediaConstraints::default(),
            auto_requeue: false,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn is_auth_flow(&self, path: &str) -> bool {
        self.auth_flow_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}
