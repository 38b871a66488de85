use std::time::Duration;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEVICE_PORT: u16 = 50001;

/// Network location of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Network and timing parameters for the monitor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub weigher: Endpoint,
    /// Metal detector endpoint; `None` runs the line without detection.
    #[serde(default)]
    pub metal: Option<Endpoint>,
    #[serde(default = "default_weigher_connect_timeout", with = "duration_ms")]
    pub weigher_connect_timeout: Duration,
    #[serde(default = "default_metal_connect_timeout", with = "duration_ms")]
    pub metal_connect_timeout: Duration,
    /// Post-connect socket read timeout, kept sub-second so one poll never
    /// stalls the loop.
    #[serde(default = "default_read_timeout", with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Minimum spacing between reconnect attempts for a downed device.
    #[serde(default = "default_reconnect_interval", with = "duration_ms")]
    pub reconnect_interval: Duration,
    #[serde(default = "default_cleanup_interval", with = "duration_ms")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_depth_log_interval", with = "duration_ms")]
    pub depth_log_interval: Duration,
}

fn default_weigher_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_metal_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_depth_log_interval() -> Duration {
    Duration::from_secs(30)
}

impl MonitorConfig {
    pub fn new(weigher: Endpoint, metal: Option<Endpoint>) -> Self {
        Self {
            weigher,
            metal,
            weigher_connect_timeout: default_weigher_connect_timeout(),
            metal_connect_timeout: default_metal_connect_timeout(),
            read_timeout: default_read_timeout(),
            poll_interval: default_poll_interval(),
            reconnect_interval: default_reconnect_interval(),
            cleanup_interval: default_cleanup_interval(),
            depth_log_interval: default_depth_log_interval(),
        }
    }
}

/// One production run's fixed parameters. Validated up front so a bad
/// limit pair is rejected before the worker starts, not deep inside the
/// loop. Read-only for the lifetime of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub production_id: i64,
    pub under_limit_grams: i64,
    pub over_limit_grams: i64,
    pub has_metal_detector: bool,
}

impl SessionConfig {
    pub fn new(
        production_id: i64,
        under_limit_grams: i64,
        over_limit_grams: i64,
        has_metal_detector: bool,
    ) -> Result<Self> {
        ensure!(
            under_limit_grams > 0 && over_limit_grams > 0,
            "weight limits must be positive, got under={under_limit_grams} over={over_limit_grams}"
        );
        ensure!(
            under_limit_grams <= over_limit_grams,
            "under limit {under_limit_grams} exceeds over limit {over_limit_grams}"
        );
        Ok(Self {
            production_id,
            under_limit_grams,
            over_limit_grams,
            has_metal_detector,
        })
    }
}

mod duration_ms {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
