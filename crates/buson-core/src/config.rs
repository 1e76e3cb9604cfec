// ── Runtime device configuration ──
//
// These types describe *who* the device is and *where* it connects.
// They never touch disk: buson-config (or a test) implements
// `ConfigProvider`, and the link loop asks it again on every
// connection attempt so field edits apply without a restart.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use url::Url;

use buson_api::DEFAULT_PORT;

use crate::error::CoreError;

/// Class of field device, reported as the numeric `device_type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceClass {
    #[serde(alias = "phone")]
    Handheld,
    #[default]
    #[serde(alias = "bus")]
    Vehicle,
    #[serde(rename = "stop", alias = "stop_beacon")]
    #[strum(serialize = "stop")]
    StopBeacon,
}

impl DeviceClass {
    pub fn code(self) -> u8 {
        match self {
            Self::Handheld => 1,
            Self::Vehicle => 2,
            Self::StopBeacon => 3,
        }
    }
}

/// Direction of travel along the route.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "상행")]
    Up,
    #[serde(alias = "하행")]
    Down,
}

impl Direction {
    /// Label the dispatch server and rider app use for this direction.
    pub fn wire_label(self) -> &'static str {
        match self {
            Self::Up => "상행",
            Self::Down => "하행",
        }
    }
}

/// Everything needed to open a session with the dispatch server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_id: String,
    /// Server host or IP, without scheme or port.
    pub server_host: String,
    pub port: u16,
    pub bus_number: Option<String>,
    pub vehicle_number: Option<String>,
    pub direction: Direction,
    pub device_class: DeviceClass,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            server_host: String::new(),
            port: DEFAULT_PORT,
            bus_number: None,
            vehicle_number: None,
            direction: Direction::default(),
            device_class: DeviceClass::default(),
        }
    }
}

impl DeviceConfig {
    /// A session needs at least a server address and a device id.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.server_host.trim().is_empty() {
            return Err(CoreError::Config {
                message: "server address is not set".into(),
            });
        }
        if self.device_id.trim().is_empty() {
            return Err(CoreError::Config {
                message: "device id is not set".into(),
            });
        }
        Ok(())
    }

    /// `ws://<host>:<port>/device-ws`
    pub fn url(&self) -> Result<Url, CoreError> {
        buson_api::device_ws_url(self.server_host.trim(), self.port).map_err(|e| CoreError::Config {
            message: format!("invalid server address '{}': {e}", self.server_host),
        })
    }
}

/// Timing of the link loop. Every suspension point is bounded by one of
/// these, which is what keeps `stop()` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTiming {
    /// Minimum gap between telemetry messages.
    pub telemetry_interval: Duration,
    /// How long one receive attempt waits for a frame.
    pub recv_timeout: Duration,
    /// Fixed pause between a failure and the next connection attempt.
    pub reconnect_delay: Duration,
    /// How often to re-check an incomplete configuration.
    pub config_poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Outbound queue depth; sends beyond it are dropped.
    pub outbound_capacity: usize,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            telemetry_interval: Duration::from_millis(500),
            recv_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(1200),
            config_poll_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(3),
            outbound_capacity: 64,
        }
    }
}

// ── Providers ────────────────────────────────────────────────────

/// Source of the device configuration, polled on every connection attempt.
pub trait ConfigProvider: Send + Sync + 'static {
    fn load(&self) -> DeviceConfig;
}

impl ConfigProvider for DeviceConfig {
    fn load(&self) -> DeviceConfig {
        self.clone()
    }
}

impl<T: ConfigProvider> ConfigProvider for Arc<T> {
    fn load(&self) -> DeviceConfig {
        (**self).load()
    }
}

/// In-memory configuration that can be replaced while the terminal runs.
#[derive(Debug)]
pub struct SharedConfig {
    current: ArcSwap<DeviceConfig>,
}

impl SharedConfig {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// Replace the configuration; picked up on the next connection attempt.
    pub fn set(&self, config: DeviceConfig) {
        self.current.store(Arc::new(config));
    }
}

impl ConfigProvider for SharedConfig {
    fn load(&self) -> DeviceConfig {
        self.current.load().as_ref().clone()
    }
}
