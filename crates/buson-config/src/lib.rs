//! Configuration for buson terminals.
//!
//! One TOML file per device, layered under `BUSON_` environment
//! overrides, translated to `buson_core::DeviceConfig`. [`FileConfig`]
//! re-reads the file on every connection attempt so edits made while
//! the terminal runs apply on the next reconnect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use buson_core::{ConfigProvider, DeviceClass, DeviceConfig, Direction, LinkTiming};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// The device configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Unique device identifier registered with the dispatch server.
    #[serde(default, deserialize_with = "lenient_string")]
    pub device_id: String,

    /// Dispatch server host or IP.
    #[serde(default, deserialize_with = "lenient_string")]
    pub server_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Route number shown to riders; empty when unassigned.
    #[serde(default, deserialize_with = "lenient_string")]
    pub bus_no: String,

    /// Vehicle plate number; empty when unassigned.
    #[serde(default, deserialize_with = "lenient_string")]
    pub vehicle_no: String,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub device_type: DeviceClass,

    /// Link timing overrides.
    #[serde(default)]
    pub link: LinkSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            server_ip: String::new(),
            port: default_port(),
            bus_no: String::new(),
            vehicle_no: String::new(),
            direction: Direction::default(),
            device_type: DeviceClass::default(),
            link: LinkSettings::default(),
        }
    }
}

/// `[link]` table, all values in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkSettings {
    pub telemetry_interval_ms: u64,
    pub recv_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub config_poll_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: 500,
            recv_timeout_ms: 200,
            reconnect_delay_ms: 1200,
            config_poll_ms: 500,
            connect_timeout_ms: 3000,
        }
    }
}

fn default_port() -> u16 {
    DeviceConfig::default().port
}

/// Accept `bus_no = 720` as well as `bus_no = "720"`.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Lenient>::deserialize(deserializer)? {
        None => String::new(),
        Some(Lenient::Text(s)) => s,
        Some(Lenient::Int(n)) => n.to_string(),
        Some(Lenient::Float(f)) => f.to_string(),
    })
}

/// Lower bound on the pause between connection attempts.
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// Keys accepted by [`Config::set`].
pub const KEYS: &[&str] = &[
    "device_id",
    "server_ip",
    "port",
    "bus_no",
    "vehicle_no",
    "direction",
    "device_type",
    "link.telemetry_interval_ms",
    "link.recv_timeout_ms",
    "link.reconnect_delay_ms",
    "link.config_poll_ms",
    "link.connect_timeout_ms",
];

impl Config {
    /// Runtime view for the link. Blank route and vehicle numbers
    /// become `None` (`null` on the wire).
    pub fn to_device_config(&self) -> DeviceConfig {
        DeviceConfig {
            device_id: self.device_id.trim().to_owned(),
            server_host: self.server_ip.trim().to_owned(),
            port: self.port,
            bus_number: blank_to_none(&self.bus_no),
            vehicle_number: blank_to_none(&self.vehicle_no),
            direction: self.direction,
            device_class: self.device_type,
        }
    }

    pub fn to_link_timing(&self) -> LinkTiming {
        let ms = Duration::from_millis;
        LinkTiming {
            telemetry_interval: ms(self.link.telemetry_interval_ms),
            recv_timeout: ms(self.link.recv_timeout_ms.max(1)),
            reconnect_delay: ms(self.link.reconnect_delay_ms.max(MIN_RECONNECT_DELAY_MS)),
            config_poll_interval: ms(self.link.config_poll_ms.max(1)),
            connect_timeout: ms(self.link.connect_timeout_ms.max(1)),
            ..LinkTiming::default()
        }
    }

    /// Whether the terminal has enough to connect.
    pub fn is_complete(&self) -> bool {
        self.to_device_config().validate().is_ok()
    }

    /// Set one key from its string form, as typed on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "device_id" => value.clone_into(&mut self.device_id),
            "server_ip" => value.clone_into(&mut self.server_ip),
            "bus_no" => value.clone_into(&mut self.bus_no),
            "vehicle_no" => value.clone_into(&mut self.vehicle_no),
            "port" => {
                self.port = match value.parse::<u16>() {
                    Ok(port) if port != 0 => port,
                    _ => return Err(invalid(key, format!("expected a port number, got '{value}'"))),
                };
            }
            "direction" => {
                self.direction = value
                    .parse()
                    .map_err(|_| invalid(key, format!("expected 'up' or 'down', got '{value}'")))?;
            }
            "device_type" => {
                self.device_type = value.parse().map_err(|_| {
                    invalid(
                        key,
                        format!("expected 'handheld', 'vehicle', or 'stop', got '{value}'"),
                    )
                })?;
            }
            _ => {
                let Some(field) = key.strip_prefix("link.") else {
                    return Err(unknown_key(key));
                };
                let slot = match field {
                    "telemetry_interval_ms" => &mut self.link.telemetry_interval_ms,
                    "recv_timeout_ms" => &mut self.link.recv_timeout_ms,
                    "reconnect_delay_ms" => &mut self.link.reconnect_delay_ms,
                    "config_poll_ms" => &mut self.link.config_poll_ms,
                    "connect_timeout_ms" => &mut self.link.connect_timeout_ms,
                    _ => return Err(unknown_key(key)),
                };
                let millis: u64 = value
                    .parse()
                    .map_err(|_| invalid(key, format!("expected milliseconds, got '{value}'")))?;
                if field == "reconnect_delay_ms" && millis < MIN_RECONNECT_DELAY_MS {
                    return Err(invalid(
                        key,
                        format!("must be at least {MIN_RECONNECT_DELAY_MS} ms"),
                    ));
                }
                *slot = millis;
            }
        }
        Ok(())
    }
}

fn blank_to_none(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason,
    }
}

fn unknown_key(key: &str) -> ConfigError {
    invalid(
        "key",
        format!("unknown key '{key}' (expected one of: {})", KEYS.join(", ")),
    )
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "buson", "buson").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("buson");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Prefix for environment overrides, e.g. `BUSON_SERVER_IP`.
const ENV_PREFIX: &str = "BUSON_";

/// Keys whose environment values are taken verbatim. The typed env
/// layer would read `BUSON_DEVICE_ID=007` as the integer 7.
const TEXT_KEYS: &[&str] = &["device_id", "server_ip", "bus_no", "vehicle_no"];

/// Load the config from `path` + environment. A missing file yields
/// the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    layered(path, ENV_PREFIX)
}

fn layered(path: &Path, env_prefix: &str) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix).split("__").ignore(TEXT_KEYS))
        .merge(text_env(env_prefix));

    let config: Config = figment.extract()?;
    Ok(config)
}

fn text_env(env_prefix: &str) -> Figment {
    TEXT_KEYS.iter().fold(Figment::new(), |figment, key| {
        match std::env::var(format!("{env_prefix}{}", key.to_ascii_uppercase())) {
            Ok(value) => figment.merge(Serialized::default(key, value)),
            Err(_) => figment,
        }
    })
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Hot-reload provider ─────────────────────────────────────────────

/// [`ConfigProvider`] backed by the config file, re-read on every call.
///
/// An unreadable or invalid file yields an empty configuration, which
/// parks the terminal until the file is fixed.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    last_error: ArcSwapOption<String>,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_error: ArcSwapOption::empty(),
        }
    }
}

impl ConfigProvider for FileConfig {
    fn load(&self) -> DeviceConfig {
        match load_config_from(&self.path) {
            Ok(config) => {
                if self.last_error.swap(None).is_some() {
                    tracing::info!(path = %self.path.display(), "config file readable again");
                }
                config.to_device_config()
            }
            Err(e) => {
                let message = e.to_string();
                let previous = self.last_error.swap(Some(Arc::new(message.clone())));
                // Polled every few hundred ms; only report changes.
                if previous.as_deref() != Some(&message) {
                    tracing::warn!(path = %self.path.display(), error = %message, "cannot read config file");
                }
                DeviceConfig::default()
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
