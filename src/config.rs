// MIT License - Copyright (c) 2026 Peter Wright
// Per-device configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AirconError;

/// Supported appliance families. Each has its own property catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Standard split A/C (`f_*` sensors, `t_*` controls)
    Ac,
    /// Humidifier
    Humidifier,
    /// Fujitsu FGL units
    Fgl,
    /// Fujitsu FGL units with stepped louvers
    FglB,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ac => "ac",
            Self::Humidifier => "humidifier",
            Self::Fgl => "fgl",
            Self::FglB => "fgl_b",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = AirconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ac" => Ok(Self::Ac),
            "humidifier" => Ok(Self::Humidifier),
            "fgl" => Ok(Self::Fgl),
            "fgl_b" | "fglb" => Ok(Self::FglB),
            other => Err(AirconError::Config {
                details: format!("unknown device type: {other}"),
            }),
        }
    }
}

/// Configuration for one device's session, store and sync engine.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Identifier used in logs, events, HTTP `device=` and MQTT topics
    pub device_id: String,
    /// Selects the property catalog
    pub device_type: DeviceType,
    /// TCP connect timeout in milliseconds (default: 5000)
    pub connect_timeout_ms: u64,
    /// Per-request response timeout in milliseconds, also bounds the
    /// handshake (default: 5000)
    pub request_timeout_ms: u64,
    /// Idle time after which a keep-alive ping is sent (default: 10000)
    pub keep_alive_interval_ms: u64,
    /// Full poll interval; `None` polls at the keep-alive interval
    pub poll_interval_ms: Option<u64>,
    /// First reconnect delay; doubles per consecutive failure (default: 500)
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap (default: 20000)
    pub reconnect_max_ms: u64,
    /// Time a dispatched command may stay unconfirmed before it is retried
    /// (default: 10000)
    pub command_timeout_ms: u64,
    /// Retries after the first dispatch before a command fails (default: 3)
    pub max_attempts: u32,
    /// Most property writes packed into one request (default: 16)
    pub max_batch: usize,
    /// How long shutdown waits for an in-flight request (default: 1000)
    pub shutdown_grace_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "aircon".to_string(),
            device_type: DeviceType::Ac,
            connect_timeout_ms: 5000,
            request_timeout_ms: 5000,
            keep_alive_interval_ms: 10000,
            poll_interval_ms: None,
            reconnect_base_ms: 500,
            reconnect_max_ms: 20000,
            command_timeout_ms: 10000,
            max_attempts: 3,
            max_batch: 16,
            shutdown_grace_ms: 1000,
        }
    }
}

impl DeviceConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(self.keep_alive_interval_ms))
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_base_ms))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Builder for DeviceConfig.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl DeviceConfigBuilder {
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.config.device_id = id.into();
        self
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.config.device_type = device_type;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn keep_alive_interval_ms(mut self, ms: u64) -> Self {
        self.config.keep_alive_interval_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = Some(ms);
        self
    }

    pub fn reconnect_base_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_base_ms = ms;
        self
    }

    pub fn reconnect_max_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_max_ms = ms;
        self
    }

    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn max_batch(mut self, writes: usize) -> Self {
        self.config.max_batch = writes.max(1);
        self
    }

    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    pub fn build(self) -> DeviceConfig {
        self.config
    }
}
