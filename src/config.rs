//! Runtime configuration.
//!
//! Everything here is consumed by the wiring in [`crate::monitor`] and the
//! binary; the loops themselves only ever see cadences and handles.

use crate::display::lcd::{DEFAULT_ADDRESS, DEFAULT_BUS};
use crate::error::ConfigError;
use crate::http::DEFAULT_METRICS_PORT;
use crate::publish::mqtt::{DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_CLIENT_ID};
use crate::publish::{MqttSettings, PublishTarget};
use crate::sensor::iio::DEFAULT_DEVICE_PATH;
use crate::sensor::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_ACQUIRE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_LEVEL: u8 = 4;

/// Where raw samples come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorSource {
    /// Kernel IIO device directory exposing the DHT attributes.
    Iio { device: PathBuf },
    /// Deterministic in-process sensor.
    Simulated,
}

impl Default for SensorSource {
    fn default() -> Self {
        SensorSource::Iio { device: PathBuf::from(DEFAULT_DEVICE_PATH) }
    }
}

/// Where the two display lines go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySource {
    /// HD44780 behind a PCF8574 backpack on an I2C bus.
    Lcd { bus: PathBuf, address: u8 },
    /// Lines printed to stdout.
    Console,
}

impl Default for DisplaySource {
    fn default() -> Self {
        DisplaySource::Lcd {
            bus: PathBuf::from(DEFAULT_BUS),
            address: DEFAULT_ADDRESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Location label on every metric and part of every feed name.
    pub room: String,
    pub aio_user: String,
    #[serde(skip_serializing, default)]
    pub aio_key: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub metrics_addr: SocketAddr,
    /// 0 (fatal) through 6 (debug).
    pub log_level: u8,
    pub acquire_interval: Duration,
    pub publish_interval: Duration,
    pub retry: RetryPolicy,
    pub sensor: SensorSource,
    pub display: DisplaySource,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            room: String::new(),
            aio_user: String::new(),
            aio_key: String::new(),
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            metrics_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_METRICS_PORT),
            log_level: DEFAULT_LOG_LEVEL,
            acquire_interval: DEFAULT_ACQUIRE_INTERVAL,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            retry: RetryPolicy::default(),
            sensor: SensorSource::default(),
            display: DisplaySource::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquire_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "acquire" });
        }
        if self.publish_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "publish" });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.publish_interval < self.acquire_interval {
            tracing::warn!(
                "publish interval {:?} is shorter than acquire interval {:?}; values will repeat",
                self.publish_interval,
                self.acquire_interval
            );
        }
        Ok(())
    }

    /// Publishing needs a user, a key and a room; otherwise it is disabled.
    pub fn publish_target(&self) -> Option<PublishTarget> {
        if self.aio_user.is_empty() || self.aio_key.is_empty() || self.room.is_empty() {
            None
        } else {
            Some(PublishTarget::new(&self.aio_user, &self.room))
        }
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.broker_host.clone(),
            port: self.broker_port,
            client_id: self.client_id.clone(),
            username: self.aio_user.clone(),
            password: self.aio_key.clone(),
        }
    }

    pub fn level(&self) -> Level {
        log_level(self.log_level)
    }

    /// JSON rendering for startup logs. The key is never included.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Map the numeric verbosity onto tracing levels.
///
/// 0 fatal, 1 panic, 2 error, 3 warn, 4 notify, 5 info, 6 debug; tracing has
/// no fatal/panic/notify, so those fold into their nearest neighbour.
pub fn log_level(level: u8) -> Level {
    match level {
        0..=2 => Level::ERROR,
        3 => Level::WARN,
        6 => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Parse `"5s"`, `"500ms"`, `"2m"` or a bare number of seconds.
pub fn parse_interval(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = |detail: String| ConfigError::Invalid { field, detail };

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: u64 = number
        .parse()
        .map_err(|_| invalid(format!("'{value}' is not a duration")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        other => Err(invalid(format!("unknown unit '{other}'"))),
    }
}

/// Parse a 7-bit I2C address given as hex (`0x27`) or decimal (`39`).
pub fn parse_i2c_address(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    match parsed {
        Ok(address) if address <= 0x7F => Ok(address),
        Ok(_) => Err(ConfigError::Invalid {
            field,
            detail: format!("'{value}' is not a 7-bit address"),
        }),
        Err(e) => Err(ConfigError::Invalid { field, detail: format!("'{value}': {e}") }),
    }
}
