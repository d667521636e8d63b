use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FAHRENHEIT_FACTOR: f32 = 1.8;
const FAHRENHEIT_OFFSET: f32 = 32.0;

/// Convert a Celsius value to Fahrenheit, the unit every consumer reports.
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * FAHRENHEIT_FACTOR + FAHRENHEIT_OFFSET
}

/// A complete temperature + humidity sample.
///
/// `temperature` is in °F and `humidity` in %RH. A reading is never updated
/// in place; a newer one replaces it entirely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub timestamp: SystemTime,
}

impl Reading {
    /// "No reading yet": zero values at the unix epoch.
    pub const SENTINEL: Reading = Reading {
        temperature: 0.0,
        humidity: 0.0,
        timestamp: UNIX_EPOCH,
    };

    pub fn new(temperature: f32, humidity: f32, timestamp: SystemTime) -> Self {
        Self { temperature, humidity, timestamp }
    }

    /// Build a reading from raw Celsius values, stamped now.
    pub fn from_celsius(celsius: f32, humidity: f32) -> Self {
        Self::from_celsius_at(celsius, humidity, SystemTime::now())
    }

    pub fn from_celsius_at(celsius: f32, humidity: f32, timestamp: SystemTime) -> Self {
        Self::new(celsius_to_fahrenheit(celsius), humidity, timestamp)
    }

    /// Seconds since the unix epoch of the acquisition; 0 for the sentinel.
    pub fn unix_seconds(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// A reading is fresh once it carries a real acquisition time.
    pub fn is_fresh(&self) -> bool {
        self.unix_seconds() > 0
    }

    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::SENTINEL
    }
}

/// Relative, human-friendly age: "now", "3 seconds ago", "1 minute ago".
pub fn humanize_age(age: Duration) -> String {
    let secs = age.as_secs();
    let (value, unit) = match secs {
        0 => return "now".to_string(),
        1..=59 => (secs, "second"),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };

    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}
