//! Error taxonomy for the monitor.
//!
//! Acquisition and adapter errors are recovered where they happen: the loop
//! that hit them logs and waits for its next tick. Only [`DisplayError::Init`]
//! and configuration errors are fatal, and only at startup.

use std::time::Duration;

/// Failure of a single bus-level read attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    /// The sensor did not answer within the bus timing window.
    #[error("sensor timed out")]
    Timeout,

    /// The sensor answered but the frame checksum did not match.
    #[error("checksum mismatch")]
    Checksum,

    /// The underlying device could not be read.
    #[error("bus I/O error on '{path}': {detail}")]
    Io { path: String, detail: String },

    /// A value was read but it is outside the sensor's physical range.
    #[error("implausible value: {temperature_c:.1}°C, {humidity:.1}%")]
    OutOfRange { temperature_c: f32, humidity: f32 },
}

/// Failure of a whole acquisition (all attempts of one tick).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquireError {
    /// Every attempt of the retry policy failed.
    #[error("sensor read failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BusError },

    /// A previous acquisition still holds the bus.
    #[error("sensor bus busy")]
    BusBusy,

    /// The blocking acquisition task died before returning.
    #[error("acquisition task aborted: {0}")]
    Aborted(String),
}

/// Errors from the character display sink.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DisplayError {
    /// The display could not be brought up at startup. Process-fatal.
    #[error("display initialization failed: {0}")]
    Init(String),

    /// A line write or control command failed.
    #[error("display write failed: {0}")]
    Write(String),

    /// The serializing display task is gone.
    #[error("display handle closed")]
    Closed,
}

/// Errors from the remote publish transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    /// The transport rejected or failed to queue the message.
    #[error("publish to '{topic}' failed: {detail}")]
    Transport { topic: String, detail: String },

    /// The transport did not accept the message in time.
    #[error("publish to '{topic}' timed out after {timeout:?}")]
    Timeout { topic: String, timeout: Duration },
}

/// Configuration errors, detected before any loop starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A cadence of zero would spin the loop.
    #[error("{name} interval must be greater than zero")]
    ZeroInterval { name: &'static str },

    /// Retry policy must allow at least one attempt.
    #[error("sensor retry attempts must be at least 1")]
    NoAttempts,

    /// A value could not be parsed.
    #[error("invalid value for '{field}': {detail}")]
    Invalid { field: &'static str, detail: String },
}

/// Crate-level error aggregating every concern.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
