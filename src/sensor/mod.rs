pub mod iio;
pub mod simulated;

pub use iio::IioBus;
pub use simulated::SimulatedBus;

use crate::error::{AcquireError, BusError};
use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

// DHT22 datasheet operating range
const MIN_TEMP_C: f32 = -40.0;
const MAX_TEMP_C: f32 = 80.0;
const MIN_HUMIDITY: f32 = 0.0;
const MAX_HUMIDITY: f32 = 100.0;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Raw value as delivered by the bus, in sensor units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature_c: f32,
    pub humidity: f32,
}

impl RawSample {
    pub fn new(temperature_c: f32, humidity: f32) -> Self {
        Self { temperature_c, humidity }
    }

    /// Reject frames that decoded but cannot be physical.
    pub fn validate(self) -> Result<Self, BusError> {
        let temp_ok = self.temperature_c.is_finite()
            && (MIN_TEMP_C..=MAX_TEMP_C).contains(&self.temperature_c);
        let hum_ok = self.humidity.is_finite()
            && (MIN_HUMIDITY..=MAX_HUMIDITY).contains(&self.humidity);

        if temp_ok && hum_ok {
            Ok(self)
        } else {
            Err(BusError::OutOfRange {
                temperature_c: self.temperature_c,
                humidity: self.humidity,
            })
        }
    }
}

/// One blocking hardware read attempt.
pub trait SensorBus: Send {
    fn read_raw(&mut self) -> Result<RawSample, BusError>;
}

impl<B: SensorBus + ?Sized> SensorBus for Box<B> {
    fn read_raw(&mut self) -> Result<RawSample, BusError> {
        (**self).read_raw()
    }
}

/// Bounded retry for a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between failed attempts. Zero retries back to back.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::attempts(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Turns bus attempts into accepted readings.
///
/// Stateless apart from the bus it owns: it never touches shared state and
/// never reschedules itself. The caller decides what to do with the result.
#[derive(Debug)]
pub struct SensorReader<B> {
    bus: B,
    policy: RetryPolicy,
}

impl<B: SensorBus> SensorReader<B> {
    pub fn new(bus: B, policy: RetryPolicy) -> Self {
        debug_assert!(policy.max_attempts > 0, "retry policy allows no attempts");
        Self { bus, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Blocking acquisition. The first well-formed attempt wins.
    pub fn acquire(&mut self) -> Result<Reading, AcquireError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = BusError::Timeout;

        for attempt in 1..=attempts {
            match self.bus.read_raw().and_then(RawSample::validate) {
                Ok(raw) => {
                    debug!(
                        attempt,
                        "read sensor: Temperature = {:.2}°C, Humidity = {:.2}%",
                        raw.temperature_c,
                        raw.humidity
                    );
                    return Ok(Reading::from_celsius_at(
                        raw.temperature_c,
                        raw.humidity,
                        SystemTime::now(),
                    ));
                }
                Err(e) => {
                    trace!(attempt, "sensor attempt failed: {}", e);
                    last = e;
                }
            }

            if attempt < attempts && !self.policy.delay.is_zero() {
                std::thread::sleep(self.policy.delay);
            }
        }

        Err(AcquireError::Exhausted { attempts, last })
    }
}
