use super::{RawSample, SensorBus};
use crate::error::BusError;

const BASE_TEMP_C: f32 = 21.0;
const TEMP_SWING_C: f32 = 2.5;
const BASE_HUMIDITY: f32 = 45.0;
const HUMIDITY_SWING: f32 = 8.0;
// One simulated day per 720 reads (an hour at the default 5s cadence)
const READS_PER_CYCLE: f32 = 720.0;
const DEFAULT_FAILURE_PERCENT: u8 = 20;

/// Deterministic DHT22 stand-in for running without hardware.
///
/// Produces a slow diurnal drift with a little noise, and fails a fixed
/// share of attempts the way a real single-wire sensor drops frames.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    rng_state: u64,
    reads: u64,
    failure_percent: u8,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::with_failure_percent(DEFAULT_FAILURE_PERCENT)
    }

    pub fn with_failure_percent(failure_percent: u8) -> Self {
        Self {
            rng_state: 0x1234_5678_9ABC_DEF0, // Fixed seed for deterministic behavior
            reads: 0,
            failure_percent: failure_percent.min(100),
        }
    }

    fn next_random(&mut self) -> u64 {
        // Linear congruential generator
        self.rng_state = self.rng_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.rng_state
    }

    fn random_percent(&mut self) -> u8 {
        ((self.next_random() >> 24) % 100) as u8
    }

    /// Noise in [-0.5, 0.5).
    fn noise(&mut self) -> f32 {
        ((self.next_random() >> 16) & 0xFFFF) as f32 / 65_536.0 - 0.5
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBus for SimulatedBus {
    fn read_raw(&mut self) -> Result<RawSample, BusError> {
        self.reads += 1;

        if self.random_percent() < self.failure_percent {
            return Err(if self.reads % 2 == 0 { BusError::Checksum } else { BusError::Timeout });
        }

        let phase = (self.reads as f32 / READS_PER_CYCLE) * 2.0 * core::f32::consts::PI;
        let temperature_c = BASE_TEMP_C + phase.sin() * TEMP_SWING_C + self.noise() * 0.2;
        let humidity = BASE_HUMIDITY - phase.sin() * HUMIDITY_SWING + self.noise();

        // DHT22 resolution is 0.1
        Ok(RawSample::new(
            (temperature_c * 10.0).round() / 10.0,
            (humidity * 10.0).round() / 10.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_stay_plausible() {
        let mut bus = SimulatedBus::with_failure_percent(0);
        for _ in 0..2000 {
            let raw = bus.read_raw().unwrap();
            assert!(raw.validate().is_ok(), "implausible sample {raw:?}");
        }
    }

    #[test]
    fn test_never_fails_at_zero_percent() {
        let mut bus = SimulatedBus::with_failure_percent(0);
        assert!((0..100).all(|_| bus.read_raw().is_ok()));
    }

    #[test]
    fn test_always_fails_at_hundred_percent() {
        let mut bus = SimulatedBus::with_failure_percent(100);
        assert!((0..100).all(|_| bus.read_raw().is_err()));
    }

    #[test]
    fn test_deterministic() {
        let mut a = SimulatedBus::new();
        let mut b = SimulatedBus::new();
        for _ in 0..50 {
            assert_eq!(a.read_raw(), b.read_raw());
        }
    }
}
