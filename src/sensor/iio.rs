//! DHT11/DHT22 via the Linux IIO subsystem.
//!
//! With the `dht11` kernel driver bound (device tree overlay `dht11,gpiopin=4`
//! on a Raspberry Pi), each read of the sysfs attributes triggers a bus
//! transaction. Values are reported in milli-units:
//! `in_temp_input` in m°C and `in_humidityrelative_input` in m%RH.
//! The driver answers `EIO`/`ETIMEDOUT` when the sensor does not respond,
//! which is routine for DHT sensors and is why reads are retried.

use super::{RawSample, SensorBus};
use crate::error::BusError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_DEVICE_PATH: &str = "/sys/bus/iio/devices/iio:device0";

const TEMPERATURE_ATTR: &str = "in_temp_input";
const HUMIDITY_ATTR: &str = "in_humidityrelative_input";

#[derive(Debug, Clone)]
pub struct IioBus {
    device: PathBuf,
}

impl IioBus {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self { device: device.into() }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    fn read_milli(&self, attr: &str) -> Result<f32, BusError> {
        let path = self.device.join(attr);
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => BusError::Timeout,
            _ => BusError::Io {
                path: path.display().to_string(),
                detail: e.to_string(),
            },
        })?;

        let milli: i64 = content.trim().parse().map_err(|_| BusError::Io {
            path: path.display().to_string(),
            detail: format!("expected integer milli-units, got '{}'", content.trim()),
        })?;

        Ok(milli as f32 / 1000.0)
    }
}

impl Default for IioBus {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_PATH)
    }
}

impl SensorBus for IioBus {
    fn read_raw(&mut self) -> Result<RawSample, BusError> {
        let temperature_c = self.read_milli(TEMPERATURE_ATTR)?;
        let humidity = self.read_milli(HUMIDITY_ATTR)?;
        Ok(RawSample::new(temperature_c, humidity))
    }
}
