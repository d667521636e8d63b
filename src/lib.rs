//! # ZeroMon
//!
//! A room environment monitor: a temperature/humidity sensor is sampled on a
//! fixed cadence and the latest reading is fanned out to independent consumers
//! running on their own timers.
//!
//! ## Features
//!
//! - **Decoupled acquisition**: the blocking bus transaction never stalls a consumer
//! - **Shared environment**: one writer, many readers, no torn readings
//! - **Multi-cadence scheduling**: every loop has its own clock and cooperative shutdown
//! - **Character display**: two-line LCD refresh through a serialized handle
//! - **Prometheus metrics**: `temperature`, `humidity` and `time` gauges per room
//! - **Remote telemetry**: MQTT publish of one-decimal values on a slower cadence
//!
//! ## Quick Start
//!
//! ```rust
//! use zeromon::{Reading, SharedEnvironment};
//!
//! let env = SharedEnvironment::new();
//! assert!(env.snapshot().is_none());
//!
//! env.write(Reading::from_celsius(25.0, 40.0));
//! let reading = env.snapshot().unwrap();
//! assert_eq!(reading.temperature, 77.0);
//! ```
//!
//! ## Architecture
//!
//! - [`sensor`] - Bus primitive, retry policy and the acquiring reader
//! - [`environment`] - Shared latest-reading store
//! - [`scheduler`] - Independently clocked periodic tasks
//! - [`consumers`] - Display, metrics and publish adapters
//! - [`monitor`] - Wires the acquisition and consumer loops together
//! - [`http`] - `/metrics` endpoint

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod consumers;
pub mod display;
pub mod environment;
pub mod error;
pub mod http;
pub mod metrics;
pub mod monitor;
pub mod publish;
pub mod reading;
pub mod scheduler;
pub mod sensor;

// Re-export main public types for convenience
pub use config::MonitorConfig;
pub use environment::SharedEnvironment;
pub use error::Error;
pub use monitor::{Monitor, MonitorHandle};
pub use reading::Reading;
pub use scheduler::{Scheduler, ShutdownSignal};
pub use sensor::{RetryPolicy, SensorBus, SensorReader};
