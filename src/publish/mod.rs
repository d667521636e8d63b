pub mod mqtt;

pub use mqtt::{MqttPublisher, MqttSettings};

use crate::error::PublishError;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::future::Future;

pub const TEMPERATURE_KEY: &str = "temperature";
pub const HUMIDITY_KEY: &str = "humidity";

/// Remote publish transport. May block (asynchronously) or fail.
pub trait Publisher: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Where feeds live: `{user}/feeds/{room}-{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    pub user: String,
    pub room: String,
}

impl PublishTarget {
    pub fn new(user: impl Into<String>, room: impl Into<String>) -> Self {
        Self { user: user.into(), room: room.into() }
    }

    pub fn topic(&self, key: &str) -> String {
        format!("{}/feeds/{}-{}", self.user, self.room, key)
    }
}

/// Room for any `f32` at one decimal; `f32::MIN` renders as 42 bytes.
pub const PAYLOAD_CAPACITY: usize = 48;

/// One-decimal payload, e.g. `77.0`.
pub fn format_value(value: f32) -> ArrayString<PAYLOAD_CAPACITY> {
    let mut payload = ArrayString::new();
    // Infallible at this capacity
    let _ = write!(payload, "{value:.1}");
    payload
}
