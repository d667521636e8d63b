//! Forwarding adapters from a [`Reading`] snapshot to each external sink.
//!
//! Adapters never retry: the next tick of their loop is the retry. A failure
//! is returned to the loop, which logs it and carries on.

use crate::display::{DisplayHandle, DisplayLine};
use crate::error::{DisplayError, PublishError};
use crate::metrics::MetricsRegistry;
use crate::publish::{format_value, PublishTarget, Publisher, HUMIDITY_KEY, TEMPERATURE_KEY};
use crate::reading::{humanize_age, Reading};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Text of the two display lines for a reading.
pub fn display_lines(reading: &Reading) -> (String, String) {
    (
        format!("Temp: {:.1}F     ", reading.temperature),
        format!("Hum : {:.1}%     ", reading.humidity),
    )
}

#[derive(Debug, Clone)]
pub struct DisplayAdapter {
    display: DisplayHandle,
}

impl DisplayAdapter {
    pub fn new(display: DisplayHandle) -> Self {
        Self { display }
    }

    /// Queue both lines. Each line is attempted even if the other fails.
    pub fn forward(&self, reading: &Reading) -> Result<(), DisplayError> {
        let (first, second) = display_lines(reading);
        let first = self.display.write_line(DisplayLine::First, &first);
        let second = self.display.write_line(DisplayLine::Second, &second);
        first.and(second)
    }
}

#[derive(Debug, Clone)]
pub struct MetricsAdapter {
    registry: Arc<MetricsRegistry>,
}

impl MetricsAdapter {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn forward(&self, reading: &Reading) {
        info!(
            room = self.registry.room(),
            "Updated: Temperature = {:.1}°F, Humidity = {:.1}%, Last Checked = {}, Unix = {}",
            reading.temperature,
            reading.humidity,
            humanize_age(reading.age()),
            reading.unix_seconds()
        );
        self.registry.record(reading);
    }
}

#[derive(Debug)]
pub struct PublishAdapter<P> {
    publisher: Arc<P>,
    target: PublishTarget,
}

impl<P> Clone for PublishAdapter<P> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
            target: self.target.clone(),
        }
    }
}

impl<P: Publisher> PublishAdapter<P> {
    pub fn new(publisher: Arc<P>, target: PublishTarget) -> Self {
        Self { publisher, target }
    }

    pub fn target(&self) -> &PublishTarget {
        &self.target
    }

    /// Publish both values concurrently; one failing does not stop the other.
    pub async fn forward(&self, reading: &Reading) -> Result<(), PublishError> {
        let (temperature, humidity) = tokio::join!(
            self.publish_one(TEMPERATURE_KEY, reading.temperature),
            self.publish_one(HUMIDITY_KEY, reading.humidity),
        );
        temperature.and(humidity)
    }

    async fn publish_one(&self, key: &str, value: f32) -> Result<(), PublishError> {
        let topic = self.target.topic(key);
        let payload = format_value(value);
        debug!(topic = %topic, "Publishing '{}'", payload);

        let result = self.publisher.publish(&topic, &payload).await;
        if let Err(e) = &result {
            warn!(topic = %topic, "{}", e);
        }
        result
    }
}
