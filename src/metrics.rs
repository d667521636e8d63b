//! Room gauges in Prometheus text exposition format.
//!
//! A gauge that was never set renders no sample at all, so a scrape before the
//! first successful acquisition shows the metric families but no values.

use crate::reading::Reading;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    bits: AtomicU64,
    present: AtomicBool,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            bits: AtomicU64::new(0),
            present: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
        self.present.store(true, Ordering::Release);
    }

    pub fn get(&self) -> Option<f64> {
        if self.present.load(Ordering::Acquire) {
            Some(f64::from_bits(self.bits.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    fn render(&self, label: &str, writer: &mut impl Write) -> fmt::Result {
        writeln!(writer, "# HELP {} {}", self.name, self.help)?;
        writeln!(writer, "# TYPE {} gauge", self.name)?;
        if let Some(value) = self.get() {
            writeln!(writer, "{}{{room=\"{}\"}} {}", self.name, label, value)?;
        }
        Ok(())
    }
}

/// The three gauges exported per room.
#[derive(Debug)]
pub struct MetricsRegistry {
    room: String,
    pub temperature: Gauge,
    pub humidity: Gauge,
    pub time: Gauge,
}

impl MetricsRegistry {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            temperature: Gauge::new("temperature", "Current temperature value of the sensor."),
            humidity: Gauge::new("humidity", "Current humidity value of the sensor."),
            time: Gauge::new("time", "UnixTime the sensor was last checked."),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn record(&self, reading: &Reading) {
        self.temperature.set(f64::from(reading.temperature));
        self.humidity.set(f64::from(reading.humidity));
        self.time.set(reading.unix_seconds() as f64);
    }

    pub fn render_prometheus(&self, writer: &mut impl Write) -> fmt::Result {
        let label = escape_label(&self.room);
        self.temperature.render(&label, writer)?;
        self.humidity.render(&label, writer)?;
        self.time.render(&label, writer)?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(512);
        // Writing into a String cannot fail
        let _ = self.render_prometheus(&mut out);
        out
    }
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}
