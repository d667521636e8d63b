//! Wires the sensor, the shared environment and the consumers onto the
//! scheduler.
//!
//! Three loops run on their own clocks:
//!
//! - `acquire`: reads the sensor off the async workers and, on success,
//!   replaces the shared reading. Failures leave the state untouched.
//! - `refresh`: forwards the latest reading to the metrics gauges and the
//!   display.
//! - `publish`: forwards the latest reading to the remote feeds, when enabled.
//!
//! Consumers skip their tick until the first reading has been accepted.

use crate::consumers::{DisplayAdapter, MetricsAdapter, PublishAdapter};
use crate::display::{DisplayHandle, DisplayLine};
use crate::environment::SharedEnvironment;
use crate::error::{AcquireError, ConfigError, DisplayError, PublishError};
use crate::metrics::MetricsRegistry;
use crate::publish::Publisher;
use crate::reading::Reading;
use crate::scheduler::{Scheduler, ShutdownSignal, TaskStatsSnapshot};
use crate::sensor::{SensorBus, SensorReader};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const ACQUIRE_TASK: &str = "acquire";
pub const REFRESH_TASK: &str = "refresh";
pub const PUBLISH_TASK: &str = "publish";

type PublishFuture = Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send>>;
type PublishFn = Arc<dyn Fn(Reading) -> PublishFuture + Send + Sync>;

pub struct Monitor<B> {
    env: SharedEnvironment,
    reader: SensorReader<B>,
    metrics: MetricsAdapter,
    display: Option<DisplayAdapter>,
    publish: Option<PublishFn>,
    acquire_interval: Duration,
    refresh_interval: Duration,
    publish_interval: Duration,
}

impl<B> std::fmt::Debug for Monitor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("display", &self.display.is_some())
            .field("publish", &self.publish.is_some())
            .field("acquire_interval", &self.acquire_interval)
            .field("refresh_interval", &self.refresh_interval)
            .field("publish_interval", &self.publish_interval)
            .finish_non_exhaustive()
    }
}

impl<B: SensorBus + 'static> Monitor<B> {
    pub fn new(reader: SensorReader<B>, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            env: SharedEnvironment::new(),
            reader,
            metrics: MetricsAdapter::new(registry),
            display: None,
            publish: None,
            acquire_interval: crate::config::DEFAULT_ACQUIRE_INTERVAL,
            refresh_interval: crate::config::DEFAULT_ACQUIRE_INTERVAL,
            publish_interval: crate::config::DEFAULT_PUBLISH_INTERVAL,
        }
    }

    /// Share an existing environment instead of a fresh one.
    pub fn with_environment(mut self, env: SharedEnvironment) -> Self {
        self.env = env;
        self
    }

    pub fn with_display(mut self, display: DisplayHandle) -> Self {
        self.display = Some(DisplayAdapter::new(display));
        self
    }

    pub fn with_publisher<P: Publisher>(mut self, adapter: PublishAdapter<P>) -> Self {
        let publish: PublishFn = Arc::new(move |reading: Reading| -> PublishFuture {
            let adapter = adapter.clone();
            Box::pin(async move { adapter.forward(&reading).await })
        });
        self.publish = Some(publish);
        self
    }

    /// Acquisition cadence; the refresh loop follows it unless set apart.
    pub fn acquire_every(mut self, interval: Duration) -> Self {
        self.acquire_interval = interval;
        self.refresh_interval = interval;
        self
    }

    pub fn refresh_every(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn publish_every(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.env
    }

    /// Start every loop. Must be called from within a tokio runtime.
    pub fn start(self) -> Result<MonitorHandle, ConfigError> {
        self.start_with(Scheduler::new())
    }

    pub fn start_with(self, mut scheduler: Scheduler) -> Result<MonitorHandle, ConfigError> {
        let Monitor {
            env,
            reader,
            metrics,
            display,
            publish,
            acquire_interval,
            refresh_interval,
            publish_interval,
        } = self;

        let reader = Arc::new(Mutex::new(reader));
        let acquire_env = env.clone();
        scheduler.every(ACQUIRE_TASK, acquire_interval, move || {
            acquire_once(Arc::clone(&reader), acquire_env.clone())
        })?;

        let refresh_env = env.clone();
        scheduler.every(REFRESH_TASK, refresh_interval, move || {
            let snapshot = refresh_env.snapshot();
            let metrics = metrics.clone();
            let display = display.clone();
            async move { refresh_once(snapshot, &metrics, display.as_ref()) }
        })?;

        let publishing = publish.is_some();
        if let Some(publish) = publish {
            let publish_env = env.clone();
            scheduler.every(PUBLISH_TASK, publish_interval, move || {
                let snapshot = publish_env.snapshot();
                let publish = Arc::clone(&publish);
                async move {
                    match snapshot {
                        Some(reading) => publish(reading).await,
                        None => {
                            trace!("no reading yet, nothing to publish");
                            Ok(())
                        }
                    }
                }
            })?;
        }

        info!(
            acquire = ?acquire_interval,
            refresh = ?refresh_interval,
            publish = ?publishing.then_some(publish_interval),
            "monitor loops started"
        );

        Ok(MonitorHandle { env, scheduler })
    }
}

async fn acquire_once<B: SensorBus + 'static>(
    reader: Arc<Mutex<SensorReader<B>>>,
    env: SharedEnvironment,
) -> Result<(), AcquireError> {
    let acquired = tokio::task::spawn_blocking(move || {
        let mut guard = match reader.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(AcquireError::BusBusy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let acquired = guard.acquire();
        drop(guard);
        acquired
    })
    .await
    .map_err(|e| AcquireError::Aborted(e.to_string()))?;

    match acquired {
        Ok(reading) => {
            env.write(reading);
            Ok(())
        }
        Err(AcquireError::BusBusy) => {
            debug!("previous acquisition still on the bus, skipping tick");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn refresh_once(
    snapshot: Option<Reading>,
    metrics: &MetricsAdapter,
    display: Option<&DisplayAdapter>,
) -> Result<(), DisplayError> {
    let Some(reading) = snapshot else {
        trace!("no reading yet, nothing to refresh");
        return Ok(());
    };

    metrics.forward(&reading);
    match display {
        Some(display) => display.forward(&reading),
        None => Ok(()),
    }
}

/// Running monitor: its environment and the scheduler owning the loops.
#[derive(Debug)]
pub struct MonitorHandle {
    env: SharedEnvironment,
    scheduler: Scheduler,
}

impl MonitorHandle {
    pub fn environment(&self) -> &SharedEnvironment {
        &self.env
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.scheduler.shutdown_signal()
    }

    pub fn stats(&self, task: &str) -> Option<TaskStatsSnapshot> {
        self.scheduler.stats(task)
    }

    pub fn is_publishing(&self) -> bool {
        self.scheduler.cadence(PUBLISH_TASK).is_some()
    }

    /// Stop scheduling and wait for in-flight work to finish.
    pub async fn stop(self) -> Vec<(&'static str, TaskStatsSnapshot)> {
        self.scheduler.shutdown();
        self.scheduler.join().await
    }
}

/// Startup screen: title and version, backlight still off.
pub async fn greet(display: &DisplayHandle, title: &str, version: &str) -> Result<(), DisplayError> {
    display.backlight(false).await?;
    display.clear().await?;
    display.show(DisplayLine::First, title).await?;
    display.show(DisplayLine::Second, version).await
}

/// Single best-effort cleanup before exit.
pub async fn dim(display: &DisplayHandle) {
    if let Err(e) = display.backlight(false).await {
        warn!("could not turn backlight off: {}", e);
    }
}
