use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zeromon::consumers::PublishAdapter;
use zeromon::display::{CharacterDisplay, DisplayHandle, DisplayLine};
use zeromon::error::{BusError, DisplayError, PublishError};
use zeromon::metrics::MetricsRegistry;
use zeromon::monitor::{Monitor, MonitorHandle, ACQUIRE_TASK, PUBLISH_TASK, REFRESH_TASK};
use zeromon::publish::{PublishTarget, Publisher};
use zeromon::sensor::{RawSample, RetryPolicy, SensorBus, SensorReader};
use zeromon::{Reading, SharedEnvironment};

const TICK: Duration = Duration::from_millis(20);
const PUBLISH_TICK: Duration = Duration::from_millis(50);
const PATIENCE: Duration = Duration::from_secs(3);

/// Replays queued results, then repeats `fallback` forever.
struct ScriptedBus {
    script: VecDeque<Result<RawSample, BusError>>,
    fallback: Result<RawSample, BusError>,
}

impl ScriptedBus {
    fn steady(temperature_c: f32, humidity: f32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Ok(RawSample::new(temperature_c, humidity)),
        }
    }

    fn broken() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Err(BusError::Timeout),
        }
    }
}

impl SensorBus for ScriptedBus {
    fn read_raw(&mut self) -> Result<RawSample, BusError> {
        self.script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Clone, Default)]
struct RecordingDisplay {
    lines: Arc<Mutex<Vec<String>>>,
    fail_writes: bool,
}

impl CharacterDisplay for RecordingDisplay {
    fn write_line(&mut self, line: DisplayLine, text: &str) -> Result<(), DisplayError> {
        if self.fail_writes {
            return Err(DisplayError::Write("i2c nack".to_string()));
        }
        self.lines.lock().unwrap().push(format!("{}:{}", line.index(), text));
        Ok(())
    }

    fn set_backlight(&mut self, _on: bool) -> Result<(), DisplayError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    fn home(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Transport {
                topic: topic.to_string(),
                detail: "broker unreachable".to_string(),
            });
        }
        self.sent.lock().unwrap().push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

fn target() -> PublishTarget {
    PublishTarget::new("jnovack", "office")
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + PATIENCE;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn start<B: SensorBus + 'static>(
    bus: B,
    registry: &Arc<MetricsRegistry>,
    display: Option<DisplayHandle>,
    publisher: Option<Arc<RecordingPublisher>>,
) -> MonitorHandle {
    let reader = SensorReader::new(bus, RetryPolicy::attempts(10));
    let mut monitor = Monitor::new(reader, Arc::clone(registry))
        .acquire_every(TICK)
        .publish_every(PUBLISH_TICK);
    if let Some(display) = display {
        monitor = monitor.with_display(display);
    }
    if let Some(publisher) = publisher {
        monitor = monitor.with_publisher(PublishAdapter::new(publisher, target()));
    }
    monitor.start().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reading_reaches_every_consumer() {
    let registry = Arc::new(MetricsRegistry::new("office"));
    let screen = RecordingDisplay::default();
    let (display, worker) = DisplayHandle::spawn(screen.clone());
    let publisher = Arc::new(RecordingPublisher::default());

    let handle = start(
        ScriptedBus::steady(25.0, 40.0),
        &registry,
        Some(display.clone()),
        Some(Arc::clone(&publisher)),
    );
    assert!(handle.is_publishing());

    assert!(wait_until(|| registry.temperature.get() == Some(77.0)).await);
    assert_eq!(registry.humidity.get(), Some(40.0));
    assert!(registry.render().contains("temperature{room=\"office\"} 77\n"));
    assert!(registry.render().contains("humidity{room=\"office\"} 40\n"));

    assert!(wait_until(|| publisher.sent.lock().unwrap().len() >= 2).await);
    {
        let sent = publisher.sent.lock().unwrap();
        assert!(sent.contains(&("jnovack/feeds/office-temperature".to_string(), "77.0".to_string())));
        assert!(sent.contains(&("jnovack/feeds/office-humidity".to_string(), "40.0".to_string())));
    }

    assert!(wait_until(|| screen.lines.lock().unwrap().len() >= 2).await);
    {
        let lines = screen.lines.lock().unwrap();
        assert!(lines.contains(&"0:Temp: 77.0F     ".to_string()));
        assert!(lines.contains(&"1:Hum : 40.0%     ".to_string()));
    }

    let reading = handle.environment().snapshot().unwrap();
    assert_eq!(reading.temperature, 77.0);
    assert!(reading.unix_seconds() > 0);

    handle.stop().await;
    drop(display);
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_acquisition_forwards_nothing() {
    let registry = Arc::new(MetricsRegistry::new("office"));
    let screen = RecordingDisplay::default();
    let (display, _worker) = DisplayHandle::spawn(screen.clone());
    let publisher = Arc::new(RecordingPublisher::default());

    let handle = start(
        ScriptedBus::broken(),
        &registry,
        Some(display),
        Some(Arc::clone(&publisher)),
    );

    assert!(wait_until(|| handle.stats(ACQUIRE_TASK).map_or(0, |s| s.failed) >= 3).await);
    assert!(wait_until(|| handle.stats(PUBLISH_TASK).map_or(0, |s| s.completed) >= 2).await);

    let env = handle.environment().clone();
    assert!(env.snapshot().is_none());
    assert_eq!(env.write_count(), 0);
    assert!(!env.read().is_fresh());

    assert_eq!(registry.temperature.get(), None);
    assert!(!registry.render().contains("temperature{"));
    assert!(publisher.sent.lock().unwrap().is_empty());
    assert!(screen.lines.lock().unwrap().is_empty());

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recovers_after_transient_failures() {
    let mut bus = ScriptedBus::steady(21.0, 55.5);
    // Nine bad attempts still fit in one ten-attempt acquisition
    for _ in 0..9 {
        bus.script.push_back(Err(BusError::Checksum));
    }

    let registry = Arc::new(MetricsRegistry::new("lab"));
    let handle = start(bus, &registry, None, None);
    assert!(!handle.is_publishing());

    assert!(wait_until(|| handle.environment().snapshot().is_some()).await);
    let reading = handle.environment().read();
    assert!((reading.temperature - 69.8).abs() < 1e-3);
    assert_eq!(reading.humidity, 55.5);
    assert_eq!(handle.stats(ACQUIRE_TASK).unwrap().failed, 0);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_failure_does_not_block_local_consumers() {
    let registry = Arc::new(MetricsRegistry::new("office"));
    let screen = RecordingDisplay::default();
    let (display, _worker) = DisplayHandle::spawn(screen.clone());
    let publisher = Arc::new(RecordingPublisher { fail: true, ..Default::default() });

    let handle = start(
        ScriptedBus::steady(25.0, 40.0),
        &registry,
        Some(display),
        Some(publisher),
    );

    assert!(wait_until(|| handle.stats(PUBLISH_TASK).map_or(0, |s| s.failed) >= 2).await);
    assert_eq!(registry.temperature.get(), Some(77.0));
    assert!(!screen.lines.lock().unwrap().is_empty());
    assert!(handle.stats(ACQUIRE_TASK).unwrap().completed > 0);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_display_failure_does_not_block_metrics() {
    let registry = Arc::new(MetricsRegistry::new("office"));
    let screen = RecordingDisplay { fail_writes: true, ..Default::default() };
    let (display, _worker) = DisplayHandle::spawn(screen.clone());
    let publisher = Arc::new(RecordingPublisher::default());

    let handle = start(
        ScriptedBus::steady(25.0, 40.0),
        &registry,
        Some(display),
        Some(Arc::clone(&publisher)),
    );

    assert!(wait_until(|| registry.temperature.get() == Some(77.0)).await);
    assert!(wait_until(|| publisher.sent.lock().unwrap().len() >= 2).await);
    assert!(screen.lines.lock().unwrap().is_empty());

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_environment_and_stop() {
    let env = SharedEnvironment::new();
    let registry = Arc::new(MetricsRegistry::new("office"));
    let reader = SensorReader::new(ScriptedBus::steady(0.0, 10.0), RetryPolicy::default());
    let handle = Monitor::new(reader, registry)
        .with_environment(env.clone())
        .acquire_every(TICK)
        .start()
        .unwrap();

    assert!(wait_until(|| env.write_count() >= 2).await);
    assert_eq!(env.read().temperature, 32.0);

    let signal = handle.shutdown_signal();
    let finished = handle.stop().await;
    assert!(signal.is_triggered());

    let names: Vec<_> = finished.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec![ACQUIRE_TASK, REFRESH_TASK]);
    for (_, stats) in &finished {
        assert_eq!(stats.in_flight, 0);
    }

    // Nothing writes once the loops are joined
    let writes = env.write_count();
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(env.write_count(), writes);
}

/// Humidity climbs by one %RH per read.
#[derive(Default)]
struct RisingBus {
    reads: u32,
}

impl SensorBus for RisingBus {
    fn read_raw(&mut self) -> Result<RawSample, BusError> {
        self.reads += 1;
        Ok(RawSample::new(20.0, (self.reads as f32).min(100.0)))
    }
}

/// Records each payload next to the environment's reading at call time.
struct SnapshotPublisher {
    env: SharedEnvironment,
    sent: Mutex<Vec<(String, String, Reading)>>,
}

impl Publisher for SnapshotPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let current = self.env.read();
        self.sent.lock().unwrap().push((topic.to_string(), payload.to_string(), current));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_sends_latest_reading() {
    let env = SharedEnvironment::new();
    let publisher = Arc::new(SnapshotPublisher { env: env.clone(), sent: Mutex::new(Vec::new()) });
    let reader = SensorReader::new(RisingBus::default(), RetryPolicy::default());

    let handle = Monitor::new(reader, Arc::new(MetricsRegistry::new("office")))
        .with_environment(env.clone())
        .with_publisher(PublishAdapter::new(Arc::clone(&publisher), target()))
        .acquire_every(Duration::from_millis(10))
        .publish_every(Duration::from_millis(100))
        .start()
        .unwrap();

    let humidity_sent = || {
        publisher
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(topic, _, _)| topic == "jnovack/feeds/office-humidity")
            .map(|(_, payload, current)| (payload.parse::<f32>().unwrap(), current.humidity))
            .collect::<Vec<_>>()
    };
    assert!(wait_until(|| humidity_sent().len() >= 3).await);
    handle.stop().await;

    let sent = humidity_sent();
    for &(published, current) in &sent {
        // Only the acquisitions racing the send itself may be missing
        assert!(current >= published, "{published} newer than {current}");
        assert!(current - published <= 4.0, "{published} stale against {current}");
    }
    for pair in sent.windows(2) {
        assert!(pair[1].0 > pair[0].0, "publish repeated an old reading: {sent:?}");
    }
    // Several acquisitions happened between publishes
    assert!(sent.last().unwrap().0 >= 5.0, "{sent:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumers_observe_the_same_reading() {
    let mut bus = ScriptedBus::broken();
    bus.script.push_back(Ok(RawSample::new(21.0, 50.0)));
    bus.script.push_back(Ok(RawSample::new(22.0, 51.0)));
    bus.script.push_back(Ok(RawSample::new(23.5, 52.5)));

    let registry = Arc::new(MetricsRegistry::new("office"));
    let screen = RecordingDisplay::default();
    let (display, _worker) = DisplayHandle::spawn(screen.clone());
    let publisher = Arc::new(RecordingPublisher::default());

    let handle = start(bus, &registry, Some(display), Some(Arc::clone(&publisher)));
    let env = handle.environment().clone();

    assert!(wait_until(|| env.write_count() == 3).await);
    assert!(wait_until(|| registry.humidity.get() == Some(52.5)).await);
    assert!(wait_until(|| {
        publisher
            .sent
            .lock()
            .unwrap()
            .contains(&("jnovack/feeds/office-humidity".to_string(), "52.5".to_string()))
    })
    .await);
    assert!(wait_until(|| screen.lines.lock().unwrap().contains(&"1:Hum : 52.5%     ".to_string())).await);
    handle.stop().await;

    // Failed acquisitions after the third left it in place
    let last = env.read();
    assert_eq!(env.write_count(), 3);
    assert_eq!(last.humidity, 52.5);

    assert_eq!(registry.temperature.get(), Some(f64::from(last.temperature)));
    assert_eq!(registry.humidity.get(), Some(f64::from(last.humidity)));
    assert_eq!(registry.time.get(), Some(last.unix_seconds() as f64));

    let temperature = format!("{:.1}", last.temperature);
    assert_eq!(temperature, "74.3");
    assert!(publisher
        .sent
        .lock()
        .unwrap()
        .contains(&("jnovack/feeds/office-temperature".to_string(), temperature.clone())));
    assert!(screen
        .lines
        .lock()
        .unwrap()
        .contains(&format!("0:Temp: {temperature}F     ")));
}

/// Takes a while to hand each message to the broker.
#[derive(Default)]
struct SlowPublisher {
    started: AtomicU32,
    finished: AtomicU32,
}

impl Publisher for SlowPublisher {
    async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), PublishError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_drains_publishes_and_sends_nothing_after() {
    let publisher = Arc::new(SlowPublisher::default());
    let reader = SensorReader::new(ScriptedBus::steady(25.0, 40.0), RetryPolicy::default());
    let handle = Monitor::new(reader, Arc::new(MetricsRegistry::new("office")))
        .with_publisher(PublishAdapter::new(Arc::clone(&publisher), target()))
        .acquire_every(TICK)
        .publish_every(Duration::from_millis(30))
        .start()
        .unwrap();

    assert!(wait_until(|| publisher.started.load(Ordering::SeqCst) >= 2).await);
    let signal = handle.shutdown_signal();
    handle.stop().await;
    assert!(signal.is_triggered());

    // Every publish that began before the stop has finished
    let started = publisher.started.load(Ordering::SeqCst);
    assert_eq!(publisher.finished.load(Ordering::SeqCst), started);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(publisher.started.load(Ordering::SeqCst), started);
}
