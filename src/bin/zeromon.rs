use clap::{App, Arg, ArgMatches};
use colored::*;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tokio::task::JoinHandle;
use zeromon::config::{parse_i2c_address, parse_interval, DisplaySource, MonitorConfig, SensorSource};
use zeromon::consumers::PublishAdapter;
use zeromon::display::{self, ConsoleDisplay, DisplayHandle};
use zeromon::error::{ConfigError, DisplayError};
use zeromon::metrics::MetricsRegistry;
use zeromon::monitor::{self, Monitor};
use zeromon::publish::MqttPublisher;
use zeromon::sensor::{IioBus, RetryPolicy, SensorBus, SensorReader, SimulatedBus};
use zeromon::{http, Scheduler, ShutdownSignal};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const REVISION: &str = match option_env!("ZEROMON_REVISION") {
    Some(revision) => revision,
    None => "00000000",
};

// clap prints "zeromon <version>"
fn build_info() -> String {
    format!("version v{} git revision {} rust", VERSION, REVISION)
}

fn cli<'a, 'b>(version: &'b str) -> App<'a, 'b> {
    App::new("zeromon")
        .version(version)
        .about("🌡️  Room temperature/humidity monitor with LCD, Prometheus metrics and MQTT feeds")
        .arg(
            Arg::with_name("room")
                .long("room")
                .value_name("ROOM")
                .help("room name")
                .takes_value(true)
                .env("ZEROMON_ROOM"),
        )
        .arg(
            Arg::with_name("aiouser")
                .long("aiouser")
                .value_name("USER")
                .help("io.adafruit.com Username")
                .takes_value(true)
                .env("ZEROMON_AIOUSER"),
        )
        .arg(
            Arg::with_name("aiokey")
                .long("aiokey")
                .value_name("KEY")
                .help("io.adafruit.com API Key (AIO)")
                .takes_value(true)
                .env("ZEROMON_AIOKEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::with_name("broker")
                .long("broker")
                .value_name("HOST")
                .help("MQTT broker host")
                .takes_value(true)
                .default_value(zeromon::publish::mqtt::DEFAULT_BROKER_HOST)
                .env("ZEROMON_BROKER"),
        )
        .arg(
            Arg::with_name("broker-port")
                .long("broker-port")
                .value_name("PORT")
                .help("MQTT broker port")
                .takes_value(true)
                .default_value("1883")
                .env("ZEROMON_BROKER_PORT"),
        )
        .arg(
            Arg::with_name("listen")
                .long("listen")
                .value_name("ADDR")
                .help("prometheus metrics bind address")
                .takes_value(true)
                .default_value("0.0.0.0")
                .env("ZEROMON_LISTEN"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("prometheus metrics port")
                .takes_value(true)
                .default_value("9204")
                .env("ZEROMON_PORT"),
        )
        .arg(
            Arg::with_name("loglevel")
                .long("loglevel")
                .value_name("LEVEL")
                .help("log level (0=emerg through 6=debug)")
                .takes_value(true)
                .default_value("4")
                .env("ZEROMON_LOGLEVEL"),
        )
        .arg(
            Arg::with_name("interval")
                .long("interval")
                .value_name("DURATION")
                .help("sensor read and display refresh interval (e.g. 5s, 500ms)")
                .takes_value(true)
                .default_value("5s")
                .env("ZEROMON_INTERVAL"),
        )
        .arg(
            Arg::with_name("publish-interval")
                .long("publish-interval")
                .value_name("DURATION")
                .help("remote publish interval")
                .takes_value(true)
                .default_value("30s")
                .env("ZEROMON_PUBLISH_INTERVAL"),
        )
        .arg(
            Arg::with_name("retries")
                .long("retries")
                .value_name("COUNT")
                .help("sensor read attempts per interval")
                .takes_value(true)
                .default_value("10")
                .env("ZEROMON_RETRIES"),
        )
        .arg(
            Arg::with_name("retry-delay")
                .long("retry-delay")
                .value_name("DURATION")
                .help("pause between failed sensor attempts")
                .takes_value(true)
                .default_value("0ms")
                .env("ZEROMON_RETRY_DELAY"),
        )
        .arg(
            Arg::with_name("sensor")
                .long("sensor")
                .value_name("SOURCE")
                .help("sensor source")
                .takes_value(true)
                .possible_values(&["iio", "simulated"])
                .default_value("iio")
                .env("ZEROMON_SENSOR"),
        )
        .arg(
            Arg::with_name("iio-device")
                .long("iio-device")
                .value_name("PATH")
                .help("IIO device directory of the DHT sensor")
                .takes_value(true)
                .default_value(zeromon::sensor::iio::DEFAULT_DEVICE_PATH)
                .env("ZEROMON_IIO_DEVICE"),
        )
        .arg(
            Arg::with_name("display")
                .long("display")
                .value_name("SINK")
                .help("where the two display lines go")
                .takes_value(true)
                .possible_values(&["lcd", "console"])
                .default_value("lcd")
                .env("ZEROMON_DISPLAY"),
        )
        .arg(
            Arg::with_name("i2c-bus")
                .long("i2c-bus")
                .value_name("PATH")
                .help("I2C bus device of the LCD backpack")
                .takes_value(true)
                .default_value(display::lcd::DEFAULT_BUS)
                .env("ZEROMON_I2C_BUS"),
        )
        .arg(
            Arg::with_name("lcd-address")
                .long("lcd-address")
                .value_name("ADDR")
                .help("I2C address of the LCD backpack (e.g. 0x27)")
                .takes_value(true)
                .default_value("0x27")
                .env("ZEROMON_LCD_ADDRESS"),
        )
}

fn parsed<T: FromStr>(matches: &ArgMatches<'_>, field: &'static str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = matches.value_of(field).unwrap_or_default();
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        detail: format!("'{raw}': {e}"),
    })
}

fn config_from_matches(matches: &ArgMatches<'_>) -> Result<MonitorConfig, ConfigError> {
    let text = |field: &str| matches.value_of(field).unwrap_or_default().to_string();

    let listen: IpAddr = parsed(matches, "listen")?;
    let sensor = match matches.value_of("sensor") {
        Some("simulated") => SensorSource::Simulated,
        _ => SensorSource::Iio { device: text("iio-device").into() },
    };
    let display = match matches.value_of("display") {
        Some("console") => DisplaySource::Console,
        _ => DisplaySource::Lcd {
            bus: text("i2c-bus").into(),
            address: parse_i2c_address("lcd-address", &text("lcd-address"))?,
        },
    };

    Ok(MonitorConfig {
        room: text("room"),
        aio_user: text("aiouser"),
        aio_key: text("aiokey"),
        broker_host: text("broker"),
        broker_port: parsed(matches, "broker-port")?,
        metrics_addr: SocketAddr::new(listen, parsed(matches, "port")?),
        log_level: parsed(matches, "loglevel")?,
        acquire_interval: parse_interval("interval", &text("interval"))?,
        publish_interval: parse_interval("publish-interval", &text("publish-interval"))?,
        retry: RetryPolicy::new(
            parsed(matches, "retries")?,
            parse_interval("retry-delay", &text("retry-delay"))?,
        ),
        sensor,
        display,
        ..MonitorConfig::default()
    })
}

fn sensor_bus(source: &SensorSource) -> Box<dyn SensorBus> {
    match source {
        SensorSource::Iio { device } => Box::new(IioBus::new(device)),
        SensorSource::Simulated => Box::new(SimulatedBus::new()),
    }
}

#[cfg(target_os = "linux")]
async fn open_lcd(bus: std::path::PathBuf, address: u8) -> Result<(DisplayHandle, JoinHandle<()>), DisplayError> {
    // Controller init sleeps between nibbles
    let lcd = tokio::task::spawn_blocking(move || display::lcd::open(&bus, address))
        .await
        .map_err(|e| DisplayError::Init(e.to_string()))??;
    Ok(DisplayHandle::spawn(lcd))
}

#[cfg(not(target_os = "linux"))]
async fn open_lcd(bus: std::path::PathBuf, _address: u8) -> Result<(DisplayHandle, JoinHandle<()>), DisplayError> {
    Err(DisplayError::Init(format!("{}: no I2C support on this platform", bus.display())))
}

async fn open_display(source: &DisplaySource) -> Result<(DisplayHandle, JoinHandle<()>), DisplayError> {
    match source {
        DisplaySource::Lcd { bus, address } => open_lcd(bus.clone(), *address).await,
        DisplaySource::Console => Ok(DisplayHandle::spawn(ConsoleDisplay::new())),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let version = build_info();
    let matches = cli(&version).get_matches();
    println!("{} {}", "zeromon".bright_cyan().bold(), version.bright_white());

    let config = config_from_matches(&matches)?;

    tracing_subscriber::fmt().with_max_level(config.level()).init();

    config.validate()?;
    debug!("configuration: {}", config.to_json());

    let shutdown = ShutdownSignal::new();
    // The MQTT event loop outlives the loops so the final publishes and the
    // disconnect still reach the broker
    let transport_shutdown = ShutdownSignal::new();

    // Display first: without it the process has nothing to show
    let (display, display_worker) = open_display(&config.display).await?;
    monitor::greet(&display, "ZeroMon", &format!("v{VERSION}"))
        .await
        .map_err(|e| DisplayError::Init(e.to_string()))?;

    let registry = Arc::new(MetricsRegistry::new(&config.room));
    let listener = http::bind(config.metrics_addr).await?;
    let server = tokio::spawn(http::serve(listener, Arc::clone(&registry), shutdown.subscribe()));

    let reader = SensorReader::new(sensor_bus(&config.sensor), config.retry);
    let mut monitor = Monitor::new(reader, Arc::clone(&registry))
        .with_display(display.clone())
        .acquire_every(config.acquire_interval)
        .publish_every(config.publish_interval);

    let mqtt = match config.publish_target() {
        Some(target) => {
            let (publisher, driver) = MqttPublisher::connect(&config.mqtt_settings(), transport_shutdown.subscribe());
            monitor = monitor.with_publisher(PublishAdapter::new(Arc::new(publisher.clone()), target));
            Some((publisher, driver))
        }
        None => {
            warn!(
                "Not publishing statistics.  Username: {}, Key set: {}",
                config.aio_user,
                !config.aio_key.is_empty()
            );
            None
        }
    };

    let handle = monitor.start_with(Scheduler::with_shutdown(shutdown.clone()))?;

    if let Err(e) = display.backlight(true).await {
        warn!("could not turn backlight on: {}", e);
    }
    println!("{} {}", "✅".green(), "ZeroMon running".bright_green());

    wait_for_signal().await?;
    info!("signal received, shutting down");

    // No new ticks and no more scrapes; stop() then drains in-flight firings
    shutdown.trigger();
    for (task, stats) in handle.stop().await {
        debug!(
            task,
            fired = stats.fired,
            completed = stats.completed,
            failed = stats.failed,
            "final task statistics"
        );
    }

    if let Some((publisher, _)) = &mqtt {
        publisher.disconnect().await;
    }
    transport_shutdown.trigger();
    monitor::dim(&display).await;

    let _ = server.await;
    if let Some((_, driver)) = mqtt {
        let _ = tokio::time::timeout(Duration::from_secs(1), driver).await;
    }
    drop(display);
    let _ = display_worker.await;

    println!("{} {}", "🛑".red(), "ZeroMon stopped".bright_white());
    Ok(())
}
