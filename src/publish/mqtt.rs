//! MQTT transport for Adafruit IO style feeds.

use super::Publisher;
use crate::error::PublishError;
use crate::scheduler::ShutdownListener;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

pub const DEFAULT_BROKER_HOST: &str = "io.adafruit.com";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "github.com/jnovack/zeromon";

const REQUEST_CAPACITY: usize = 16;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl MqttSettings {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_credentials(self.username.clone(), self.password.clone());
        options.set_clean_session(false);
        options.set_keep_alive(KEEP_ALIVE);
        options
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Publishes through a rumqttc client whose event loop runs on its own task.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    timeout: Duration,
}

impl std::fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPublisher").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl MqttPublisher {
    /// Create the client and start driving its connection.
    ///
    /// Connecting happens in the background; publishes issued before the
    /// broker answers are queued by the client.
    pub fn connect(settings: &MqttSettings, shutdown: ShutdownListener) -> (Self, JoinHandle<()>) {
        let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        info!("Publishing to {}:{}/{}", settings.host, settings.port, settings.username);
        let driver = tokio::spawn(drive(eventloop, shutdown));
        (Self { client, timeout: PUBLISH_TIMEOUT }, driver)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Best-effort DISCONNECT; the driver flushes it during its grace period.
    pub async fn disconnect(&self) {
        match time::timeout(DISCONNECT_GRACE, self.client.disconnect()).await {
            Ok(Ok(())) => debug!("mqtt disconnect queued"),
            Ok(Err(e)) => warn!("mqtt disconnect failed: {}", e),
            Err(_) => warn!("mqtt disconnect timed out"),
        }
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let queued = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec());

        match time::timeout(self.timeout, queued).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Transport {
                topic: topic.to_string(),
                detail: e.to_string(),
            }),
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

async fn drive(mut eventloop: EventLoop, mut shutdown: ShutdownListener) {
    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("mqtt connected: {:?}", ack.code);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt connection error: {}", e);
                    tokio::select! {
                        () = shutdown.wait() => break,
                        () = time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }

    // Let a queued DISCONNECT reach the broker
    let _ = time::timeout(DISCONNECT_GRACE, async {
        while eventloop.poll().await.is_ok() {}
    })
    .await;
    debug!("mqtt driver stopped");
}
