// MIT License - Copyright (c) 2026 Peter Wright
// MQTT command/status bridge

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::device::{Device, DeviceFleet};
use crate::event::DeviceEvent;
use crate::properties::PropertyValue;
use crate::session::shutdown_requested;

/// `t_work_mode` value whose MQTT spelling differs from the device's.
const FAN_MODE: &str = "FAN";
const FAN_MODE_MQTT: &str = "fan_only";
const WORK_MODE: &str = "t_work_mode";

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// Topic layout for one device: `<root>/<property>/command` and
/// `<root>/<property>/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTopics {
    root: String,
}

impl MqttTopics {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn command(&self, property: &str) -> String {
        format!("{}/{}/command", self.root, property)
    }

    pub fn status(&self, property: &str) -> String {
        format!("{}/{}/status", self.root, property)
    }

    /// Wildcard filter matching every command topic under this root.
    pub fn command_filter(&self) -> String {
        format!("{}/+/command", self.root)
    }

    /// Property named by a command topic under this root.
    pub fn parse_command<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(&self.root)?.strip_prefix('/')?;
        let property = rest.strip_suffix("/command")?;
        (!property.is_empty() && !property.contains('/')).then_some(property)
    }
}

/// Render a value for publishing. Enum names go out lowercase.
pub fn encode_payload(property: &str, value: &PropertyValue) -> String {
    match value {
        PropertyValue::Enum(choice) if property == WORK_MODE && choice == FAN_MODE => {
            FAN_MODE_MQTT.to_string()
        }
        PropertyValue::Enum(choice) => choice.to_ascii_lowercase(),
        other => other.to_string(),
    }
}

/// Turn an inbound payload into the raw string the registry parses.
pub fn decode_payload(property: &str, payload: &str) -> String {
    let payload = payload.trim();
    if property == WORK_MODE && payload.eq_ignore_ascii_case(FAN_MODE_MQTT) {
        FAN_MODE.to_string()
    } else {
        payload.to_ascii_uppercase()
    }
}

/// Mirrors every device in a fleet onto MQTT.
pub struct MqttBridge {
    client: AsyncClient,
    fleet: Arc<DeviceFleet>,
    /// Topic layout per device id
    topics: BTreeMap<String, MqttTopics>,
}

impl MqttBridge {
    pub fn new(
        settings: &MqttSettings,
        fleet: Arc<DeviceFleet>,
        topics: BTreeMap<String, MqttTopics>,
    ) -> (Self, EventLoop) {
        let (client, eventloop) = AsyncClient::new(settings.options(), 256);
        (
            Self {
                client,
                fleet,
                topics,
            },
            eventloop,
        )
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(self, mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
        let bridge = Arc::new(self);
        let mut forwarders: JoinSet<()> = JoinSet::new();
        for device in bridge.fleet.iter() {
            forwarders.spawn(bridge.clone().forward_events(device.id().to_string()));
        }

        loop {
            let event = tokio::select! {
                event = eventloop.poll() => event,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT: connected");
                    bridge.on_connected(&mut forwarders);
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    let payload = String::from_utf8_lossy(&msg.payload);
                    bridge.handle_publish(&msg.topic, &payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
            }
        }

        forwarders.abort_all();
        if let Err(e) = bridge.client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }
        info!("MQTT bridge stopped");
    }

    fn topics_for(&self, device_id: &str) -> Option<&MqttTopics> {
        self.topics.get(device_id)
    }

    /// Resubscribe and republish after a (re)connect.
    ///
    /// Runs inside the event loop, which is the only thing draining the
    /// client's request channel, so nothing here may wait on that channel.
    fn on_connected(self: &Arc<Self>, tasks: &mut JoinSet<()>) {
        // rumqttc does not resubscribe after a broker restart
        self.subscribe_all();
        while tasks.try_join_next().is_some() {}
        let bridge = Arc::clone(self);
        tasks.spawn(async move { bridge.publish_all().await });
    }

    /// One wildcard subscription per device.
    fn subscribe_all(&self) -> usize {
        let mut subscribed = 0;
        for device in self.fleet.iter() {
            let Some(topics) = self.topics_for(device.id()) else {
                continue;
            };
            let filter = topics.command_filter();
            match self.client.try_subscribe(&filter, QoS::AtLeastOnce) {
                Ok(()) => {
                    subscribed += 1;
                    info!("MQTT: [{}] subscribed to {}", device.id(), filter);
                }
                Err(e) => error!("Failed to subscribe to {filter}: {e}"),
            }
        }
        subscribed
    }

    /// Publish every known value of every device.
    async fn publish_all(&self) {
        for device in self.fleet.iter() {
            for (name, value) in device.snapshot().await {
                self.publish_status(device.id(), &name, &value).await;
            }
        }
    }

    async fn publish_status(&self, device_id: &str, property: &str, value: &PropertyValue) {
        let Some(topics) = self.topics_for(device_id) else {
            return;
        };
        let topic = topics.status(property);
        let payload = encode_payload(property, value);
        if let Err(e) = self
            .client
            .publish(&topic, QoS::AtLeastOnce, true, payload)
            .await
        {
            error!("Failed to publish to {topic}: {e}");
        }
    }

    fn route<'a>(&'a self, topic: &'a str) -> Option<(&'a Device, &'a str)> {
        self.fleet.iter().find_map(|device| {
            let property = self.topics_for(device.id())?.parse_command(topic)?;
            Some((device, property))
        })
    }

    async fn handle_publish(&self, topic: &str, payload: &str) {
        let Some((device, property)) = self.route(topic) else {
            debug!("MQTT: ignoring message on {topic}");
            return;
        };
        let raw = decode_payload(property, payload);
        info!("MQTT: [{}] command {}={}", device.id(), property, raw);
        match device.issue_command(property, &raw).await {
            Ok(ticket) => super::report_outcome(device.id(), "MQTT", ticket),
            Err(e) => warn!(
                "[{}] Rejected MQTT command {}={}: {}",
                device.id(),
                property,
                payload,
                e
            ),
        }
    }

    /// Publish each changed value of one device.
    async fn forward_events(self: Arc<Self>, device_id: String) {
        let Ok(device) = self.fleet.get(Some(&device_id)) else {
            return;
        };
        let mut rx = device.subscribe();
        loop {
            match rx.recv().await {
                Ok(DeviceEvent::PropertyChanged { name, value, .. }) => {
                    self.publish_status(&device_id, &name, &value).await;
                }
                Ok(DeviceEvent::SessionFatal { reason, .. }) => {
                    error!("[{}] Device stopped: {}", device_id, reason);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!("[{}] Event receiver lagged, missed {n} events", device_id);
                    self.publish_all().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
