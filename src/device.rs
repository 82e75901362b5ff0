// MIT License - Copyright (c) 2026 Peter Wright
// Device handle: owns one session/store/engine triple

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{DeviceConfig, DeviceType};
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::credentials::Credentials;
use crate::engine::SyncEngine;
use crate::error::{AirconError, Result};
use crate::event::{EventReceiver, EventSender, event_channel};
use crate::properties::{PropertyRegistry, PropertyValue};
use crate::session::{DeviceSession, SessionState};
use crate::store::{CommandTicket, PropertyStore};
use crate::transport::Connector;

/// The public API for one appliance.
///
/// # Example
///
/// ```no_run
/// use aircon_lan_bridge::{Credentials, Device, DeviceConfig, DeviceType, TcpConnector};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let credentials = Credentials::load("living-room.json")?;
///     let config = DeviceConfig::builder()
///         .device_id("living-room")
///         .device_type(DeviceType::Ac)
///         .build();
///
///     let device = Device::spawn(config, credentials, TcpConnector)?;
///
///     let mut events = device.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     // Returns once queued; the ticket resolves when the unit reports it
///     let ticket = device.issue_command("t_power", "on").await?;
///     ticket.confirmed().await?;
///
///     println!("{:?}", device.snapshot().await);
///     device.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Device {
    config: DeviceConfig,
    store: Arc<PropertyStore>,
    events: EventSender,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Device {
    /// Start the sync engine for one device on the current runtime.
    pub fn spawn<C: Connector>(
        config: DeviceConfig,
        credentials: Credentials,
        connector: C,
    ) -> Result<Self> {
        credentials.validate()?;
        let (events, _) = event_channel(EVENT_CHANNEL_CAPACITY);
        let store = Arc::new(PropertyStore::new(&config, events.clone()));
        let session = DeviceSession::new(connector, credentials, &config, events.clone());
        let state_rx = session.watch_state();
        let engine = SyncEngine::new(session, store.clone(), &config, events.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(shutdown_rx));
        info!(
            "[{}] Started {} device",
            config.device_id, config.device_type
        );

        Ok(Self {
            config,
            store,
            events,
            state_rx,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.device_id
    }

    pub fn device_type(&self) -> DeviceType {
        self.config.device_type
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn registry(&self) -> &'static PropertyRegistry {
        self.store.registry()
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }

    pub async fn snapshot(&self) -> BTreeMap<String, PropertyValue> {
        self.store.snapshot().await
    }

    /// Parse `raw` for `name` and queue the write.
    pub async fn issue_command(&self, name: &str, raw: &str) -> Result<CommandTicket> {
        self.store.issue_raw(name, raw).await
    }

    pub async fn issue_value(&self, name: &str, value: PropertyValue) -> Result<CommandTicket> {
        self.store.issue_command(name, value).await
    }

    /// Subscribe to this device's events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Whether the engine has stopped (shutdown or fatal key mismatch).
    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Stop the engine, waiting a bounded time for it to close the session.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        let Some(mut task) = self.task.take() else {
            return;
        };
        let wait = self.config.shutdown_grace() + Duration::from_secs(1);
        match timeout(wait, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("[{}] Engine had stopped: {}", self.id(), e),
            Ok(Err(e)) => warn!("[{}] Engine task failed: {}", self.id(), e),
            Err(_) => {
                warn!("[{}] Engine did not stop in time, aborting", self.id());
                task.abort();
            }
        }
        info!("[{}] Device stopped", self.id());
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Every configured device, by id.
#[derive(Default)]
pub struct DeviceFleet {
    devices: BTreeMap<String, Device>,
}

impl DeviceFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: Device) -> Result<()> {
        if self.devices.contains_key(device.id()) {
            return Err(AirconError::Config {
                details: format!("duplicate device id: {}", device.id()),
            });
        }
        self.devices.insert(device.id().to_string(), device);
        Ok(())
    }

    /// Look up a device. With no id, the only configured device is returned.
    pub fn get(&self, id: Option<&str>) -> Result<&Device> {
        match id {
            Some(id) => self.devices.get(id).ok_or_else(|| AirconError::UnknownDevice {
                id: id.to_string(),
            }),
            None if self.devices.len() == 1 => self
                .devices
                .values()
                .next()
                .ok_or(AirconError::Config {
                    details: "no devices configured".into(),
                }),
            None if self.devices.is_empty() => Err(AirconError::Config {
                details: "no devices configured".into(),
            }),
            None => Err(AirconError::Config {
                details: "several devices configured, select one with device=<id>".into(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Stop every device concurrently.
    pub async fn shutdown(self) {
        let mut stopping = JoinSet::new();
        for device in self.devices.into_values() {
            stopping.spawn(device.shutdown());
        }
        while stopping.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedDevice;

    fn credentials() -> Credentials {
        Credentials::new("sim", "ac-1", 8888, "AAAABBBBCCCCDDDDEEEEFFFFGGGGHHHH")
    }

    fn spawn(id: &str) -> Device {
        let sim = SimulatedDevice::new(&credentials());
        let config = DeviceConfig::builder().device_id(id).build();
        Device::spawn(config, credentials(), sim.connector()).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_rejects_incomplete_credentials() {
        let sim = SimulatedDevice::new(&credentials());
        let bad = Credentials::new("", "ac-1", 8888, "secret");
        assert!(matches!(
            Device::spawn(DeviceConfig::default(), bad, sim.connector()),
            Err(AirconError::Credentials { .. })
        ));
    }

    #[tokio::test]
    async fn test_fleet_lookup() {
        let mut fleet = DeviceFleet::new();
        fleet.insert(spawn("bedroom")).unwrap();
        assert_eq!(fleet.get(None).unwrap().id(), "bedroom");

        fleet.insert(spawn("office")).unwrap();
        assert!(matches!(fleet.get(None), Err(AirconError::Config { .. })));
        assert_eq!(fleet.get(Some("office")).unwrap().id(), "office");
        assert!(matches!(
            fleet.get(Some("attic")),
            Err(AirconError::UnknownDevice { .. })
        ));
        assert!(matches!(
            fleet.insert(spawn("office")),
            Err(AirconError::Config { .. })
        ));
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_forces_disconnected() {
        let device = spawn("den");
        let mut state = device.watch_state();
        state
            .wait_for(|s| *s == SessionState::Ready)
            .await
            .unwrap();
        let mut watch = device.watch_state();
        device.shutdown().await;
        assert_eq!(*watch.borrow_and_update(), SessionState::Disconnected);
    }
}
