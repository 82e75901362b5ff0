// MIT License - Copyright (c) 2026 Peter Wright
// Per-device event stream

use crate::properties::PropertyValue;
use crate::session::SessionState;

/// All events that can be emitted by one device.
///
/// Users subscribe via `device.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<DeviceEvent>`. Each device has its own
/// channel, so a lagging subscriber on one device never affects another.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Session moved to a new state
    SessionStateChanged {
        device_id: String,
        state: SessionState,
    },
    /// A merge changed a stored value
    PropertyChanged {
        device_id: String,
        name: String,
        value: PropertyValue,
    },
    /// A pending command was confirmed by an observation
    CommandSucceeded {
        device_id: String,
        name: String,
        value: PropertyValue,
    },
    /// A pending command ran out of retries
    CommandFailed {
        device_id: String,
        name: String,
        value: PropertyValue,
        attempts: u32,
    },
    /// The session cannot continue without new credentials
    SessionFatal { device_id: String, reason: String },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::SessionStateChanged { device_id, .. }
            | DeviceEvent::PropertyChanged { device_id, .. }
            | DeviceEvent::CommandSucceeded { device_id, .. }
            | DeviceEvent::CommandFailed { device_id, .. }
            | DeviceEvent::SessionFatal { device_id, .. } => device_id,
        }
    }
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<DeviceEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<DeviceEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
