// MIT License - Copyright (c) 2026 Peter Wright
// Local gateway for encrypted LAN climate appliances
//
//! # aircon-lan-bridge
//!
//! Direct control of Hisense-style air conditioners, humidifiers and
//! Fujitsu FGL units over their encrypted LAN protocol, without the vendor
//! cloud.
//!
//! Each configured appliance runs its own [`DeviceSession`] (transport,
//! key exchange, sequencing), [`PropertyStore`] (observed values, pending
//! commands) and [`SyncEngine`] (dispatch, poll, keep-alive, reconnect).
//! A [`Device`] owns one such triple; the `bridge` module exposes a fleet of
//! them over HTTP and MQTT.
//!
//! ## Quick Start
//!
//! ```no_run
//! use aircon_lan_bridge::{Credentials, Device, DeviceConfig, DeviceType, TcpConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::load("aircon.json")?;
//!     let config = DeviceConfig::builder()
//!         .device_id("aircon")
//!         .device_type(DeviceType::Ac)
//!         .build();
//!
//!     let device = Device::spawn(config, credentials, TcpConnector)?;
//!
//!     let mut events = device.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     device.issue_command("t_work_mode", "cool").await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     device.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod properties;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use config::{DeviceConfig, DeviceConfigBuilder, DeviceType};
pub use credentials::Credentials;
pub use crypto::CryptoCodec;
pub use device::{Device, DeviceFleet};
pub use engine::SyncEngine;
pub use error::{AirconError, Result};
pub use event::{DeviceEvent, EventReceiver};
pub use properties::{Property, PropertyKind, PropertyRegistry, PropertyValue, ValueType};
pub use session::{DeviceSession, SessionState};
pub use store::{CommandOutcome, CommandTicket, PropertyStore};
pub use transport::{Connector, TcpConnector, Transport};
