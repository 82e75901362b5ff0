// MIT License - Copyright (c) 2026 Peter Wright
// Session handshake, sequencing and failure handling against a simulated device

use std::time::Duration;

use aircon_lan_bridge::event::event_channel;
use aircon_lan_bridge::protocol::Request;
use aircon_lan_bridge::simulator::{Behaviour, SimulatedDevice};
use aircon_lan_bridge::transport::MemoryConnector;
use aircon_lan_bridge::{AirconError, Credentials, DeviceConfig, DeviceSession, SessionState};
use serde_json::json;
use tokio::sync::watch;

fn credentials() -> Credentials {
    Credentials::new("sim", "ac-1", 8888, "AAAABBBBCCCCDDDDEEEEFFFFGGGGHHHH")
}

fn config() -> DeviceConfig {
    DeviceConfig::builder()
        .device_id("living")
        .connect_timeout_ms(200)
        .request_timeout_ms(200)
        .reconnect_base_ms(10)
        .reconnect_max_ms(40)
        .build()
}

fn session(device: &SimulatedDevice) -> DeviceSession<MemoryConnector> {
    let (events, _) = event_channel(64);
    DeviceSession::new(device.connector(), credentials(), &config(), events)
}

fn get_power() -> Request {
    Request::Get {
        properties: vec!["t_power".into()],
    }
}

#[tokio::test]
async fn test_handshake_reaches_ready() {
    let device = SimulatedDevice::new(&credentials()).with_value("t_power", json!(1));
    let mut session = session(&device);
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.sequence(), Some(0));
    assert_eq!(device.connection_count(), 1);

    let response = session.send(&get_power()).await.unwrap();
    assert_eq!(response.properties[0].value, json!(1));
}

#[tokio::test]
async fn test_send_before_connect_is_not_ready() {
    let device = SimulatedDevice::new(&credentials());
    let mut session = session(&device);
    let err = session.send(&get_power()).await.unwrap_err();
    assert!(matches!(err, AirconError::NotReady { .. }));
}

#[tokio::test]
async fn test_key_mismatch_stays_disconnected() {
    let device = SimulatedDevice::new(&credentials());
    device.advertise_key_id(4242);
    let mut session = session(&device);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(
        err,
        AirconError::KeyMismatch {
            configured: 8888,
            advertised: 4242
        }
    ));
    assert!(!err.is_retryable());
    // No reconnect scheduled
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_ready());
}

#[tokio::test]
async fn test_sequence_increments_and_resets_on_reconnect() {
    let device = SimulatedDevice::new(&credentials()).with_value("t_power", json!(0));
    let mut session = session(&device);

    session.connect().await.unwrap();
    session.send(&get_power()).await.unwrap();
    session.send(&get_power()).await.unwrap();
    session.keep_alive().await.unwrap();
    assert_eq!(session.sequence(), Some(3));

    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.sequence(), None);

    session.connect().await.unwrap();
    session.send(&get_power()).await.unwrap();

    let seqs: Vec<u64> = device.requests().iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 0]);
    assert_eq!(device.request_count("ping"), 1);
    assert_eq!(device.connection_count(), 2);
}

#[tokio::test]
async fn test_stale_reply_is_discarded() {
    let device = SimulatedDevice::new(&credentials()).with_value("t_power", json!(1));
    device.set_behaviour(Behaviour::ReplayStale);
    let mut session = session(&device);
    session.connect().await.unwrap();

    session.send(&get_power()).await.unwrap();
    // The device replays the seq 0 reply before answering seq 1
    device.set_value("t_power", json!(0));
    let response = session.send(&get_power()).await.unwrap();
    assert_eq!(response.properties[0].value, json!(0));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.sequence(), Some(2));
}

#[tokio::test]
async fn test_silent_device_times_out_and_schedules_reconnect() {
    let device = SimulatedDevice::new(&credentials());
    device.set_behaviour(Behaviour::Silent);
    let mut session = session(&device);
    session.connect().await.unwrap();

    let err = session.send(&get_power()).await.unwrap_err();
    assert!(matches!(err, AirconError::Timeout(_)));
    assert!(err.is_retryable());
    assert_eq!(
        session.state(),
        SessionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(10)
        }
    );

    device.set_behaviour(Behaviour::Respond);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    session.reconnect(&mut stop_rx).await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.sequence(), Some(0));
}

#[tokio::test]
async fn test_corrupt_reply_is_crypto_error() {
    let device = SimulatedDevice::new(&credentials());
    device.set_behaviour(Behaviour::Corrupt);
    let mut session = session(&device);
    session.connect().await.unwrap();

    let err = session.send(&get_power()).await.unwrap_err();
    assert!(matches!(err, AirconError::Crypto { .. }));
    assert!(matches!(session.state(), SessionState::Reconnecting { .. }));
}

#[tokio::test]
async fn test_reconnect_cancelled_by_shutdown() {
    let device = SimulatedDevice::new(&credentials());
    device.set_behaviour(Behaviour::Silent);
    let (events, _) = event_channel(16);
    let config = DeviceConfig::builder()
        .request_timeout_ms(50)
        .reconnect_base_ms(60_000)
        .build();
    let mut session = DeviceSession::new(device.connector(), credentials(), &config, events);
    session.connect().await.unwrap();
    let _ = session.send(&get_power()).await.unwrap_err();

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let _ = stop_tx.send(true);
    let err = session.reconnect(&mut stop_rx).await.unwrap_err();
    assert!(matches!(err, AirconError::Cancelled));
}
