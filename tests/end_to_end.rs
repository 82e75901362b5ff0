// MIT License - Copyright (c) 2026 Peter Wright
// Device commands and polling end to end against a simulated device

use std::time::Duration;

use aircon_lan_bridge::protocol::Request;
use aircon_lan_bridge::simulator::{Behaviour, SimulatedDevice};
use aircon_lan_bridge::transport::memory;
use aircon_lan_bridge::{
    AirconError, CommandOutcome, Credentials, Device, DeviceConfig, DeviceEvent, PropertyValue,
    SessionState,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

fn credentials() -> Credentials {
    Credentials::new("sim", "ac-1", 8888, "AAAABBBBCCCCDDDDEEEEFFFFGGGGHHHH")
}

fn fast_config() -> DeviceConfig {
    DeviceConfig::builder()
        .device_id("living")
        .request_timeout_ms(200)
        .keep_alive_interval_ms(1000)
        .reconnect_base_ms(10)
        .reconnect_max_ms(40)
        .command_timeout_ms(100)
        .build()
}

fn simulated_ac() -> SimulatedDevice {
    SimulatedDevice::new(&credentials())
        .with_value("t_power", json!(0))
        .with_value("t_temp", json!(70))
        .with_value("f_temp_in", json!(72))
        .with_value("t_work_mode", json!(2))
}

/// Poll `device`'s snapshot until `property` is present.
async fn wait_for_property(device: &Device, property: &str) -> PropertyValue {
    timeout(Duration::from_secs(2), async {
        loop {
            if let Some(value) = device.snapshot().await.get(property) {
                return value.clone();
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_poll_populates_snapshot() {
    let sim = simulated_ac();
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();

    assert_eq!(wait_for_property(&device, "t_power").await, "OFF");
    let snapshot = device.snapshot().await;
    assert_eq!(snapshot["t_temp"], PropertyValue::Integer(70));
    assert_eq!(snapshot["t_work_mode"], "COOL");
    assert_eq!(device.session_state(), SessionState::Ready);

    device.shutdown().await;
}

#[tokio::test]
async fn test_power_on_is_confirmed() {
    let sim = simulated_ac();
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();
    let mut events = device.subscribe();

    let ticket = device.issue_command("t_power", "ON").await.unwrap();
    let outcome = timeout(Duration::from_secs(2), ticket.confirmed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Succeeded);

    assert_eq!(device.snapshot().await["t_power"], "ON");
    assert_eq!(sim.value("t_power"), Some(json!(1)));
    assert_eq!(device.store().pending_count().await, 0);

    let mut confirmed = false;
    while let Ok(event) = events.try_recv() {
        if let DeviceEvent::CommandSucceeded { name, .. } = event {
            assert_eq!(name, "t_power");
            confirmed = true;
        }
    }
    assert!(confirmed);

    device.shutdown().await;
}

#[tokio::test]
async fn test_read_only_command_is_rejected() {
    let sim = simulated_ac();
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();
    let before = wait_for_property(&device, "f_temp_in").await;

    let err = device.issue_command("f_temp_in", "20").await.unwrap_err();
    assert!(matches!(err, AirconError::ReadOnly { .. }));
    assert!(err.is_validation());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(device.snapshot().await["f_temp_in"], before);
    assert_eq!(sim.request_count("set"), 0);
    assert_eq!(device.store().pending_count().await, 0);

    device.shutdown().await;
}

#[tokio::test]
async fn test_out_of_range_command_is_rejected() {
    let sim = simulated_ac();
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();

    let err = device.issue_command("t_temp", "200").await.unwrap_err();
    assert!(matches!(err, AirconError::Validation { .. }));
    let err = device.issue_command("t_nonsense", "1").await.unwrap_err();
    assert!(matches!(err, AirconError::UnknownProperty { .. }));
    assert_eq!(device.store().pending_count().await, 0);

    device.shutdown().await;
}

#[tokio::test]
async fn test_ignored_write_fails_after_retries() {
    let sim = simulated_ac();
    sim.set_behaviour(Behaviour::IgnoreWrites);
    let config = DeviceConfig::builder()
        .device_id("living")
        .request_timeout_ms(200)
        .command_timeout_ms(50)
        .max_attempts(2)
        .build();
    let device = Device::spawn(config, credentials(), sim.connector()).unwrap();

    let ticket = device.issue_command("t_power", "ON").await.unwrap();
    let err = timeout(Duration::from_secs(2), ticket.confirmed())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        AirconError::CommandTimeout { attempts: 2, .. }
    ));
    // First dispatch plus two retries
    assert_eq!(sim.request_count("set"), 3);
    assert_eq!(device.snapshot().await["t_power"], "OFF");

    device.shutdown().await;
}

#[tokio::test]
async fn test_newer_command_supersedes_older() {
    let sim = simulated_ac();
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();

    let first = device.issue_command("t_temp", "74").await.unwrap();
    let second = device.issue_command("t_temp", "76").await.unwrap();
    assert_eq!(first.wait().await.unwrap(), CommandOutcome::Superseded);
    let outcome = timeout(Duration::from_secs(2), second.confirmed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Succeeded);
    assert_eq!(sim.value("t_temp"), Some(json!(76)));

    device.shutdown().await;
}

#[tokio::test]
async fn test_key_mismatch_stops_engine() {
    let sim = simulated_ac();
    sim.advertise_key_id(1);
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();
    let mut events = device.subscribe();

    let reason = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(DeviceEvent::SessionFatal { reason, .. }) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();
    assert!(reason.contains("8888"));

    timeout(Duration::from_secs(2), async {
        while !device.is_stopped() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(device.session_state(), SessionState::Disconnected);
    assert_eq!(sim.connection_count(), 1);

    device.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drops_pending_commands() {
    let sim = simulated_ac();
    sim.set_behaviour(Behaviour::Silent);
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();

    let ticket = device.issue_command("t_power", "ON").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    device.shutdown().await;

    let err = ticket.wait().await.unwrap_err();
    assert!(matches!(err, AirconError::ChannelClosed));
}

#[tokio::test]
async fn test_writes_issued_before_ready_share_one_request() {
    let sim = simulated_ac();
    let device = Device::spawn(fast_config(), credentials(), sim.connector()).unwrap();

    let tickets = vec![
        device.issue_command("t_temp", "74").await.unwrap(),
        device.issue_command("t_power", "ON").await.unwrap(),
        device.issue_command("t_work_mode", "HEAT").await.unwrap(),
    ];
    for ticket in tickets {
        let outcome = timeout(Duration::from_secs(2), ticket.confirmed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Succeeded);
    }

    assert_eq!(sim.request_count("set"), 1);
    let writes = sim
        .requests()
        .into_iter()
        .find_map(|(_, request)| match request {
            Request::Set { properties } => Some(properties),
            _ => None,
        })
        .unwrap();
    let mut names: Vec<_> = writes.iter().map(|write| write.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["t_power", "t_temp", "t_work_mode"]);

    device.shutdown().await;
}

#[tokio::test]
async fn test_idle_engine_sends_keep_alive() {
    let sim = simulated_ac();
    let config = DeviceConfig::builder()
        .device_id("living")
        .keep_alive_interval_ms(50)
        .poll_interval_ms(10_000)
        .build();
    let device = Device::spawn(config, credentials(), sim.connector()).unwrap();

    wait_for_property(&device, "t_power").await;
    sleep(Duration::from_millis(300)).await;
    assert!(sim.request_count("ping") >= 1);
    assert_eq!(sim.request_count("get"), 1);
    assert_eq!(device.session_state(), SessionState::Ready);

    device.shutdown().await;
}

#[tokio::test]
async fn test_commands_expire_while_device_is_unreachable() {
    let (connector, listener) = memory::listener();
    drop(listener);
    let config = DeviceConfig::builder()
        .device_id("living")
        .command_timeout_ms(20)
        .max_attempts(1)
        .reconnect_base_ms(1500)
        .reconnect_max_ms(1500)
        .build();
    let device = Device::spawn(config, credentials(), connector).unwrap();

    let ticket = device.issue_command("t_power", "ON").await.unwrap();
    // Well inside the first reconnect backoff
    let err = timeout(Duration::from_millis(500), ticket.confirmed())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        AirconError::CommandTimeout { attempts: 1, .. }
    ));
    assert_eq!(device.store().pending_count().await, 0);
    assert_ne!(device.session_state(), SessionState::Ready);

    device.shutdown().await;
}
