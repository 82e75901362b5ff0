// MIT License - Copyright (c) 2026 Peter Wright
// HTTP + MQTT bridge daemon

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

use aircon_lan_bridge::bridge::http;
use aircon_lan_bridge::bridge::mqtt::{MqttBridge, MqttSettings, MqttTopics};
use aircon_lan_bridge::{Credentials, Device, DeviceConfig, DeviceFleet, DeviceType, TcpConnector};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "aircon2mqtt")]
#[command(about = "Local HTTP/MQTT bridge for encrypted LAN air conditioners")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    http: Option<HttpToml>,
    #[serde(default)]
    mqtt: Option<MqttToml>,
    devices: Vec<DeviceToml>,
}

#[derive(Debug, Deserialize)]
struct HttpToml {
    #[serde(default = "default_http_bind")]
    bind: String,
    port: u16,
}

fn default_http_bind() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_topic")]
    topic: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_mqtt_keep_alive")]
    keep_alive_secs: u64,
}

fn default_client_id() -> String {
    "aircon2mqtt".to_string()
}
fn default_topic() -> String {
    "hisense_ac".to_string()
}
fn default_mqtt_keep_alive() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    id: String,
    #[serde(rename = "type", default = "default_device_type")]
    device_type: String,
    /// Credential file written by the discovery tool
    credentials: PathBuf,
    /// Overrides the address stored in the credential file
    #[serde(default)]
    address: Option<String>,
    /// MQTT topic root for this device
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    keep_alive_interval_ms: Option<u64>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    command_timeout_ms: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

fn default_device_type() -> String {
    "ac".to_string()
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    let config: Config = toml::from_str(&text).context("Failed to parse config file")?;
    if config.devices.is_empty() {
        anyhow::bail!("No [[devices]] configured");
    }
    if let Some(mqtt) = &config.mqtt {
        parse_mqtt_url(&mqtt.url)?;
    }
    Ok(config)
}

fn build_device_config(toml: &DeviceToml) -> Result<DeviceConfig> {
    let device_type: DeviceType = toml.device_type.parse()?;
    let mut builder = DeviceConfig::builder()
        .device_id(&toml.id)
        .device_type(device_type);
    if let Some(ms) = toml.poll_interval_ms {
        builder = builder.poll_interval_ms(ms);
    }
    if let Some(ms) = toml.keep_alive_interval_ms {
        builder = builder.keep_alive_interval_ms(ms);
    }
    if let Some(ms) = toml.request_timeout_ms {
        builder = builder.request_timeout_ms(ms);
    }
    if let Some(ms) = toml.command_timeout_ms {
        builder = builder.command_timeout_ms(ms);
    }
    if let Some(attempts) = toml.max_attempts {
        builder = builder.max_attempts(attempts);
    }
    Ok(builder.build())
}

fn build_fleet(config: &Config) -> Result<DeviceFleet> {
    let mut fleet = DeviceFleet::new();
    for toml in &config.devices {
        let device_config = build_device_config(toml)
            .with_context(|| format!("Invalid config for device {}", toml.id))?;
        let mut credentials = Credentials::load(&toml.credentials).with_context(|| {
            format!("Failed to load credentials {}", toml.credentials.display())
        })?;
        if let Some(address) = &toml.address {
            credentials.device_address = address.clone();
        }
        info!(
            "[{}] {} at {}",
            toml.id,
            device_config.device_type,
            credentials.socket_address()
        );
        let device = Device::spawn(device_config, credentials, TcpConnector)
            .with_context(|| format!("Failed to start device {}", toml.id))?;
        fleet.insert(device)?;
    }
    Ok(fleet)
}

/// Topic root per device. With several devices, ids keep them apart.
fn device_topics(config: &Config, root: &str) -> BTreeMap<String, MqttTopics> {
    let shared_root = config.devices.len() == 1;
    config
        .devices
        .iter()
        .map(|device| {
            let topic = match &device.topic {
                Some(topic) => topic.clone(),
                None if shared_root => root.to_string(),
                None => format!("{}/{}", root.trim_end_matches('/'), device.id),
            };
            (device.id.clone(), MqttTopics::new(topic))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG controls verbosity (e.g. RUST_LOG=aircon_lan_bridge=debug).
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let mut config = load_config(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let fleet = Arc::new(build_fleet(&config)?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // HTTP surface
        let http_handle = match &config.http {
            Some(http) => {
                let address = format!("{}:{}", http.bind, http.port);
                let listener = tokio::net::TcpListener::bind(&address)
                    .await
                    .with_context(|| format!("Failed to bind HTTP listener on {address}"))?;
                Some(tokio::spawn(http::serve(
                    listener,
                    Arc::clone(&fleet),
                    shutdown_rx.clone(),
                )))
            }
            None => None,
        };

        // MQTT bridge
        let mqtt_handle = match &config.mqtt {
            Some(mqtt) => {
                let (host, port) = parse_mqtt_url(&mqtt.url)?;
                let settings = MqttSettings {
                    host,
                    port,
                    client_id: mqtt.client_id.clone(),
                    username: mqtt.username.clone(),
                    password: mqtt.password.clone(),
                    keep_alive: Duration::from_secs(mqtt.keep_alive_secs),
                };
                let topics = device_topics(&config, &mqtt.topic);
                info!("MQTT: broker {}:{}", settings.host, settings.port);
                let (bridge, eventloop) = MqttBridge::new(&settings, Arc::clone(&fleet), topics);
                Some(tokio::spawn(bridge.run(eventloop, shutdown_rx.clone())))
            }
            None => None,
        };

        if http_handle.is_none() && mqtt_handle.is_none() {
            warn!("Neither [http] nor [mqtt] configured; devices are polled but not exposed");
        }

        // Wait for a signal
        info!("Bridge running. Send SIGHUP to reload, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting devices...");
                true
            }
        };

        let _ = shutdown_tx.send(true);
        if let Some(handle) = http_handle {
            match timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(Err(e))) => warn!("HTTP server error: {e}"),
                Err(_) => warn!("HTTP server did not stop in time"),
                _ => {}
            }
        }
        if let Some(handle) = mqtt_handle
            && timeout(Duration::from_secs(5), handle).await.is_err()
        {
            warn!("MQTT bridge did not stop in time");
        }

        match Arc::try_unwrap(fleet) {
            Ok(fleet) => fleet.shutdown().await,
            Err(_arc) => {
                warn!("Could not unwrap device fleet for clean shutdown (tasks still hold references)");
            }
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => {
                config = new_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }

        info!("Restarting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
