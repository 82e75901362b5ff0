// MIT License - Copyright (c) 2026 Peter Wright
// Software device for tests and local development

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;
use tracing::{debug, trace};

use crate::constants::{KEY_EXCHANGE_PROTO, KEY_EXCHANGE_VERSION};
use crate::credentials::Credentials;
use crate::crypto::{HandshakeNonces, Role, SessionCipher};
use crate::error::Result;
use crate::protocol::{
    Envelope, KeyExchange, KeyExchangeHello, KeyExchangeReply, Request, Response, SealedFrame,
    WireReading, decode_frame, encode_frame,
};
use crate::session::{nonce_time, random_nonce};
use crate::transport::memory::{self, MemoryConnector, MemoryListener, MemoryTransport};
use crate::transport::Transport;

/// How the simulated device treats requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behaviour {
    /// Answer every request correctly
    #[default]
    Respond,
    /// Record requests but never answer
    Silent,
    /// Answer with a frame whose signature does not verify
    Corrupt,
    /// Send the previous reply again before each real one
    ReplayStale,
    /// Answer writes with the unchanged values
    IgnoreWrites,
}

struct SimState {
    key_id: u32,
    advertised_key_id: AtomicU32,
    secret: String,
    behaviour: Mutex<Behaviour>,
    /// Wire values by property name
    values: Mutex<BTreeMap<String, Value>>,
    requests: Mutex<Vec<(u64, Request)>>,
    connections: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An appliance that speaks the device side of the LAN protocol.
///
/// Clones share state, so a test can keep one handle while the device
/// serves connections from another.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<SimState>,
}

impl SimulatedDevice {
    /// A device that accepts `credentials` (same key id and secret).
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            state: Arc::new(SimState {
                key_id: credentials.key_material_id,
                advertised_key_id: AtomicU32::new(credentials.key_material_id),
                secret: credentials.shared_secret.clone(),
                behaviour: Mutex::new(Behaviour::Respond),
                values: Mutex::new(BTreeMap::new()),
                requests: Mutex::new(Vec::new()),
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Set a wire value, as if changed on the unit itself.
    pub fn set_value(&self, name: impl Into<String>, value: Value) {
        lock(&self.state.values).insert(name.into(), value);
    }

    pub fn with_value(self, name: impl Into<String>, value: Value) -> Self {
        self.set_value(name, value);
        self
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        lock(&self.state.values).get(name).cloned()
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *lock(&self.state.behaviour) = behaviour;
    }

    /// Advertise a different key id in future handshakes.
    pub fn advertise_key_id(&self, key_id: u32) {
        self.state.advertised_key_id.store(key_id, Ordering::SeqCst);
    }

    /// Every decrypted request so far with its sequence number.
    pub fn requests(&self) -> Vec<(u64, Request)> {
        lock(&self.state.requests).clone()
    }

    /// Number of requests with the given method (`get`, `set` or `ping`).
    pub fn request_count(&self, method: &str) -> usize {
        lock(&self.state.requests)
            .iter()
            .filter(|(_, request)| request.method() == method)
            .count()
    }

    /// Handshakes the device has started.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// A connector whose connections are served by this device.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connector(&self) -> MemoryConnector {
        let (connector, listener) = memory::listener();
        tokio::spawn(accept_loop(self.state.clone(), listener));
        connector
    }
}

async fn accept_loop(state: Arc<SimState>, mut listener: MemoryListener) {
    while let Some(transport) = listener.accept().await {
        tokio::spawn(serve(state.clone(), transport));
    }
}

async fn serve(state: Arc<SimState>, mut transport: MemoryTransport) {
    if let Err(e) = serve_connection(&state, &mut transport).await {
        debug!("Simulated device connection ended: {}", e);
    }
    transport.close().await;
}

async fn serve_connection(state: &SimState, transport: &mut MemoryTransport) -> Result<()> {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let exchange = KeyExchange {
        ver: KEY_EXCHANGE_VERSION,
        proto: KEY_EXCHANGE_PROTO,
        key_id: state.advertised_key_id.load(Ordering::SeqCst),
        random_1: random_nonce(),
        time_1: nonce_time(),
        sec: None,
    };
    let hello = KeyExchangeHello {
        key_exchange: exchange.clone(),
    };
    transport.send_frame(&encode_frame(&hello)?).await?;

    let reply: KeyExchangeReply = decode_frame(&transport.recv_frame().await?)?;
    let nonces = HandshakeNonces {
        random_1: exchange.random_1,
        time_1: exchange.time_1,
        random_2: reply.random_2,
        time_2: reply.time_2,
    };
    let key = if exchange.key_id == state.key_id {
        state.secret.as_bytes()
    } else {
        b"unknown".as_slice()
    };
    let cipher = SessionCipher::derive(key, &nonces, Role::Device);

    let mut previous: Option<Vec<u8>> = None;
    loop {
        let sealed: SealedFrame = decode_frame(&transport.recv_frame().await?)?;
        let envelope: Envelope<Request> = decode_frame(&cipher.open(&sealed)?)?;
        let seq_no = envelope.seq_no;
        trace!("Simulated device got {} (seq {})", envelope.data.method(), seq_no);
        lock(&state.requests).push((seq_no, envelope.data.clone()));

        let behaviour = *lock(&state.behaviour);
        if behaviour == Behaviour::Silent {
            continue;
        }

        let response = respond(state, &envelope.data, behaviour);
        let plaintext = encode_frame(&Envelope {
            seq_no,
            data: response,
        })?;
        let mut sealed = cipher.seal(&plaintext)?;
        if behaviour == Behaviour::Corrupt {
            sealed.sign = STANDARD.encode([0u8; 32]);
        }
        let frame = encode_frame(&sealed)?;

        if behaviour == Behaviour::ReplayStale
            && let Some(stale) = &previous
        {
            transport.send_frame(stale).await?;
        }
        transport.send_frame(&frame).await?;
        previous = Some(frame);
    }
}

fn respond(state: &SimState, request: &Request, behaviour: Behaviour) -> Response {
    let mut values = lock(&state.values);
    let properties = match request {
        Request::Get { properties } => readings(properties.iter(), &values),
        Request::Set { properties } => {
            if behaviour != Behaviour::IgnoreWrites {
                for write in properties {
                    values.insert(write.name.clone(), write.value.clone());
                }
            }
            readings(properties.iter().map(|w| &w.name), &values)
        }
        Request::Ping => Vec::new(),
    };
    Response { properties }
}

fn readings<'a>(
    names: impl Iterator<Item = &'a String>,
    values: &BTreeMap<String, Value>,
) -> Vec<WireReading> {
    names
        .filter_map(|name| {
            values.get(name).map(|value| WireReading {
                name: name.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::event::event_channel;
    use crate::session::DeviceSession;
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials::new("sim", "ac-1", 8888, "AAAABBBBCCCCDDDDEEEEFFFFGGGGHHHH")
    }

    #[tokio::test]
    async fn test_serves_get_and_set() {
        let device = SimulatedDevice::new(&credentials()).with_value("t_power", json!(0));
        let (events, _) = event_channel(16);
        let mut session = DeviceSession::new(
            device.connector(),
            credentials(),
            &DeviceConfig::default(),
            events,
        );
        session.connect().await.unwrap();

        let response = session
            .send(&Request::Get {
                properties: vec!["t_power".into(), "t_temp".into()],
            })
            .await
            .unwrap();
        assert_eq!(response.properties.len(), 1);
        assert_eq!(response.properties[0].value, json!(0));

        let response = session
            .send(&Request::Set {
                properties: vec![crate::protocol::WireWrite {
                    name: "t_power".into(),
                    base_type: crate::properties::WireType::Boolean,
                    value: json!(1),
                }],
            })
            .await
            .unwrap();
        assert_eq!(response.properties[0].value, json!(1));
        assert_eq!(device.value("t_power"), Some(json!(1)));
        assert_eq!(device.request_count("get"), 1);
        assert_eq!(device.request_count("set"), 1);
    }

    #[tokio::test]
    async fn test_ignore_writes_keeps_value() {
        let device = SimulatedDevice::new(&credentials()).with_value("t_temp", json!(70));
        let response = respond(
            &device.state,
            &Request::Set {
                properties: vec![crate::protocol::WireWrite {
                    name: "t_temp".into(),
                    base_type: crate::properties::WireType::Integer,
                    value: json!(75),
                }],
            },
            Behaviour::IgnoreWrites,
        );
        assert_eq!(response.properties[0].value, json!(70));
        assert_eq!(device.value("t_temp"), Some(json!(70)));
    }
}
