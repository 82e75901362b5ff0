// MIT License - Copyright (c) 2026 Peter Wright
// Encrypted session with one device

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::constants::{NONCE_LEN, NONCE_TIME_MODULUS};
use crate::credentials::Credentials;
use crate::crypto::{HandshakeNonces, Role, SessionCipher};
use crate::error::{AirconError, Result};
use crate::event::{DeviceEvent, EventSender};
use crate::protocol::{
    Envelope, KeyExchangeHello, KeyExchangeReply, Request, Response, SealedFrame, decode_frame,
    encode_frame,
};
use crate::transport::{Connector, Transport};

/// Connection state of a [`DeviceSession`].
///
/// `Disconnected → Connecting → Handshaking → Ready → Reconnecting → ...`.
/// There is no terminal state; the owner forces `Disconnected` on shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    /// Waiting `delay` before reconnect attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Reconnecting { .. } => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {}, in {:?})", attempt, delay)
            }
            other => f.write_str(other.as_str()),
        }
    }
}

/// Exponential reconnect delay: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(31);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Per-handshake state. Dropped on every disconnect.
struct SessionContext {
    cipher: SessionCipher,
    next_seq: u64,
}

/// One device's connection: transport, handshake, key schedule and sequencing.
///
/// `send` takes `&mut self`, so at most one request is ever outstanding.
pub struct DeviceSession<C: Connector> {
    connector: C,
    credentials: Credentials,
    device_id: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    keep_alive_interval: Duration,
    state_tx: watch::Sender<SessionState>,
    events: EventSender,
    transport: Option<C::Transport>,
    context: Option<SessionContext>,
    backoff: Backoff,
    last_traffic: Instant,
}

impl<C: Connector> DeviceSession<C> {
    pub fn new(
        connector: C,
        credentials: Credentials,
        config: &DeviceConfig,
        events: EventSender,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            credentials,
            device_id: config.device_id.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            keep_alive_interval: config.keep_alive_interval(),
            state_tx,
            events,
            transport: None,
            context: None,
            backoff: Backoff::new(config.reconnect_base(), config.reconnect_max()),
            last_traffic: Instant::now(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Watch state transitions without going through the event channel.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.context.is_some()
    }

    /// Sequence number the next request will carry, if a session is up.
    pub fn sequence(&self) -> Option<u64> {
        self.context.as_ref().map(|c| c.next_seq)
    }

    /// Open the transport and run the key exchange.
    ///
    /// On success the session is `Ready` with a fresh cipher and a sequence
    /// counter of zero. A key id mismatch leaves the session `Disconnected`
    /// without scheduling a reconnect; any other failure schedules one.
    pub async fn connect(&mut self) -> Result<()> {
        self.drop_transport().await;
        self.set_state(SessionState::Connecting);

        let address = self.credentials.socket_address();
        debug!("[{}] Connecting to {}", self.device_id, address);
        let mut transport =
            match timeout(self.connect_timeout, self.connector.connect(&address)).await {
                Ok(Ok(transport)) => transport,
                Ok(Err(e)) => return Err(self.fail(e).await),
                Err(_) => {
                    let e = AirconError::Timeout(self.connect_timeout);
                    return Err(self.fail(e).await);
                }
            };

        self.set_state(SessionState::Handshaking);
        let outcome = timeout(
            self.request_timeout,
            handshake(&mut transport, &self.credentials, &self.device_id),
        )
        .await;

        match outcome {
            Ok(Ok(cipher)) => {
                self.transport = Some(transport);
                self.context = Some(SessionContext {
                    cipher,
                    next_seq: 0,
                });
                self.backoff.reset();
                self.last_traffic = Instant::now();
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Ok(Err(e)) => {
                transport.close().await;
                Err(self.fail(e).await)
            }
            Err(_) => {
                transport.close().await;
                Err(self.fail(AirconError::Timeout(self.request_timeout)).await)
            }
        }
    }

    /// Wait out the scheduled backoff (if any), then [`connect`](Self::connect).
    ///
    /// Both the wait and the connect attempt end immediately with
    /// [`AirconError::Cancelled`] once `shutdown` flips to `true`.
    pub async fn reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        if let SessionState::Reconnecting { attempt, delay } = self.state() {
            debug!(
                "[{}] Reconnect attempt {} in {:.1}s",
                self.device_id,
                attempt,
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_requested(shutdown) => return Err(AirconError::Cancelled),
            }
        }
        if *shutdown.borrow() {
            return Err(AirconError::Cancelled);
        }

        let attempt = tokio::select! {
            result = self.connect() => Some(result),
            _ = shutdown_requested(shutdown) => None,
        };
        match attempt {
            Some(result) => result,
            None => {
                self.shutdown().await;
                Err(AirconError::Cancelled)
            }
        }
    }

    /// Send one request and wait for its response.
    ///
    /// Only valid while `Ready`. Any failure tears the session down into
    /// `Reconnecting` before the error is returned.
    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        let state = self.state();
        let (Some(transport), Some(context)) = (self.transport.as_mut(), self.context.as_mut())
        else {
            return Err(AirconError::NotReady { state });
        };

        let seq_no = context.next_seq;
        context.next_seq += 1;
        let outcome = timeout(
            self.request_timeout,
            exchange(transport, &context.cipher, seq_no, request, &self.device_id),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                self.last_traffic = Instant::now();
                Ok(response)
            }
            Ok(Err(e)) => Err(self.fail(e).await),
            Err(_) => Err(self.fail(AirconError::Timeout(self.request_timeout)).await),
        }
    }

    /// When the next keep-alive falls due.
    pub fn keep_alive_deadline(&self) -> Instant {
        self.last_traffic + self.keep_alive_interval
    }

    pub fn keep_alive_due(&self, now: Instant) -> bool {
        self.is_ready() && now >= self.keep_alive_deadline()
    }

    /// Ping the device to detect a silently dead connection.
    pub async fn keep_alive(&mut self) -> Result<()> {
        debug!("[{}] Keep-alive", self.device_id);
        self.send(&Request::Ping).await.map(|_| ())
    }

    /// Close the transport and force `Disconnected`.
    pub async fn shutdown(&mut self) {
        self.drop_transport().await;
        self.backoff.reset();
        self.set_state(SessionState::Disconnected);
    }

    async fn fail(&mut self, err: AirconError) -> AirconError {
        self.drop_transport().await;
        if let AirconError::KeyMismatch { .. } = err {
            error!(
                "[{}] {}; device credentials must be rediscovered",
                self.device_id, err
            );
            self.set_state(SessionState::Disconnected);
        } else {
            let delay = self.backoff.next_delay();
            warn!("[{}] Session error: {}", self.device_id, err);
            self.set_state(SessionState::Reconnecting {
                attempt: self.backoff.failures(),
                delay,
            });
        }
        err
    }

    async fn drop_transport(&mut self) {
        self.context = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        match state {
            SessionState::Ready => info!("[{}] Session ready", self.device_id),
            _ => debug!("[{}] Session state: {}", self.device_id, state),
        }
        self.state_tx.send_replace(state.clone());
        // No subscribers is fine
        let _ = self.events.send(DeviceEvent::SessionStateChanged {
            device_id: self.device_id.clone(),
            state,
        });
    }
}

/// Resolves once the watched flag is `true` or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn handshake<T: Transport>(
    transport: &mut T,
    credentials: &Credentials,
    device_id: &str,
) -> Result<SessionCipher> {
    let raw = transport.recv_frame().await?;
    let hello: KeyExchangeHello = decode_frame(&raw)?;
    let exchange = hello.key_exchange;
    exchange.check_supported()?;

    if exchange.key_id != credentials.key_material_id {
        return Err(AirconError::KeyMismatch {
            configured: credentials.key_material_id,
            advertised: exchange.key_id,
        });
    }

    let reply = KeyExchangeReply {
        random_2: random_nonce(),
        time_2: nonce_time(),
    };
    transport.send_frame(&encode_frame(&reply)?).await?;
    debug!(
        "[{}] Key exchange complete (key id {})",
        device_id, exchange.key_id
    );

    let nonces = HandshakeNonces {
        random_1: exchange.random_1,
        time_1: exchange.time_1,
        random_2: reply.random_2,
        time_2: reply.time_2,
    };
    Ok(SessionCipher::derive(
        credentials.secret_bytes(),
        &nonces,
        Role::Gateway,
    ))
}

async fn exchange<T: Transport>(
    transport: &mut T,
    cipher: &SessionCipher,
    seq_no: u64,
    request: &Request,
    device_id: &str,
) -> Result<Response> {
    let plaintext = encode_frame(&Envelope {
        seq_no,
        data: request,
    })?;
    let frame = encode_frame(&cipher.seal(&plaintext)?)?;
    debug!("[{}] -> {} (seq {})", device_id, request.method(), seq_no);
    transport.send_frame(&frame).await?;

    loop {
        let raw = transport.recv_frame().await?;
        let sealed: SealedFrame = decode_frame(&raw)?;
        let plaintext = cipher.open(&sealed)?;
        // Authentic but unreadable plaintext means the keys disagree
        let envelope: Envelope<Response> = decode_frame(&plaintext)
            .map_err(|e| AirconError::crypto(format!("reply does not unframe: {e}")))?;

        if envelope.seq_no < seq_no {
            warn!(
                "[{}] Discarding stale reply (seq {}, expected {})",
                device_id, envelope.seq_no, seq_no
            );
            continue;
        }
        if envelope.seq_no > seq_no {
            return Err(AirconError::invalid_response(format!(
                "reply seq {} ahead of request seq {}",
                envelope.seq_no, seq_no
            )));
        }
        return Ok(envelope.data);
    }
}

pub(crate) fn random_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

pub(crate) fn nonce_time() -> u64 {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default().unsigned_abs() as u128;
    (nanos % NONCE_TIME_MODULUS) as u64
}
