// MIT License - Copyright (c) 2026 Peter Wright
// Per-device sync loop

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::error::{AirconError, Result};
use crate::event::{DeviceEvent, EventSender};
use crate::properties::PropertyValue;
use crate::protocol::Request;
use crate::session::{DeviceSession, shutdown_requested};
use crate::store::PropertyStore;
use crate::transport::Connector;

/// What one pass of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Dispatched,
    Polled,
    KeptAlive,
    Idle,
}

/// Drives one device: dispatches queued commands, polls, keeps the
/// connection alive and reconnects through the session's backoff.
pub struct SyncEngine<C: Connector> {
    session: DeviceSession<C>,
    store: Arc<PropertyStore>,
    events: EventSender,
    device_id: String,
    poll_interval: Duration,
    max_batch: usize,
    shutdown_grace: Duration,
    next_poll: Instant,
}

impl<C: Connector> SyncEngine<C> {
    pub fn new(
        session: DeviceSession<C>,
        store: Arc<PropertyStore>,
        config: &DeviceConfig,
        events: EventSender,
    ) -> Self {
        Self {
            session,
            store,
            events,
            device_id: config.device_id.clone(),
            poll_interval: config.poll_interval(),
            max_batch: config.max_batch.max(1),
            shutdown_grace: config.shutdown_grace(),
            next_poll: Instant::now(),
        }
    }

    /// Run until `shutdown` flips to `true` (returns `Ok`) or the session
    /// hits a fatal key mismatch (returns that error).
    ///
    /// On exit the transport is closed and pending commands are dropped
    /// without being resolved.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("[{}] Sync engine started", self.device_id);
        let result = self.run_loop(&mut shutdown).await;
        self.session.shutdown().await;
        self.store.abandon_pending().await;
        match &result {
            Ok(()) => info!("[{}] Sync engine stopped", self.device_id),
            Err(e) => error!("[{}] Sync engine stopped: {}", self.device_id, e),
        }
        result
    }

    async fn run_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            self.store.tick(Instant::now()).await;

            if !self.session.is_ready() {
                // Commands keep expiring while the device is unreachable
                let attempt = tokio::select! {
                    result = self.session.reconnect(shutdown) => result,
                    never = expire_while_offline(&self.store) => match never {},
                };
                match attempt {
                    Ok(()) => self.next_poll = Instant::now(),
                    Err(AirconError::Cancelled) => return Ok(()),
                    Err(e @ AirconError::KeyMismatch { .. }) => {
                        let _ = self.events.send(DeviceEvent::SessionFatal {
                            device_id: self.device_id.clone(),
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                    // Backoff is already scheduled
                    Err(e) => debug!("[{}] Connect failed: {}", self.device_id, e),
                }
                continue;
            }

            let grace = self.shutdown_grace;
            let outcome = {
                let step = self.step();
                tokio::pin!(step);
                tokio::select! {
                    result = &mut step => Some(result),
                    _ = shutdown_requested(shutdown) => {
                        // Give an in-flight request a bounded chance to finish
                        let _ = timeout(grace, &mut step).await;
                        None
                    }
                }
            };

            match outcome {
                None => return Ok(()),
                Some(Ok(Step::Idle)) => self.wait_for_work(shutdown).await,
                Some(Ok(step)) => debug!("[{}] {:?}", self.device_id, step),
                Some(Err(e)) if e.is_retryable() => {
                    debug!("[{}] Nothing dispatched this pass: {}", self.device_id, e)
                }
                Some(Err(e)) => warn!("[{}] {}", self.device_id, e),
            }
        }
    }

    async fn step(&mut self) -> Result<Step> {
        let now = Instant::now();
        let batch = self.store.take_dispatch_batch(self.max_batch, now).await;
        if !batch.is_empty() {
            self.dispatch(batch).await?;
            return Ok(Step::Dispatched);
        }
        if now >= self.next_poll {
            self.poll().await?;
            return Ok(Step::Polled);
        }
        if self.session.keep_alive_due(now) {
            self.session.keep_alive().await?;
            return Ok(Step::KeptAlive);
        }
        Ok(Step::Idle)
    }

    /// Send every write in `batch` as one request and merge the reply.
    async fn dispatch(&mut self, batch: Vec<(String, PropertyValue)>) -> Result<()> {
        let registry = self.store.registry();
        let mut names = Vec::with_capacity(batch.len());
        let mut writes = Vec::with_capacity(batch.len());
        for (name, value) in &batch {
            match registry.to_wire(name, value) {
                Ok(write) => {
                    names.push(name.clone());
                    writes.push(write);
                }
                Err(e) => warn!("[{}] Dropping write: {}", self.device_id, e),
            }
        }
        if writes.is_empty() {
            return Ok(());
        }

        debug!(
            "[{}] Dispatching {} write(s): {}",
            self.device_id,
            writes.len(),
            names.join(", ")
        );
        let request = Request::Set { properties: writes };
        match self.session.send(&request).await {
            Ok(response) => {
                self.store.merge_wire(&response.properties).await;
                Ok(())
            }
            Err(e) => {
                self.store.requeue_front(names).await;
                Err(e)
            }
        }
    }

    async fn poll(&mut self) -> Result<()> {
        let request = Request::Get {
            properties: self.store.registry().names(),
        };
        let result = self.session.send(&request).await;
        self.next_poll = Instant::now() + self.poll_interval;
        let response = result?;
        let changed = self.store.merge_wire(&response.properties).await;
        debug!(
            "[{}] Poll returned {} properties, {} changed",
            self.device_id,
            response.properties.len(),
            changed
        );
        Ok(())
    }

    async fn wait_for_work(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let mut deadline = self.next_poll.min(self.session.keep_alive_deadline());
        if let Some(expiry) = self.store.next_deadline().await {
            deadline = deadline.min(expiry);
        }
        tokio::select! {
            _ = self.store.notified() => {}
            _ = sleep_until(deadline) => {}
            _ = shutdown_requested(shutdown) => {}
        }
    }
}

/// Run [`PropertyStore::tick`] at every attempt deadline. Never returns.
async fn expire_while_offline(store: &PropertyStore) -> Infallible {
    loop {
        match store.next_deadline().await {
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = store.notified() => {}
                }
            }
            None => store.notified().await,
        }
        store.tick(Instant::now()).await;
    }
}
