// MIT License - Copyright (c) 2026 Peter Wright
// Observed values and pending commands for one device

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{AirconError, Result};
use crate::event::{DeviceEvent, EventSender};
use crate::properties::{PropertyRegistry, PropertyValue};
use crate::protocol::WireReading;

/// Last value reported by the device for one property.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: PropertyValue,
    pub observed_at: DateTime<Utc>,
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// An observation matched the requested value
    Succeeded,
    /// Retries exhausted without a matching observation
    Failed { attempts: u32 },
    /// A newer command for the same property replaced this one
    Superseded,
}

/// Handle returned by [`PropertyStore::issue_command`].
///
/// Dropping it is fine; the command still runs.
#[derive(Debug)]
pub struct CommandTicket {
    name: String,
    value: PropertyValue,
    rx: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Wait for the command to be resolved.
    ///
    /// Returns [`AirconError::ChannelClosed`] if the device shut down first.
    pub async fn wait(self) -> Result<CommandOutcome> {
        self.rx.await.map_err(|_| AirconError::ChannelClosed)
    }

    /// Like [`wait`](Self::wait), but a permanent failure becomes
    /// [`AirconError::CommandTimeout`].
    pub async fn confirmed(self) -> Result<CommandOutcome> {
        let name = self.name.clone();
        let value = self.value.to_string();
        match self.wait().await? {
            CommandOutcome::Failed { attempts } => Err(AirconError::CommandTimeout {
                name,
                value,
                attempts,
            }),
            outcome => Ok(outcome),
        }
    }
}

struct PendingCommand {
    value: PropertyValue,
    issued_at: Instant,
    /// Start of the current attempt; the attempt expires one timeout later
    attempt_started: Instant,
    attempt: u32,
    reply: oneshot::Sender<CommandOutcome>,
}

impl PendingCommand {
    fn resolve(self, outcome: CommandOutcome) {
        // The ticket may have been dropped
        let _ = self.reply.send(outcome);
    }
}

#[derive(Default)]
struct StoreInner {
    values: BTreeMap<String, Observation>,
    pending: HashMap<String, PendingCommand>,
    /// Property names awaiting dispatch, oldest first, no duplicates
    queue: VecDeque<String>,
}

impl StoreInner {
    fn enqueue(&mut self, name: &str, value: PropertyValue, now: Instant) -> CommandTicket {
        let (reply, rx) = oneshot::channel();
        let command = PendingCommand {
            value: value.clone(),
            issued_at: now,
            attempt_started: now,
            attempt: 0,
            reply,
        };
        if let Some(previous) = self.pending.insert(name.to_string(), command) {
            debug!("{}={} superseded by {}", name, previous.value, value);
            previous.resolve(CommandOutcome::Superseded);
        }
        self.push_back(name);
        CommandTicket {
            name: name.to_string(),
            value,
            rx,
        }
    }

    fn push_back(&mut self, name: &str) {
        if !self.queue.iter().any(|queued| queued == name) {
            self.queue.push_back(name.to_string());
        }
    }

    fn remove(&mut self, name: &str) -> Option<PendingCommand> {
        self.queue.retain(|queued| queued != name);
        self.pending.remove(name)
    }
}

/// Observed property values plus the commands still waiting to be confirmed.
///
/// Shared between the sync engine and the bridges; every operation takes the
/// internal lock once, so a merge is applied atomically.
pub struct PropertyStore {
    device_id: String,
    registry: &'static PropertyRegistry,
    events: EventSender,
    attempt_timeout: Duration,
    max_attempts: u32,
    inner: Mutex<StoreInner>,
    dispatch: Notify,
}

impl PropertyStore {
    pub fn new(config: &DeviceConfig, events: EventSender) -> Self {
        Self {
            device_id: config.device_id.clone(),
            registry: PropertyRegistry::for_device_type(config.device_type),
            events,
            attempt_timeout: config.command_timeout(),
            max_attempts: config.max_attempts,
            inner: Mutex::new(StoreInner::default()),
            dispatch: Notify::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn registry(&self) -> &'static PropertyRegistry {
        self.registry
    }

    /// Validate and queue a write.
    ///
    /// Replaces any pending command for the same property. Linked commands
    /// (see [`PropertyRegistry::linked_commands`]) are queued right after.
    /// Validation failures return before anything is queued.
    pub async fn issue_command(&self, name: &str, value: PropertyValue) -> Result<CommandTicket> {
        self.registry.validate(name, &value)?;
        let linked = self.registry.linked_commands(name, &value);
        for (linked_name, linked_value) in &linked {
            self.registry.validate(linked_name, linked_value)?;
        }

        let now = Instant::now();
        let ticket = {
            let mut inner = self.inner.lock().await;
            let ticket = inner.enqueue(name, value, now);
            for (linked_name, linked_value) in linked {
                debug!(
                    "[{}] {}={} also sets {}={}",
                    self.device_id,
                    name,
                    ticket.value(),
                    linked_name,
                    linked_value
                );
                inner.enqueue(linked_name, linked_value, now);
            }
            ticket
        };

        info!("[{}] Queued {}={}", self.device_id, name, ticket.value());
        self.dispatch.notify_one();
        Ok(ticket)
    }

    /// Parse a raw bridge string, then [`issue_command`](Self::issue_command).
    pub async fn issue_raw(&self, name: &str, raw: &str) -> Result<CommandTicket> {
        let value = self.registry.parse(name, raw)?;
        self.issue_command(name, value).await
    }

    /// Apply typed observations. Returns how many stored values changed.
    ///
    /// Observations that fail validation are logged and skipped; they never
    /// reach the store. A pending command whose requested value was observed
    /// is resolved as succeeded.
    pub async fn merge(&self, observations: Vec<(String, PropertyValue)>) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut changed = 0;

        for (name, value) in observations {
            if let Err(e) = self.registry.validate_observation(&name, &value) {
                warn!("[{}] Ignoring observation: {}", self.device_id, e);
                continue;
            }

            let previous = inner.values.insert(
                name.clone(),
                Observation {
                    value: value.clone(),
                    observed_at: now,
                },
            );
            if previous.map(|o| o.value).as_ref() != Some(&value) {
                changed += 1;
                debug!("[{}] {} = {}", self.device_id, name, value);
                let _ = self.events.send(DeviceEvent::PropertyChanged {
                    device_id: self.device_id.clone(),
                    name: name.clone(),
                    value: value.clone(),
                });
            }

            let confirmed = inner
                .pending
                .get(&name)
                .is_some_and(|command| command.value == value);
            if confirmed && let Some(command) = inner.remove(&name) {
                info!(
                    "[{}] {}={} confirmed after {:?}",
                    self.device_id,
                    name,
                    value,
                    command.issued_at.elapsed()
                );
                let _ = self.events.send(DeviceEvent::CommandSucceeded {
                    device_id: self.device_id.clone(),
                    name: name.clone(),
                    value,
                });
                command.resolve(CommandOutcome::Succeeded);
            }
        }
        changed
    }

    /// Convert device readings to typed values and [`merge`](Self::merge) them.
    pub async fn merge_wire(&self, readings: &[WireReading]) -> usize {
        let observations = readings
            .iter()
            .filter_map(|reading| {
                match self.registry.from_wire(&reading.name, &reading.value) {
                    Ok(value) => Some((reading.name.clone(), value)),
                    Err(e) => {
                        warn!("[{}] Ignoring reading: {}", self.device_id, e);
                        None
                    }
                }
            })
            .collect();
        self.merge(observations).await
    }

    /// Expire overdue attempts: retry while `attempt < max_attempts`,
    /// otherwise fail the command and drop it. Returns the number failed.
    pub async fn tick(&self, now: Instant) -> usize {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let mut expired: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, command)| now >= command.attempt_started + self.attempt_timeout)
            .map(|(name, _)| name.clone())
            .collect();
        expired.sort();

        let mut retried = false;
        let mut failed = 0;
        for name in expired {
            let Some(command) = inner.pending.get_mut(&name) else {
                continue;
            };
            if command.attempt < self.max_attempts {
                command.attempt += 1;
                command.attempt_started = now;
                debug!(
                    "[{}] Retrying {}={} (retry {} of {})",
                    self.device_id, name, command.value, command.attempt, self.max_attempts
                );
                inner.push_back(&name);
                retried = true;
            } else if let Some(command) = inner.remove(&name) {
                warn!(
                    "[{}] {}={} not confirmed after {} retries, giving up",
                    self.device_id, name, command.value, command.attempt
                );
                let _ = self.events.send(DeviceEvent::CommandFailed {
                    device_id: self.device_id.clone(),
                    name: name.clone(),
                    value: command.value.clone(),
                    attempts: command.attempt,
                });
                let attempts = command.attempt;
                command.resolve(CommandOutcome::Failed { attempts });
                failed += 1;
            }
        }
        drop(guard);

        if retried {
            self.dispatch.notify_one();
        }
        failed
    }

    /// Take up to `max` queued commands, oldest first, for one request.
    pub async fn take_dispatch_batch(&self, max: usize, now: Instant) -> Vec<(String, PropertyValue)> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(name) = inner.queue.pop_front() else {
                break;
            };
            if let Some(command) = inner.pending.get_mut(&name) {
                command.attempt_started = now;
                batch.push((name, command.value.clone()));
            }
        }
        batch
    }

    /// Put a batch that could not be sent back at the head of the queue.
    pub async fn requeue_front(&self, names: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock().await;
        let names: Vec<String> = names.into_iter().collect();
        for name in names.into_iter().rev() {
            if inner.pending.contains_key(&name) && !inner.queue.contains(&name) {
                inner.queue.push_front(name);
            }
        }
    }

    /// Current value of every observed property.
    pub async fn snapshot(&self) -> BTreeMap<String, PropertyValue> {
        let inner = self.inner.lock().await;
        inner
            .values
            .iter()
            .map(|(name, observation)| (name.clone(), observation.value.clone()))
            .collect()
    }

    pub async fn observation(&self, name: &str) -> Option<Observation> {
        self.inner.lock().await.values.get(name).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Retry count of the pending command for `name`, if any.
    pub async fn pending_attempt(&self, name: &str) -> Option<u32> {
        self.inner.lock().await.pending.get(name).map(|c| c.attempt)
    }

    pub async fn has_queued(&self) -> bool {
        !self.inner.lock().await.queue.is_empty()
    }

    /// Earliest moment a pending attempt expires.
    pub async fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().await;
        inner
            .pending
            .values()
            .map(|command| command.attempt_started + self.attempt_timeout)
            .min()
    }

    /// Resolves when new work was queued.
    pub fn notified(&self) -> Notified<'_> {
        self.dispatch.notified()
    }

    /// Drop every pending command without resolving it. Used on shutdown.
    pub async fn abandon_pending(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.pending.is_empty() {
            debug!(
                "[{}] Dropping {} pending commands",
                self.device_id,
                inner.pending.len()
            );
        }
        inner.pending.clear();
        inner.queue.clear();
    }
}
