// MIT License - Copyright (c) 2026 Peter Wright
// In-process frame transport

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::trace;

use super::{Connector, Transport};
use crate::error::{AirconError, Result};

/// One end of an in-process frame pipe.
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Two connected ends.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

impl Transport for MemoryTransport {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(AirconError::Disconnected)?;
        tx.send(frame.to_vec())
            .map_err(|_| AirconError::Disconnected)
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        self.rx.recv().await.ok_or(AirconError::Disconnected)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Connector handing the far end of each new pipe to a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryTransport>,
    connects: Arc<AtomicUsize>,
}

/// Receives the device-side ends created by a [`MemoryConnector`].
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryTransport>,
}

/// Create a connected connector/listener pair.
pub fn listener() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            accept_tx,
            connects: Arc::new(AtomicUsize::new(0)),
        },
        MemoryListener { accept_rx },
    )
}

impl MemoryConnector {
    /// Number of connection attempts that reached the listener.
    pub fn connection_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, address: &str) -> Result<MemoryTransport> {
        let (local, remote) = pair();
        self.accept_tx.send(remote).map_err(|_| {
            AirconError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no listener for {address}"),
            ))
        })?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        trace!("In-memory connection to {}", address);
        Ok(local)
    }
}

impl MemoryListener {
    /// Next incoming connection, or `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryTransport> {
        self.accept_rx.recv().await
    }
}
