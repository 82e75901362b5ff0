// MIT License - Copyright (c) 2026 Peter Wright
// Frame transports

pub mod memory;
pub mod tcp;

use std::future::Future;

use crate::error::Result;

pub use memory::{MemoryConnector, MemoryListener, MemoryTransport};
pub use tcp::{TcpConnector, TcpTransport};

/// A bidirectional, ordered stream of frames to one device.
///
/// Frames are opaque byte strings; delimiting is the transport's business.
/// `recv_frame` is not cancel-safe: a session that abandons a read must
/// drop the transport.
pub trait Transport: Send + 'static {
    fn send_frame(&mut self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Next frame, or [`crate::AirconError::Disconnected`] once the peer closed.
    fn recv_frame(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Best-effort close. Never fails.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens transports; a session holds one and reconnects through it.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self, address: &str) -> impl Future<Output = Result<Self::Transport>> + Send;
}
