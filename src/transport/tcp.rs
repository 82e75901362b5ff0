// MIT License - Copyright (c) 2026 Peter Wright
// Newline-delimited frames over TCP

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, trace};

use super::{Connector, Transport};
use crate::constants::{FRAME_DELIMITER, MAX_FRAME_LEN};
use crate::error::{AirconError, Result};

/// Direct TCP transport to the device's LAN port.
pub struct TcpTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: String,
}

impl TcpTransport {
    pub async fn connect(address: &str) -> Result<Self> {
        debug!("Connecting to device at {}", address);
        let stream = TcpStream::connect(address).await.map_err(|e| {
            error!("TCP connect to {} failed: {}", address, e);
            AirconError::Io(e)
        })?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        debug!("TCP socket connected to {}", address);
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            peer: address.to_string(),
        })
    }
}

impl Transport for TcpTransport {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut bytes = Vec::with_capacity(frame.len() + 1);
        bytes.extend_from_slice(frame);
        bytes.push(FRAME_DELIMITER);
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        trace!("Sent {} bytes to {}", bytes.len(), self.peer);
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            let mut buf = Vec::new();
            let n = (&mut self.reader)
                .take(MAX_FRAME_LEN as u64 + 1)
                .read_until(FRAME_DELIMITER, &mut buf)
                .await?;
            if n == 0 {
                return Err(AirconError::Disconnected);
            }
            if buf.last() != Some(&FRAME_DELIMITER) {
                if buf.len() > MAX_FRAME_LEN {
                    return Err(AirconError::invalid_response(format!(
                        "frame from {} exceeds {} bytes",
                        self.peer, MAX_FRAME_LEN
                    )));
                }
                // EOF in the middle of a frame
                return Err(AirconError::Disconnected);
            }
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.is_empty() {
                continue;
            }
            trace!("Received {} bytes from {}", buf.len(), self.peer);
            return Ok(buf);
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error closing connection to {}: {}", self.peer, e);
        }
    }
}

/// Connector for real devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, address: &str) -> Result<TcpTransport> {
        TcpTransport::connect(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"{\"a\":1}\r\n\n{\"b\":2}\n").await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let mut transport = TcpConnector.connect(&address).await.unwrap();
        assert_eq!(transport.recv_frame().await.unwrap(), b"{\"a\":1}");
        // Blank lines are skipped
        assert_eq!(transport.recv_frame().await.unwrap(), b"{\"b\":2}");
        transport.send_frame(b"ping").await.unwrap();
        assert_eq!(server.await.unwrap(), b"ping\n");
        assert!(matches!(
            transport.recv_frame().await,
            Err(AirconError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let junk = vec![b'x'; MAX_FRAME_LEN + 10];
            let _ = socket.write_all(&junk).await;
            let _ = socket.write_all(b"\n").await;
        });

        let mut transport = TcpConnector.connect(&address).await.unwrap();
        assert!(matches!(
            transport.recv_frame().await,
            Err(AirconError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            TcpConnector.connect(&address).await,
            Err(AirconError::Io(_))
        ));
    }
}
