//! TCP packet transport
//!
//! Talks to a device bridge that forwards raw packets to the brick. Packets
//! are self-delimiting (2-byte little-endian length prefix), so no extra
//! framing is added on the wire.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::reconnect::{connect_with_backoff, ReconnectConfig};
use super::Transport;
use crate::protocol::PacketCodec;
use crate::{DeployError, Result};

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Bridge address (host:port)
    pub addr: String,
    /// Maximum wait for one reply
    pub response_timeout: Duration,
    /// Connection backoff
    pub reconnect: ReconnectConfig,
}

impl TcpTransportConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            response_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Packet transport over a TCP stream
pub struct TcpTransport {
    config: TcpTransportConfig,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config, stream: None }
    }

    async fn round_trip(stream: &mut TcpStream, packet: &[u8]) -> std::io::Result<Vec<u8>> {
        stream.write_all(packet).await?;

        let mut prefix = [0u8; 2];
        stream.read_exact(&mut prefix).await?;

        let mut reply = vec![0u8; PacketCodec::frame_len(prefix)];
        reply[..2].copy_from_slice(&prefix);
        stream.read_exact(&mut reply[2..]).await?;
        Ok(reply)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self, force_reconnect: bool) -> Result<()> {
        if self.stream.is_some() && !force_reconnect {
            return Ok(());
        }
        if let Some(mut old) = self.stream.take() {
            tracing::debug!("Dropping open link to {} for reconnect", self.config.addr);
            let _ = old.shutdown().await;
        }

        let stream = connect_with_backoff(&self.config.addr, &self.config.reconnect).await?;
        stream
            .set_nodelay(true)
            .map_err(|e| DeployError::Connect(format!("Failed to configure socket: {}", e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn exchange(&mut self, packet: Bytes) -> Result<Bytes> {
        let stream = self.stream.as_mut().ok_or(DeployError::NotConnected)?;
        let limit = self.config.response_timeout;

        let outcome = timeout(limit, Self::round_trip(stream, &packet)).await;
        match outcome {
            Ok(Ok(reply)) => {
                tracing::trace!("Exchanged {} -> {} bytes", packet.len(), reply.len());
                Ok(Bytes::from(reply))
            }
            Ok(Err(e)) => {
                // Link state is unknown after a partial exchange
                self.stream = None;
                Err(DeployError::Transport(format!("Link error: {}", e)))
            }
            Err(_) => {
                self.stream = None;
                Err(DeployError::Timeout(limit.as_millis() as u64))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
