//! Packet transport to the device
//!
//! This module provides:
//! - The `Transport` trait: an opaque request/response packet channel
//! - A TCP transport with response timeout and reconnect backoff
//! - `MockTransport`: an in-memory device speaking the packet protocol

pub mod mock;
pub mod reconnect;
pub mod tcp;

pub use mock::{MockDevice, MockTransport};
pub use reconnect::{connect_with_backoff, reconnect_config, ReconnectConfig};
pub use tcp::{TcpTransport, TcpTransportConfig};

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Request/response packet channel to one device
///
/// Framing, timeouts and link-level retries belong to the implementation;
/// callers only see whole packets or an error.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel
    ///
    /// With `force_reconnect` an open channel is dropped and reopened.
    /// Fails with `Connect` when the device cannot be reached.
    async fn open(&mut self, force_reconnect: bool) -> Result<()>;

    /// Send one packet and wait for its reply packet
    async fn exchange(&mut self, packet: Bytes) -> Result<Bytes>;

    /// Release the channel
    async fn close(&mut self) -> Result<()>;

    /// Whether the channel is currently open
    fn is_open(&self) -> bool;
}
