//! Network transport layer abstraction.
//!
//! Defines the `NetDriver` trait for the underlying network stack,
//! allowing different implementations (tcp, mock, etc.). Received data is
//! pushed by the driver through a `RecvSink`; the transport buffers it for
//! the blocking `recv` side.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network interface not ready")]
    NotReady,

    #[error("Failed to connect to {host}:{port}: {message}")]
    ConnectFailed {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Receive buffer overflow")]
    BufferOverflow,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque per-connection handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetHandle(pub u64);

/// Receiver side of a connection.
///
/// The driver calls `deliver` from its own context for every inbound
/// event: `Some(data)` for received bytes, `None` when the peer closed
/// the connection. `deliver` may block while the consumer catches up.
pub trait RecvSink: Send + Sync {
    fn deliver(&self, data: Option<&[u8]>);
}

/// Abstract network driver interface.
///
/// This trait enables:
/// - Production implementation over the host TCP stack
/// - Mock implementation for unit testing
/// - Future alternative backends
pub trait NetDriver: Send + Sync {
    /// Whether the network interface is up and usable.
    fn ready(&self) -> bool;

    /// Open a connection, blocking until established or failed. Inbound
    /// events for the connection's lifetime go to `sink`.
    fn connect(
        &self,
        host: &str,
        port: u16,
        sink: Arc<dyn RecvSink>,
    ) -> Result<NetHandle, TransportError>;

    /// Send all of `data` on the connection.
    fn send(&self, handle: NetHandle, data: &[u8]) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    fn close(&self, handle: NetHandle);
}
