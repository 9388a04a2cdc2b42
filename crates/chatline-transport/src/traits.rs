//! Transport abstraction traits for Chatline.
//!
//! These traits define the interface every client transport must provide,
//! allowing the relay to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Counter mixed into generated IDs so two connections accepted in the
/// same nanosecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Open/closed flag shared by both halves of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    open: Arc<AtomicBool>,
}

impl ConnectionState {
    /// Create a state for a freshly accepted connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark the connection closed.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving half of a client connection.
#[async_trait]
pub trait ClientReader: Send {
    /// Receive the next data frame from the client.
    ///
    /// Suspends until a frame arrives. Returns `None` if the connection is
    /// closed cleanly. Control frames (ping/pong) are handled internally.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The sending half of a client connection.
#[async_trait]
pub trait ClientWriter: Send {
    /// Send one data frame to the client.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// An accepted client connection, before it is split between pumps.
pub struct ClientConnection {
    id: ConnectionId,
    reader: Box<dyn ClientReader>,
    writer: Box<dyn ClientWriter>,
    remote_addr: Option<String>,
}

impl ClientConnection {
    /// Assemble a connection from its halves.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        reader: Box<dyn ClientReader>,
        writer: Box<dyn ClientWriter>,
    ) -> Self {
        Self {
            id,
            reader,
            writer,
            remote_addr: None,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the remote address of the connection, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Split into identifier, reader and writer.
    #[must_use]
    pub fn into_parts(self) -> (ConnectionId, Box<dyn ClientReader>, Box<dyn ClientWriter>) {
        (self.id, self.reader, self.writer)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }

    #[test]
    fn test_connection_state_transitions_once() {
        let state = ConnectionState::new();
        let shared = state.clone();
        assert!(state.is_open());

        assert!(shared.mark_closed());
        assert!(!state.is_open());
        assert!(!state.mark_closed());
    }
}
