//! In-memory transport.
//!
//! [`pair`] returns a server-side [`ClientConnection`] and the
//! [`MemoryClient`] that drives it, connected by unbounded channels.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{
    ClientConnection, ClientReader, ClientWriter, ConnectionId, ConnectionState, TransportError,
};

/// Events travelling from the client to the server.
#[derive(Debug)]
enum ClientEvent {
    Data(Bytes),
    Close,
    Error(String),
}

/// Create a connected in-memory client/server pair.
#[must_use]
pub fn pair(id: impl Into<ConnectionId>) -> (ClientConnection, MemoryClient) {
    let id = id.into();
    let state = ConnectionState::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let reader = MemoryReader {
        rx: inbound_rx,
        state: state.clone(),
    };
    let writer = MemoryWriter {
        tx: Some(outbound_tx),
        state: state.clone(),
    };
    let client = MemoryClient {
        tx: inbound_tx,
        rx: outbound_rx,
        state,
    };

    (
        ClientConnection::new(id, Box::new(reader), Box::new(writer)).with_remote_addr("memory"),
        client,
    )
}

/// Server-side receiving half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    state: ConnectionState,
}

#[async_trait]
impl ClientReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.rx.recv().await {
            Some(ClientEvent::Data(data)) => Ok(Some(data)),
            Some(ClientEvent::Close) => {
                debug!("Received close frame");
                self.state.mark_closed();
                Ok(None)
            }
            Some(ClientEvent::Error(e)) => {
                self.state.mark_closed();
                Err(TransportError::ReceiveFailed(e))
            }
            None => {
                debug!("Memory stream ended");
                self.state.mark_closed();
                Ok(None)
            }
        }
    }
}

/// Server-side sending half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    state: ConnectionState,
}

#[async_trait]
impl ClientWriter for MemoryWriter {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(data)
            .map_err(|_| TransportError::SendFailed("client receiver dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.mark_closed();
        self.tx.take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.is_open() && self.tx.is_some()
    }
}

/// The client end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    tx: mpsc::UnboundedSender<ClientEvent>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    state: ConnectionState,
}

impl MemoryClient {
    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Send a raw frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(ClientEvent::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a close frame.
    pub fn close(&self) {
        let _ = self.tx.send(ClientEvent::Close);
    }

    /// Simulate a transport-level read failure on the server side.
    pub fn inject_error(&self, reason: impl Into<String>) {
        let _ = self.tx.send(ClientEvent::Error(reason.into()));
    }

    /// Stop accepting frames; later server writes fail.
    pub fn stop_reading(&mut self) {
        self.rx.close();
    }

    /// Receive the next frame sent by the server.
    ///
    /// Returns `None` once the server has closed and all frames are drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Check whether either side has closed the connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_roundtrip() {
        let (conn, mut client) = pair("mem-1");
        assert_eq!(conn.id().as_str(), "mem-1");
        let (_, mut reader, mut writer) = conn.into_parts();

        client.send_text("hello").unwrap();
        assert_eq!(reader.recv().await.unwrap().unwrap(), Bytes::from("hello"));

        writer.send(Bytes::from("world")).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), Bytes::from("world"));
    }

    #[tokio::test]
    async fn test_memory_close_marks_both_halves() {
        let (conn, client) = pair("mem-2");
        let (_, mut reader, writer) = conn.into_parts();

        client.close();
        assert!(reader.recv().await.unwrap().is_none());
        assert!(!writer.is_open());
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_memory_writer_close_ends_client_stream() {
        let (conn, mut client) = pair("mem-3");
        let (_, _reader, mut writer) = conn.into_parts();

        writer.send(Bytes::from("last")).await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(client.recv().await.unwrap(), Bytes::from("last"));
        assert!(client.recv().await.is_none());
        assert!(matches!(
            writer.send(Bytes::from("late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_memory_send_fails_when_client_stops_reading() {
        let (conn, mut client) = pair("mem-4");
        let (_, _reader, mut writer) = conn.into_parts();

        client.stop_reading();
        assert!(matches!(
            writer.send(Bytes::from("x")).await,
            Err(TransportError::SendFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_injected_error() {
        let (conn, client) = pair("mem-5");
        let (_, mut reader, _writer) = conn.into_parts();

        client.inject_error("reset by peer");
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_client_drop_is_clean_close() {
        let (conn, client) = pair("mem-6");
        let (_, mut reader, _writer) = conn.into_parts();

        drop(client);
        assert!(reader.recv().await.unwrap().is_none());
    }
}
