//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`], split into a reader and a writer
//! that share one [`ConnectionState`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{
    ClientConnection, ClientReader, ClientWriter, ConnectionId, ConnectionState, TransportError,
};

/// Wrap an upgraded WebSocket as a client connection.
#[must_use]
pub fn accept(socket: WebSocket, id: ConnectionId) -> ClientConnection {
    let (sink, stream) = socket.split();
    let state = ConnectionState::new();

    let reader = WebSocketReader {
        stream,
        state: state.clone(),
    };
    let writer = WebSocketWriter { sink, state };

    ClientConnection::new(id, Box::new(reader), Box::new(writer))
}

/// Receiving half of a WebSocket connection.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    state: ConnectionState,
}

#[async_trait]
impl ClientReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    // For compatibility, treat binary as text
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // axum answers pings itself
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(reason = ?frame, "Received close frame");
                    self.state.mark_closed();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    self.state.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.state.mark_closed();
                    return Ok(None);
                }
            }
        }
    }
}

/// Sending half of a WebSocket connection.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    state: ConnectionState,
}

#[async_trait]
impl ClientWriter for WebSocketWriter {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.state.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let text = String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::SendFailed(format!("frame is not UTF-8: {}", e)))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let was_open = self.state.mark_closed();
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(e) if !was_open => {
                debug!(error = %e, "Close on already-closed socket");
                Ok(())
            }
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }
}
