//! # chatline-transport
//!
//! Client transport abstraction for the Chatline relay.
//!
//! A client connection is split into a [`ClientReader`] and a
//! [`ClientWriter`] so the inbound and outbound pumps can run as separate
//! tasks. Both halves share a [`ConnectionState`] that records when the
//! client has gone away.
//!
//! - **WebSocket** - axum's upgraded socket, used by the server
//! - **Memory** - an in-process duplex pair for tests and embedding
//!
//! ```rust,ignore
//! use chatline_transport::ClientConnection;
//!
//! async fn drain(conn: ClientConnection) {
//!     let (_id, mut reader, _writer) = conn.into_parts();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{pair as memory_pair, MemoryClient, MemoryReader, MemoryWriter};
pub use traits::{
    ClientConnection, ClientReader, ClientWriter, ConnectionId, ConnectionState, TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{accept as accept_websocket, WebSocketReader, WebSocketWriter};
