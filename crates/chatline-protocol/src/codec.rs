//! Codecs for chat messages.
//!
//! Client frames are JSON text. The broker carries MessagePack with named
//! fields so the integer timestamp survives unchanged.

use bytes::Bytes;
use serde_json::error::Category;
use thiserror::Error;

use crate::frames::ServerFrame;
use crate::message::{ChatMessage, ClientMessage};

/// Default maximum inbound message size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload is not valid structured data.
    #[error("Malformed payload: {0}")]
    Decode(String),

    /// Payload is well-formed but required fields are absent or malformed.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// Payload exceeds the configured maximum size.
    #[error("Message size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// JSON encoding error.
    #[error("JSON encoding error: {0}")]
    Json(#[source] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Broker payload error: {0}")]
    BrokerFormat(#[from] rmp_serde::decode::Error),
}

fn classify(err: serde_json::Error) -> ProtocolError {
    match err.classify() {
        Category::Data => ProtocolError::Validation(err.to_string()),
        Category::Syntax | Category::Eof | Category::Io => ProtocolError::Decode(err.to_string()),
    }
}

/// Parse JSON that must be an object with named fields.
///
/// serde's derived structs also accept positional arrays, so the shape is
/// checked before conversion.
fn from_object<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    let value: serde_json::Value = serde_json::from_slice(data).map_err(classify)?;
    if !value.is_object() {
        return Err(ProtocolError::Validation(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(classify)
}

/// Decode a client data frame into a validated [`ChatMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] if the payload is not JSON and
/// [`ProtocolError::Validation`] if the payload is not an object or a
/// required field is missing, mistyped or empty.
pub fn decode(data: &[u8]) -> Result<ChatMessage, ProtocolError> {
    let client: ClientMessage = from_object(data)?;
    ChatMessage::try_from(client)
}

/// Encode a chat message as the JSON frame sent to clients.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(msg: &ChatMessage) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(msg)
        .map(Bytes::from)
        .map_err(ProtocolError::Json)
}

/// Decode a server-shaped chat frame (the output of [`encode`]).
///
/// # Errors
///
/// Same classification as [`decode`].
pub fn decode_chat(data: &[u8]) -> Result<ChatMessage, ProtocolError> {
    let msg: ChatMessage = from_object(data)?;
    msg.validate()?;
    Ok(msg)
}

/// Encode any server frame as JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_frame(frame: &ServerFrame) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(frame)
        .map(Bytes::from)
        .map_err(ProtocolError::Json)
}

/// Encode a chat message into the broker transport format.
///
/// # Errors
///
/// Returns an error if MessagePack encoding fails.
pub fn encode_broker(msg: &ChatMessage) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(rmp_serde::to_vec_named(msg)?))
}

/// Decode a chat message from the broker transport format.
///
/// # Errors
///
/// Returns an error if the payload is not a valid MessagePack chat message.
pub fn decode_broker(data: &[u8]) -> Result<ChatMessage, ProtocolError> {
    let msg: ChatMessage = rmp_serde::from_slice(data)?;
    msg.validate()?;
    Ok(msg)
}

/// Codec with a per-message size limit.
#[derive(Debug, Clone, Copy)]
pub struct ChatCodec {
    max_message_size: usize,
}

impl Default for ChatCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl ChatCodec {
    /// Create a codec that rejects inbound frames larger than `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Get the configured size limit.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decode a client frame, enforcing the size limit.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] or any [`decode`] error.
    pub fn decode(&self, data: &[u8]) -> Result<ChatMessage, ProtocolError> {
        if data.len() > self.max_message_size {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: self.max_message_size,
            });
        }
        decode(data)
    }

    /// Encode a message for a client.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, msg: &ChatMessage) -> Result<Bytes, ProtocolError> {
        encode(msg)
    }

    /// Encode a message for the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_broker(&self, msg: &ChatMessage) -> Result<Bytes, ProtocolError> {
        encode_broker(msg)
    }

    /// Decode a message from the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is invalid.
    pub fn decode_broker(&self, data: &[u8]) -> Result<ChatMessage, ProtocolError> {
        decode_broker(data)
    }
}
