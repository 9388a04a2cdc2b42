//! Chat message types.
//!
//! [`ClientMessage`] is what a browser sends; [`ChatMessage`] is the validated,
//! immutable form that travels over the broker and back out to clients.

use serde::{Deserialize, Serialize};

use crate::codec::ProtocolError;

/// A validated chat message.
///
/// Constructed once from a client frame and never mutated afterwards.
/// Serializes as `{"from", "date", "message"}` with an optional `room_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    from: String,
    date: i64,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
}

impl ChatMessage {
    /// Create a new chat message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Validation`] if `from` or `message` is empty.
    pub fn new(
        from: impl Into<String>,
        date: i64,
        message: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let msg = Self {
            from: from.into(),
            date,
            message: message.into(),
            room_id: None,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Attach a room identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Validation`] if the room id is empty.
    pub fn with_room(mut self, room_id: impl Into<String>) -> Result<Self, ProtocolError> {
        let room_id = room_id.into();
        if room_id.is_empty() {
            return Err(ProtocolError::Validation("room_id cannot be empty".into()));
        }
        self.room_id = Some(room_id);
        Ok(self)
    }

    /// The sender's user identifier.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Timestamp supplied by the sender.
    #[must_use]
    pub fn date(&self) -> i64 {
        self.date
    }

    /// Message body.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Optional room identifier.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// Check the required-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.from.is_empty() {
            return Err(ProtocolError::Validation("from cannot be empty".into()));
        }
        if self.message.is_empty() {
            return Err(ProtocolError::Validation("message cannot be empty".into()));
        }
        if matches!(self.room_id.as_deref(), Some("")) {
            return Err(ProtocolError::Validation("room_id cannot be empty".into()));
        }
        Ok(())
    }
}

/// A chat message as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Sender's user identifier.
    pub user_id: String,
    /// Client-side timestamp.
    pub timestamp: i64,
    /// Message body.
    pub message: String,
    /// Optional room identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl ClientMessage {
    /// Create a client message, mainly useful for tests and client tooling.
    #[must_use]
    pub fn new(user_id: impl Into<String>, timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp,
            message: message.into(),
            room_id: None,
        }
    }
}

impl TryFrom<ClientMessage> for ChatMessage {
    type Error = ProtocolError;

    fn try_from(value: ClientMessage) -> Result<Self, Self::Error> {
        let msg = ChatMessage {
            from: value.user_id,
            date: value.timestamp,
            message: value.message,
            room_id: value.room_id,
        };
        msg.validate()?;
        Ok(msg)
    }
}
