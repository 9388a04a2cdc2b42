//! Frames sent from the server to a client.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// A server-to-client frame.
///
/// Chat frames mirror [`ChatMessage`]. Error frames carry a short,
/// client-safe description and are sent at most once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A relayed chat message.
    Chat(ChatMessage),

    /// Terminal error notice.
    Error {
        /// Human-readable failure category.
        error: String,
    },
}

impl ServerFrame {
    /// Create a new error frame.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: error.into(),
        }
    }

    /// Check if this is an error frame.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ServerFrame::Error { .. })
    }
}

impl From<ChatMessage> for ServerFrame {
    fn from(msg: ChatMessage) -> Self {
        ServerFrame::Chat(msg)
    }
}
