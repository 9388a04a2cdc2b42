//! Relay error taxonomy.

use chatline_protocol::ProtocolError;
use chatline_transport::TransportError;
use thiserror::Error;

use crate::broker::BrokerError;

/// Message shown to clients for failures that have no specific category.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected server error occurred";

/// Errors that terminate a pump or a whole relay.
///
/// The `Display` output may carry internal detail and is meant for logs.
/// Clients only ever see [`RelayError::client_message`].
#[derive(Debug, Error)]
pub enum RelayError {
    /// Client sent a payload that failed to decode or validate.
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(#[source] ProtocolError),

    /// The broker could not be reached when opening the subscription.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[source] BrokerError),

    /// Publishing a client message to the broker failed.
    #[error("Message publish failed: {0}")]
    MessagePublishFailed(#[source] BrokerError),

    /// Writing a broker message to the client failed.
    #[error("Message delivery failed: {0}")]
    MessageDeliveryFailed(#[source] TransportError),

    /// The client transport failed while reading.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// The broker failed during an established subscription.
    #[error("Broker error: {0}")]
    Broker(#[source] BrokerError),

    /// Anything else, including a panicked pump task.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Client-safe description of the failure category.
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            RelayError::InvalidMessageFormat(_) => "Invalid message format",
            RelayError::BrokerUnavailable(_) => "Message broker unavailable",
            RelayError::MessagePublishFailed(_) => "Failed to publish message",
            RelayError::MessageDeliveryFailed(_) => "Failed to deliver message",
            RelayError::Transport(_) => "Connection error",
            RelayError::Broker(_) => "Message broker error",
            RelayError::Unexpected(_) => UNEXPECTED_ERROR_MESSAGE,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            RelayError::InvalidMessageFormat(_) => "invalid_message_format",
            RelayError::BrokerUnavailable(_) => "broker_unavailable",
            RelayError::MessagePublishFailed(_) => "message_publish_failed",
            RelayError::MessageDeliveryFailed(_) => "message_delivery_failed",
            RelayError::Transport(_) => "transport",
            RelayError::Broker(_) => "broker",
            RelayError::Unexpected(_) => "unexpected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_internal_detail() {
        let err = RelayError::MessagePublishFailed(BrokerError::Publish(
            "connection reset by 10.0.0.7:6379".into(),
        ));
        assert_eq!(err.client_message(), "Failed to publish message");
        assert!(err.to_string().contains("10.0.0.7"));
        assert!(!err.client_message().contains("10.0.0.7"));
    }

    #[test]
    fn test_unexpected_is_generic() {
        let err = RelayError::Unexpected("task panicked at src/pump.rs".into());
        assert_eq!(err.client_message(), UNEXPECTED_ERROR_MESSAGE);
        assert_eq!(err.category(), "unexpected");
    }

    #[test]
    fn test_invalid_format_category() {
        let err = RelayError::InvalidMessageFormat(ProtocolError::Validation("missing".into()));
        assert_eq!(err.client_message(), "Invalid message format");
        assert_eq!(err.category(), "invalid_message_format");
    }
}
