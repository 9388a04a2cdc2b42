//! Broadcast medium abstraction.
//!
//! A [`Broker`] publishes payloads to named channels and hands out
//! [`BrokerSubscription`]s that are polled without blocking.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A publish was rejected or failed in flight.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The subscription has been closed or its stream ended.
    #[error("Subscription closed")]
    Closed,

    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),
}

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// A publish/subscribe medium.
///
/// Implementations do not retry internally; failures are surfaced to the
/// caller as-is.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a channel.
    ///
    /// Returns the number of subscribers the broker delivered to.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BrokerError>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError>;

    /// Get the broker name (e.g., "memory", "redis").
    fn name(&self) -> &'static str;
}

/// A live subscription handle.
pub trait BrokerSubscription: Send {
    /// The subscribed channel.
    fn channel(&self) -> &str;

    /// Take the next pending payload without blocking.
    ///
    /// Returns `Ok(None)` when nothing is currently available.
    fn poll(&mut self) -> Result<Option<Bytes>, BrokerError>;

    /// Release the handle. Must be safe to call more than once.
    fn close(&mut self);
}
