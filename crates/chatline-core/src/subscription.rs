//! Broadcast subscription owned by one connection.

use chatline_protocol::{ChatCodec, ChatMessage};
use tracing::{debug, warn};

use crate::broker::{Broker, BrokerError, BrokerSubscription};
use crate::error::RelayError;

/// A connection's subscription to one broadcast channel.
///
/// The handle is released by [`Subscription::close`] or, failing that, on
/// drop, so it never outlives the connection that opened it.
pub struct Subscription {
    channel: String,
    handle: Option<Box<dyn BrokerSubscription>>,
    codec: ChatCodec,
}

impl Subscription {
    /// Bind to `channel` on the broker.
    ///
    /// There is no retry: any broker failure is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BrokerUnavailable`] if the broker refuses the
    /// subscription.
    pub async fn open(
        broker: &dyn Broker,
        channel: &str,
        codec: ChatCodec,
    ) -> Result<Self, RelayError> {
        let handle = broker
            .subscribe(channel)
            .await
            .map_err(RelayError::BrokerUnavailable)?;

        debug!(channel = %channel, broker = broker.name(), "Subscription opened");

        Ok(Self {
            channel: channel.to_string(),
            handle: Some(handle),
            codec,
        })
    }

    /// Get the channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Check if the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Take the next message without blocking.
    ///
    /// Broker payloads that do not decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Broker`] if the subscription is closed or the
    /// broker stream has ended.
    pub fn poll(&mut self) -> Result<Option<ChatMessage>, RelayError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(RelayError::Broker(BrokerError::Closed))?;

        loop {
            let Some(payload) = handle.poll().map_err(RelayError::Broker)? else {
                return Ok(None);
            };

            match self.codec.decode_broker(&payload) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Dropping undecodable broker payload");
                }
            }
        }
    }

    /// Release the broker handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            debug!(channel = %self.channel, "Subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}
