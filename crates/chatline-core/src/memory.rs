//! In-process broker backed by tokio broadcast channels.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, trace, warn};

use crate::broker::{validate_channel_name, Broker, BrokerError, BrokerSubscription};

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type Channels = Arc<DashMap<String, broadcast::Sender<Bytes>>>;

/// A broker living inside the process.
///
/// Channels are created on first subscribe and removed once their last
/// subscription closes. Publishing to a channel nobody listens on is a
/// successful no-op, like Redis `PUBLISH`.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    channels: Channels,
    capacity: usize,
}

impl MemoryBroker {
    /// Create a broker with the default per-channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broker with a specific per-channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        debug!(capacity, "Creating memory broker");
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Get the number of open subscriptions on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Get the number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;

        let count = match self.channels.get(channel) {
            Some(tx) => tx.send(payload).unwrap_or_default(),
            None => 0,
        };
        trace!(channel = %channel, recipients = count, "Published message");
        Ok(count)
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;

        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel, "Creating new channel");
                broadcast::channel(self.capacity).0
            })
            .subscribe();

        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx: Some(rx),
            channels: Arc::clone(&self.channels),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Subscription handle for [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySubscription {
    channel: String,
    rx: Option<broadcast::Receiver<Bytes>>,
    channels: Channels,
}

impl BrokerSubscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn poll(&mut self) -> Result<Option<Bytes>, BrokerError> {
        let rx = self.rx.as_mut().ok_or(BrokerError::Closed)?;
        loop {
            match rx.try_recv() {
                Ok(payload) => return Ok(Some(payload)),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, skipping ahead");
                }
                Err(TryRecvError::Closed) => return Err(BrokerError::Closed),
            }
        }
    }

    fn close(&mut self) {
        let Some(rx) = self.rx.take() else {
            return;
        };
        drop(rx);

        // Auto-delete empty channels
        let removed = self
            .channels
            .remove_if(&self.channel, |_, tx| tx.receiver_count() == 0)
            .is_some();
        if removed {
            debug!(channel = %self.channel, "Deleted empty channel");
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.close();
    }
}
