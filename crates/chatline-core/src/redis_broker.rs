//! Redis pub/sub broker.
//!
//! Publishes go through one shared multiplexed connection. Each
//! subscription gets its own pub/sub connection whose message stream is
//! forwarded into a bounded channel by a background task, so [`poll`] never
//! blocks. A subscriber that falls a full channel behind loses messages
//! rather than growing the queue.
//!
//! [`poll`]: crate::broker::BrokerSubscription::poll

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{validate_channel_name, Broker, BrokerError, BrokerSubscription};
use crate::memory::DEFAULT_CHANNEL_CAPACITY;

/// Broker backed by a Redis server.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    capacity: usize,
}

impl RedisBroker {
    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        Self::connect_with_capacity(url, DEFAULT_CHANNEL_CAPACITY).await
    }

    /// Connect, buffering at most `capacity` undelivered messages per
    /// subscription.
    ///
    /// # Errors
    ///
    /// Same as [`RedisBroker::connect`].
    pub async fn connect_with_capacity(url: &str, capacity: usize) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)
            .map_err(|e| BrokerError::Unavailable(format!("invalid redis url: {e}")))?;

        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        info!(url = %url, capacity, "Connected to Redis");
        Ok(Self {
            client,
            conn,
            capacity: capacity.max(1),
        })
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;

        let mut conn = self.conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload.as_ref())
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(usize::try_from(receivers).unwrap_or_default())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<Vec<u8>>() {
                    Ok(payload) => {
                        if !forward(&tx, &name, Bytes::from(payload)) {
                            break;
                        }
                    }
                    Err(e) => warn!(channel = %name, error = %e, "Unreadable Redis payload"),
                }
            }
            debug!(channel = %name, "Redis message stream ended");
        });

        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            rx: Some(rx),
            forwarder: Some(forwarder),
        }))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Hand a payload to the subscriber. Returns `false` once the subscriber is
/// gone.
fn forward(tx: &mpsc::Sender<Bytes>, channel: &str, payload: Bytes) -> bool {
    match tx.try_send(payload) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(channel = %channel, "Subscriber lagging, dropping message");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// A subscription on a Redis channel.
pub struct RedisSubscription {
    channel: String,
    rx: Option<mpsc::Receiver<Bytes>>,
    forwarder: Option<JoinHandle<()>>,
}

impl BrokerSubscription for RedisSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn poll(&mut self) -> Result<Option<Bytes>, BrokerError> {
        let rx = self.rx.as_mut().ok_or(BrokerError::Closed)?;
        match rx.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(BrokerError::Closed),
        }
    }

    fn close(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.rx.take();
    }
}

impl Drop for RedisSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
