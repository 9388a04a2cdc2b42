//! The two per-connection pumps.
//!
//! [`InboundPump`] moves client frames onto the broadcast channel.
//! [`OutboundPump`] moves broadcast messages back to the client. Each runs
//! as its own task until it reaches a terminal state.

use bytes::Bytes;
use chatline_protocol::{ChatCodec, ChatMessage};
use chatline_transport::{ClientReader, ClientWriter, ConnectionId, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

use crate::broker::{Broker, BrokerError};
use crate::error::RelayError;
use crate::subscription::Subscription;

/// Default interval between idle subscription polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Writer half shared between the outbound pump and the coordinator.
pub type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn ClientWriter>>>;

/// Subscription shared between the outbound pump and the coordinator.
///
/// Only the outbound pump polls it; the coordinator only closes it.
pub type SharedSubscription = Arc<Mutex<Subscription>>;

/// Lifecycle state of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Moving messages.
    Running,
    /// Stopped normally (client closed, or cancelled by the coordinator).
    Closed,
    /// Stopped on a failure.
    Errored,
}

impl PumpState {
    /// Whether the pump can no longer resume.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, PumpState::Running)
    }
}

/// How a pump finished.
#[derive(Debug)]
pub enum PumpOutcome {
    /// The client went away cleanly.
    Closed,
    /// The pump hit a terminal failure.
    Errored(RelayError),
}

impl PumpOutcome {
    /// The terminal state this outcome corresponds to.
    #[must_use]
    pub fn state(&self) -> PumpState {
        match self {
            PumpOutcome::Closed => PumpState::Closed,
            PumpOutcome::Errored(_) => PumpState::Errored,
        }
    }

    fn from_result(result: Result<(), RelayError>) -> Self {
        match result {
            Ok(()) => PumpOutcome::Closed,
            Err(e) => PumpOutcome::Errored(e),
        }
    }
}

/// Per-connection message counters.
#[derive(Debug, Default)]
pub struct PumpCounters {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl PumpCounters {
    /// Messages published on behalf of the client.
    #[must_use]
    pub fn inbound(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }

    /// Messages delivered to the client.
    #[must_use]
    pub fn outbound(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }
}

/// Reads client frames and publishes them to the broadcast channel.
pub struct InboundPump {
    connection_id: ConnectionId,
    reader: Box<dyn ClientReader>,
    broker: Arc<dyn Broker>,
    channel: String,
    codec: ChatCodec,
    counters: Arc<PumpCounters>,
    state: PumpState,
}

impl InboundPump {
    /// Create a new inbound pump.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        reader: Box<dyn ClientReader>,
        broker: Arc<dyn Broker>,
        channel: impl Into<String>,
        codec: ChatCodec,
        counters: Arc<PumpCounters>,
    ) -> Self {
        Self {
            connection_id,
            reader,
            broker,
            channel: channel.into(),
            codec,
            counters,
            state: PumpState::Running,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Run until the client closes or a failure occurs.
    pub async fn run(mut self) -> PumpOutcome {
        let outcome = PumpOutcome::from_result(self.pump().await);
        self.state = outcome.state();
        debug!(
            connection = %self.connection_id,
            state = ?self.state,
            published = self.counters.inbound(),
            "Inbound pump stopped"
        );
        outcome
    }

    async fn pump(&mut self) -> Result<(), RelayError> {
        loop {
            let Some(frame) = self.reader.recv().await.map_err(RelayError::Transport)? else {
                return Ok(());
            };

            let msg = self
                .codec
                .decode(&frame)
                .map_err(RelayError::InvalidMessageFormat)?;

            let payload = self.codec.encode_broker(&msg).map_err(|e| {
                RelayError::MessagePublishFailed(BrokerError::Publish(e.to_string()))
            })?;

            let recipients = self
                .broker
                .publish(&self.channel, payload)
                .await
                .map_err(RelayError::MessagePublishFailed)?;

            self.counters.inbound.fetch_add(1, Ordering::Relaxed);
            trace!(
                connection = %self.connection_id,
                channel = %self.channel,
                recipients,
                "Published"
            );
        }
    }
}

/// Polls the subscription and writes messages to the client.
pub struct OutboundPump {
    connection_id: ConnectionId,
    writer: SharedWriter,
    subscription: SharedSubscription,
    codec: ChatCodec,
    poll_interval: Duration,
    counters: Arc<PumpCounters>,
    state: PumpState,
}

impl OutboundPump {
    /// Create a new outbound pump.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        writer: SharedWriter,
        subscription: SharedSubscription,
        codec: ChatCodec,
        poll_interval: Duration,
        counters: Arc<PumpCounters>,
    ) -> Self {
        Self {
            connection_id,
            writer,
            subscription,
            codec,
            poll_interval,
            counters,
            state: PumpState::Running,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Run until the client transport closes or a failure occurs.
    pub async fn run(mut self) -> PumpOutcome {
        let outcome = PumpOutcome::from_result(self.pump().await);
        self.state = outcome.state();
        debug!(
            connection = %self.connection_id,
            state = ?self.state,
            delivered = self.counters.outbound(),
            "Outbound pump stopped"
        );
        outcome
    }

    async fn pump(&mut self) -> Result<(), RelayError> {
        loop {
            if !self.writer.lock().await.is_open() {
                return Ok(());
            }

            match self.poll()? {
                Some(msg) => self.deliver(&msg).await?,
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    fn poll(&self) -> Result<Option<ChatMessage>, RelayError> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .poll()
    }

    async fn deliver(&self, msg: &ChatMessage) -> Result<(), RelayError> {
        let data: Bytes = self.codec.encode(msg).map_err(|e| {
            RelayError::MessageDeliveryFailed(TransportError::SendFailed(e.to_string()))
        })?;

        self.writer
            .lock()
            .await
            .send(data)
            .await
            .map_err(RelayError::MessageDeliveryFailed)?;

        self.counters.outbound.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use chatline_protocol::codec;
    use chatline_transport::memory;

    fn shared_writer(writer: Box<dyn ClientWriter>) -> SharedWriter {
        Arc::new(tokio::sync::Mutex::new(writer))
    }

    #[tokio::test]
    async fn test_inbound_publishes_then_closes() {
        let broker = Arc::new(MemoryBroker::new());
        let mut observer = broker.subscribe("chat").await.unwrap();
        let (conn, client) = memory::pair("in-1");
        let (id, reader, _writer) = conn.into_parts();
        let counters = Arc::new(PumpCounters::default());

        let pump = InboundPump::new(
            id,
            reader,
            broker.clone(),
            "chat",
            ChatCodec::default(),
            counters.clone(),
        );
        assert_eq!(pump.state(), PumpState::Running);

        client
            .send_text(r#"{"user_id":"u1","timestamp":1700000000,"message":"hi"}"#)
            .unwrap();
        client.close();

        let outcome = pump.run().await;
        assert_eq!(outcome.state(), PumpState::Closed);
        assert_eq!(counters.inbound(), 1);

        let payload = observer.poll().unwrap().unwrap();
        let msg = codec::decode_broker(&payload).unwrap();
        assert_eq!(msg, ChatMessage::new("u1", 1_700_000_000, "hi").unwrap());
    }

    #[tokio::test]
    async fn test_inbound_malformed_is_terminal() {
        let broker = Arc::new(MemoryBroker::new());
        let mut observer = broker.subscribe("chat").await.unwrap();
        let (conn, client) = memory::pair("in-2");
        let (id, reader, _writer) = conn.into_parts();

        client.send_text(r#"{"user_id":"u1","message":"hi"}"#).unwrap();
        client
            .send_text(r#"{"user_id":"u1","timestamp":1,"message":"never read"}"#)
            .unwrap();

        let pump = InboundPump::new(
            id,
            reader,
            broker.clone(),
            "chat",
            ChatCodec::default(),
            Arc::new(PumpCounters::default()),
        );

        match pump.run().await {
            PumpOutcome::Errored(RelayError::InvalidMessageFormat(_)) => {}
            other => panic!("Expected InvalidMessageFormat, got {:?}", other),
        }
        assert!(observer.poll().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inbound_transport_failure() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let (conn, client) = memory::pair("in-3");
        let (id, reader, _writer) = conn.into_parts();
        client.inject_error("reset");

        let pump = InboundPump::new(
            id,
            reader,
            broker,
            "chat",
            ChatCodec::default(),
            Arc::new(PumpCounters::default()),
        );

        assert!(matches!(
            pump.run().await,
            PumpOutcome::Errored(RelayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_outbound_delivers_broadcast_messages() {
        let broker = Arc::new(MemoryBroker::new());
        let (conn, mut client) = memory::pair("out-1");
        let (id, _reader, writer) = conn.into_parts();
        let writer = shared_writer(writer);
        let subscription = Arc::new(Mutex::new(
            Subscription::open(broker.as_ref(), "chat", ChatCodec::default())
                .await
                .unwrap(),
        ));
        let counters = Arc::new(PumpCounters::default());

        let pump = OutboundPump::new(
            id,
            writer.clone(),
            subscription,
            ChatCodec::default(),
            DEFAULT_POLL_INTERVAL,
            counters.clone(),
        );
        let task = tokio::spawn(pump.run());

        let msg = ChatMessage::new("u2", 42, "hello").unwrap();
        broker
            .publish("chat", codec::encode_broker(&msg).unwrap())
            .await
            .unwrap();

        let frame = client.recv().await.unwrap();
        assert_eq!(&frame[..], br#"{"from":"u2","date":42,"message":"hello"}"#);

        writer.lock().await.close().await.unwrap();
        let outcome = task.await.unwrap();
        assert_eq!(outcome.state(), PumpState::Closed);
        assert_eq!(counters.outbound(), 1);
    }

    #[tokio::test]
    async fn test_outbound_write_failure() {
        let broker = Arc::new(MemoryBroker::new());
        let (conn, mut client) = memory::pair("out-2");
        let (id, _reader, writer) = conn.into_parts();
        let subscription = Arc::new(Mutex::new(
            Subscription::open(broker.as_ref(), "chat", ChatCodec::default())
                .await
                .unwrap(),
        ));
        client.stop_reading();

        let msg = ChatMessage::new("u2", 42, "hello").unwrap();
        broker
            .publish("chat", codec::encode_broker(&msg).unwrap())
            .await
            .unwrap();

        let pump = OutboundPump::new(
            id,
            shared_writer(writer),
            subscription,
            ChatCodec::default(),
            DEFAULT_POLL_INTERVAL,
            Arc::new(PumpCounters::default()),
        );

        assert!(matches!(
            pump.run().await,
            PumpOutcome::Errored(RelayError::MessageDeliveryFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_outbound_closed_subscription_is_broker_error() {
        let broker = Arc::new(MemoryBroker::new());
        let (conn, _client) = memory::pair("out-3");
        let (id, _reader, writer) = conn.into_parts();
        let mut subscription = Subscription::open(broker.as_ref(), "chat", ChatCodec::default())
            .await
            .unwrap();
        subscription.close();

        let pump = OutboundPump::new(
            id,
            shared_writer(writer),
            Arc::new(Mutex::new(subscription)),
            ChatCodec::default(),
            DEFAULT_POLL_INTERVAL,
            Arc::new(PumpCounters::default()),
        );

        assert!(matches!(
            pump.run().await,
            PumpOutcome::Errored(RelayError::Broker(BrokerError::Closed))
        ));
    }

    #[test]
    fn test_pump_state_terminal() {
        assert!(!PumpState::Running.is_terminal());
        assert!(PumpState::Closed.is_terminal());
        assert!(PumpState::Errored.is_terminal());
    }
}
