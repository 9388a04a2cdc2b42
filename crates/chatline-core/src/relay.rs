//! Per-connection relay coordinator.
//!
//! A [`Relay`] owns the lifecycle of one client connection: it opens the
//! broadcast subscription, runs the inbound and outbound pumps as separate
//! tasks, stops both as soon as either one finishes, and then releases
//! every resource the connection held.
//!
//! ```text
//!            ┌──────────────┐   publish   ┌──────────┐
//!  client ──▶│ InboundPump  │────────────▶│          │
//!            └──────────────┘             │  Broker  │
//!            ┌──────────────┐    poll     │          │
//!  client ◀──│ OutboundPump │◀────────────│          │
//!            └──────────────┘             └──────────┘
//! ```

use chatline_protocol::{codec, ChatCodec, ServerFrame, DEFAULT_MAX_MESSAGE_SIZE};
use chatline_transport::{ClientConnection, ConnectionId};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::error::RelayError;
use crate::pump::{
    InboundPump, OutboundPump, PumpCounters, PumpOutcome, PumpState, SharedSubscription,
    SharedWriter, DEFAULT_POLL_INTERVAL,
};
use crate::registry::Registry;
use crate::subscription::Subscription;

/// Default channel every connection joins.
pub const DEFAULT_CHANNEL: &str = "chat";

/// Default time a cancelled pump gets to stop before cleanup proceeds.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Broadcast channel name.
    pub channel: String,
    /// Idle interval between subscription polls.
    pub poll_interval: Duration,
    /// Bound on waiting for a cancelled pump, and on any cleanup step that
    /// needs the client writer.
    pub cancel_grace: Duration,
    /// Largest accepted client frame in bytes.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// How a relay ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The client closed the connection.
    Closed,
    /// A pump failed, or the subscription could not be opened.
    Errored(RelayError),
    /// The server asked every connection to shut down.
    Shutdown,
}

impl RelayOutcome {
    /// The error, if the relay failed.
    #[must_use]
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            RelayOutcome::Errored(e) => Some(e),
            _ => None,
        }
    }
}

/// Summary of a finished relay.
#[derive(Debug)]
pub struct RelayReport {
    /// The connection that was relayed.
    pub connection_id: ConnectionId,
    /// How it ended.
    pub outcome: RelayOutcome,
    /// Final state of the inbound pump.
    pub inbound: PumpState,
    /// Final state of the outbound pump.
    pub outbound: PumpState,
    /// Messages published for the client.
    pub messages_in: u64,
    /// Messages delivered to the client.
    pub messages_out: u64,
    /// Whether a terminal error frame reached the client.
    pub error_frame_sent: bool,
}

/// Which pump finished first.
enum Finished {
    Inbound(Result<PumpOutcome, JoinError>),
    Outbound(Result<PumpOutcome, JoinError>),
    Shutdown,
}

/// Relays client connections through a broker.
///
/// Cheap to clone; one instance is shared by every connection.
#[derive(Clone)]
pub struct Relay {
    broker: Arc<dyn Broker>,
    registry: Registry,
    config: RelayConfig,
    codec: ChatCodec,
}

impl Relay {
    /// Create a new relay.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, registry: Registry, config: RelayConfig) -> Self {
        let codec = ChatCodec::new(config.max_message_size);
        Self {
            broker,
            registry,
            config,
            codec,
        }
    }

    /// The connection registry this relay registers into.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay one connection until it ends, then release everything it held.
    pub async fn run(&self, connection: ClientConnection) -> RelayReport {
        let remote_addr = connection.remote_addr().map(str::to_string);
        let (id, reader, writer) = connection.into_parts();
        let registration = self.registry.register(id.clone());
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

        info!(
            connection = %id,
            remote = remote_addr.as_deref().unwrap_or("unknown"),
            channel = %self.config.channel,
            "Relay started"
        );

        let subscription =
            match Subscription::open(self.broker.as_ref(), &self.config.channel, self.codec).await
            {
                Ok(subscription) => Arc::new(Mutex::new(subscription)),
                Err(e) => {
                    error!(connection = %id, error = %e, "Failed to open subscription");
                    let error_frame_sent = self.send_error_frame(&id, &writer, &e).await;
                    drop(registration);
                    self.close_writer(&id, &writer).await;
                    return RelayReport {
                        connection_id: id,
                        outcome: RelayOutcome::Errored(e),
                        inbound: PumpState::Closed,
                        outbound: PumpState::Closed,
                        messages_in: 0,
                        messages_out: 0,
                        error_frame_sent,
                    };
                }
            };

        let counters = Arc::new(PumpCounters::default());
        let inbound = InboundPump::new(
            id.clone(),
            reader,
            Arc::clone(&self.broker),
            self.config.channel.clone(),
            self.codec,
            Arc::clone(&counters),
        );
        let outbound = OutboundPump::new(
            id.clone(),
            Arc::clone(&writer),
            Arc::clone(&subscription),
            self.codec,
            self.config.poll_interval,
            Arc::clone(&counters),
        );

        let mut inbound_task = tokio::spawn(inbound.run());
        let mut outbound_task = tokio::spawn(outbound.run());

        let finished = tokio::select! {
            result = &mut inbound_task => Finished::Inbound(result),
            result = &mut outbound_task => Finished::Outbound(result),
            () = registration.shutdown_requested() => Finished::Shutdown,
        };

        let (inbound, outbound, shutdown) = match finished {
            Finished::Inbound(result) => {
                let inbound = flatten(result);
                debug!(connection = %id, state = ?inbound.state(), "Inbound pump finished first");
                let outbound = self.cancel(&id, "outbound", outbound_task).await;
                (Some(inbound), outbound, false)
            }
            Finished::Outbound(result) => {
                let outbound = flatten(result);
                debug!(connection = %id, state = ?outbound.state(), "Outbound pump finished first");
                let inbound = self.cancel(&id, "inbound", inbound_task).await;
                (inbound, Some(outbound), false)
            }
            Finished::Shutdown => {
                info!(connection = %id, "Shutdown requested");
                let inbound = self.cancel(&id, "inbound", inbound_task).await;
                let outbound = self.cancel(&id, "outbound", outbound_task).await;
                (inbound, outbound, true)
            }
        };

        let inbound_state = inbound.as_ref().map_or(PumpState::Closed, PumpOutcome::state);
        let outbound_state = outbound.as_ref().map_or(PumpState::Closed, PumpOutcome::state);

        let outcome = match (inbound, outbound) {
            (Some(PumpOutcome::Errored(e)), _) | (_, Some(PumpOutcome::Errored(e))) => {
                RelayOutcome::Errored(e)
            }
            _ if shutdown => RelayOutcome::Shutdown,
            _ => RelayOutcome::Closed,
        };

        let error_frame_sent = match outcome.error() {
            Some(e) => {
                warn!(
                    connection = %id,
                    category = e.category(),
                    error = %e,
                    "Relay terminated with error"
                );
                self.send_error_frame(&id, &writer, e).await
            }
            None => false,
        };

        // Release order: subscription, registry entry, transport. None of
        // these may be skipped because an earlier step failed.
        close_subscription(&id, &subscription);
        drop(registration);
        self.close_writer(&id, &writer).await;

        let report = RelayReport {
            connection_id: id,
            outcome,
            inbound: inbound_state,
            outbound: outbound_state,
            messages_in: counters.inbound(),
            messages_out: counters.outbound(),
            error_frame_sent,
        };

        info!(
            connection = %report.connection_id,
            outcome = ?report.outcome,
            messages_in = report.messages_in,
            messages_out = report.messages_out,
            "Relay finished"
        );
        report
    }

    /// Abort a still-running pump and wait a bounded time for it to stop.
    ///
    /// Returns the pump's outcome if it finished on its own before the abort
    /// landed, or `None` if it was cancelled or did not stop in time.
    async fn cancel(
        &self,
        id: &ConnectionId,
        pump: &'static str,
        mut task: JoinHandle<PumpOutcome>,
    ) -> Option<PumpOutcome> {
        task.abort();

        match tokio::time::timeout(self.config.cancel_grace, &mut task).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) if e.is_cancelled() => {
                debug!(connection = %id, pump, "Pump cancelled");
                None
            }
            Ok(Err(e)) => Some(flatten(Err(e))),
            Err(_) => {
                warn!(
                    connection = %id,
                    pump,
                    grace = ?self.config.cancel_grace,
                    "Pump did not stop within grace period, continuing cleanup"
                );
                None
            }
        }
    }

    /// Send the single terminal error frame. Never fails the caller.
    async fn send_error_frame(
        &self,
        id: &ConnectionId,
        writer: &SharedWriter,
        err: &RelayError,
    ) -> bool {
        let frame = ServerFrame::error(err.client_message());
        let data = match codec::encode_frame(&frame) {
            Ok(data) => data,
            Err(e) => {
                warn!(connection = %id, error = %e, "Failed to encode error frame");
                return false;
            }
        };

        let Ok(mut writer) = tokio::time::timeout(self.config.cancel_grace, writer.lock()).await
        else {
            warn!(connection = %id, "Writer busy, skipping error frame");
            return false;
        };

        if !writer.is_open() {
            debug!(connection = %id, "Client already gone, skipping error frame");
            return false;
        }

        match writer.send(data).await {
            Ok(()) => true,
            Err(e) => {
                debug!(connection = %id, error = %e, "Failed to send error frame");
                false
            }
        }
    }

    async fn close_writer(&self, id: &ConnectionId, writer: &SharedWriter) {
        let Ok(mut writer) = tokio::time::timeout(self.config.cancel_grace, writer.lock()).await
        else {
            warn!(connection = %id, "Writer busy, abandoning close");
            return;
        };

        if let Err(e) = writer.close().await {
            debug!(connection = %id, error = %e, "Error closing connection");
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("broker", &self.broker.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn flatten(result: Result<PumpOutcome, JoinError>) -> PumpOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) => PumpOutcome::Errored(RelayError::Unexpected(e.to_string())),
    }
}

/// Close the subscription without waiting on a pump that outlived its grace
/// period. A pump stuck inside `poll` holds the lock; the subscription then
/// closes on drop once that pump releases its handle.
fn close_subscription(id: &ConnectionId, subscription: &SharedSubscription) {
    match subscription.try_lock() {
        Ok(mut subscription) => subscription.close(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close(),
        Err(TryLockError::WouldBlock) => {
            warn!(connection = %id, "Subscription busy, deferring close to drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, BrokerSubscription};
    use crate::memory::MemoryBroker;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chatline_transport::memory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn relay_with(broker: Arc<dyn Broker>) -> Relay {
        Relay::new(broker, Registry::new(), RelayConfig::default())
    }

    /// Subscription wrapper that counts `close` calls.
    struct CountingSubscription {
        inner: Box<dyn BrokerSubscription>,
        closes: Arc<AtomicUsize>,
    }

    impl BrokerSubscription for CountingSubscription {
        fn channel(&self) -> &str {
            self.inner.channel()
        }

        fn poll(&mut self) -> Result<Option<Bytes>, BrokerError> {
            self.inner.poll()
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close();
        }
    }

    /// Subscribes normally but rejects every publish.
    struct RejectingBroker {
        inner: MemoryBroker,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Broker for RejectingBroker {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<usize, BrokerError> {
            Err(BrokerError::Publish("connection reset".into()))
        }

        async fn subscribe(
            &self,
            channel: &str,
        ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
            Ok(Box::new(CountingSubscription {
                inner: self.inner.subscribe(channel).await?,
                closes: self.closes.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    struct DownBroker;

    #[async_trait]
    impl Broker for DownBroker {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<usize, BrokerError> {
            Err(BrokerError::Unavailable("connection refused".into()))
        }

        async fn subscribe(
            &self,
            _channel: &str,
        ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
            Err(BrokerError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    struct PanickingSubscription;

    impl BrokerSubscription for PanickingSubscription {
        fn channel(&self) -> &str {
            "chat"
        }

        fn poll(&mut self) -> Result<Option<Bytes>, BrokerError> {
            panic!("poll exploded");
        }

        fn close(&mut self) {}
    }

    struct PanickingBroker;

    #[async_trait]
    impl Broker for PanickingBroker {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<usize, BrokerError> {
            Ok(0)
        }

        async fn subscribe(
            &self,
            _channel: &str,
        ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
            Ok(Box::new(PanickingSubscription))
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    /// Blocks the polling thread, as a wedged client library would.
    struct StallingSubscription {
        stall: Duration,
        entered: Arc<AtomicUsize>,
    }

    impl BrokerSubscription for StallingSubscription {
        fn channel(&self) -> &str {
            "chat"
        }

        fn poll(&mut self) -> Result<Option<Bytes>, BrokerError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.stall);
            Ok(None)
        }

        fn close(&mut self) {}
    }

    struct StallingBroker {
        stall: Duration,
        entered: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Broker for StallingBroker {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<usize, BrokerError> {
            Ok(0)
        }

        async fn subscribe(
            &self,
            _channel: &str,
        ) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
            Ok(Box::new(CountingSubscription {
                inner: Box::new(StallingSubscription {
                    stall: self.stall,
                    entered: self.entered.clone(),
                }),
                closes: self.closes.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "stalling"
        }
    }

    #[tokio::test]
    async fn test_two_clients_see_each_others_messages() {
        let broker = Arc::new(MemoryBroker::new());
        let relay = relay_with(broker.clone());

        let (conn_a, mut alice) = memory::pair("alice");
        let (conn_b, mut bob) = memory::pair("bob");
        let task_a = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(conn_a).await }
        });
        let task_b = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(conn_b).await }
        });

        wait_for(|| broker.subscriber_count("chat") == 2).await;
        assert_eq!(relay.registry().len(), 2);

        alice
            .send_text(r#"{"user_id":"alice","timestamp":1700000000,"message":"hi bob"}"#)
            .unwrap();

        let expected: &[u8] = br#"{"from":"alice","date":1700000000,"message":"hi bob"}"#;
        let to_bob = tokio::time::timeout(WAIT, bob.recv()).await.unwrap().unwrap();
        let to_alice = tokio::time::timeout(WAIT, alice.recv()).await.unwrap().unwrap();
        assert_eq!(&to_bob[..], expected);
        assert_eq!(&to_alice[..], expected);

        alice.close();
        bob.close();

        let report_a = task_a.await.unwrap();
        let report_b = task_b.await.unwrap();
        assert!(matches!(report_a.outcome, RelayOutcome::Closed));
        assert!(matches!(report_b.outcome, RelayOutcome::Closed));
        assert_eq!(report_a.messages_in, 1);
        assert_eq!(report_b.messages_in, 0);
        assert_eq!(report_b.messages_out, 1);
        assert!(!report_a.error_frame_sent);

        assert!(relay.registry().is_empty());
        assert!(!broker.channel_exists("chat"));
    }

    #[tokio::test]
    async fn test_idle_client_close_releases_everything() {
        let broker = Arc::new(MemoryBroker::new());
        let relay = relay_with(broker.clone());
        let (conn, mut client) = memory::pair("idle");

        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(conn).await }
        });
        wait_for(|| broker.subscriber_count("chat") == 1).await;

        client.close();
        let report = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert!(matches!(report.outcome, RelayOutcome::Closed));
        assert!(!report.error_frame_sent);
        assert!(report.inbound.is_terminal());
        assert!(report.outbound.is_terminal());
        assert!(client.recv().await.is_none());
        assert_eq!(broker.subscriber_count("chat"), 0);
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_one_error_frame() {
        let broker = Arc::new(MemoryBroker::new());
        let mut observer = broker.subscribe("chat").await.unwrap();
        let relay = relay_with(broker.clone());
        let (conn, mut client) = memory::pair("bad");

        client.send_text(r#"{"user_id":"u1","message":"no timestamp"}"#).unwrap();
        let report = tokio::time::timeout(WAIT, relay.run(conn)).await.unwrap();

        assert!(matches!(
            report.outcome,
            RelayOutcome::Errored(RelayError::InvalidMessageFormat(_))
        ));
        assert_eq!(report.inbound, PumpState::Errored);
        assert!(report.error_frame_sent);

        let frame = client.recv().await.unwrap();
        assert_eq!(&frame[..], br#"{"error":"Invalid message format"}"#);
        assert!(client.recv().await.is_none());
        assert!(observer.poll().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_cancels_outbound_and_closes_subscription_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let broker = Arc::new(RejectingBroker {
            inner: MemoryBroker::new(),
            closes: closes.clone(),
        });
        let relay = relay_with(broker.clone());
        let (conn, mut client) = memory::pair("pub-fail");

        client
            .send_text(r#"{"user_id":"u1","timestamp":5,"message":"lost"}"#)
            .unwrap();

        let started = tokio::time::Instant::now();
        let report = tokio::time::timeout(WAIT, relay.run(conn)).await.unwrap();
        assert!(started.elapsed() < WAIT);

        assert!(matches!(
            report.outcome,
            RelayOutcome::Errored(RelayError::MessagePublishFailed(_))
        ));
        assert_eq!(report.inbound, PumpState::Errored);
        assert_eq!(report.outbound, PumpState::Closed);
        assert_eq!(report.messages_in, 0);

        let frame = client.recv().await.unwrap();
        assert_eq!(&frame[..], br#"{"error":"Failed to publish message"}"#);
        assert!(client.recv().await.is_none());

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!broker.inner.channel_exists("chat"));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn test_broker_unavailable_at_open() {
        let relay = relay_with(Arc::new(DownBroker));
        let (conn, mut client) = memory::pair("down");

        let report = tokio::time::timeout(WAIT, relay.run(conn)).await.unwrap();

        assert!(matches!(
            report.outcome,
            RelayOutcome::Errored(RelayError::BrokerUnavailable(_))
        ));
        assert!(report.error_frame_sent);
        let frame = client.recv().await.unwrap();
        assert_eq!(&frame[..], br#"{"error":"Message broker unavailable"}"#);
        assert!(client.recv().await.is_none());
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_broadcast_ends_relay_without_error_frame() {
        let broker = Arc::new(MemoryBroker::new());
        let relay = relay_with(broker.clone());
        let (conn, mut client) = memory::pair("shutdown");

        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(conn).await }
        });
        wait_for(|| broker.subscriber_count("chat") == 1).await;

        assert_eq!(relay.registry().broadcast_shutdown(), 1);
        let report = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert!(matches!(report.outcome, RelayOutcome::Shutdown));
        assert!(!report.error_frame_sent);
        assert!(client.recv().await.is_none());
        assert_eq!(broker.subscriber_count("chat"), 0);
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_pump_is_unexpected_error() {
        let relay = relay_with(Arc::new(PanickingBroker));
        let (conn, mut client) = memory::pair("panic");

        let report = tokio::time::timeout(WAIT, relay.run(conn)).await.unwrap();

        assert!(matches!(
            report.outcome,
            RelayOutcome::Errored(RelayError::Unexpected(_))
        ));
        assert_eq!(report.outbound, PumpState::Errored);
        let frame = client.recv().await.unwrap();
        assert_eq!(
            &frame[..],
            br#"{"error":"An unexpected server error occurred"}"#
        );
        assert!(relay.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stuck_pump_does_not_hold_up_cleanup() {
        let entered = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let broker = Arc::new(StallingBroker {
            stall: Duration::from_secs(2),
            entered: entered.clone(),
            closes: closes.clone(),
        });
        let config = RelayConfig {
            cancel_grace: Duration::from_millis(100),
            ..RelayConfig::default()
        };
        let relay = Relay::new(broker, Registry::new(), config);
        let (conn, mut client) = memory::pair("stuck");

        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(conn).await }
        });
        wait_for(|| entered.load(Ordering::SeqCst) > 0).await;

        client.close();
        let started = std::time::Instant::now();
        let report = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(matches!(report.outcome, RelayOutcome::Closed));
        assert!(relay.registry().is_empty());
        assert!(client.recv().await.is_none());

        // The close is deferred until the stuck poll returns and the pump
        // drops its handle.
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        wait_for(|| closes.load(Ordering::SeqCst) == 1).await;
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.channel, "chat");
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.cancel_grace, Duration::from_secs(1));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }
}
