//! # chatline-core
//!
//! Broker abstraction and per-connection relay for the Chatline server.
//!
//! - **Broker** - Publish/subscribe medium (in-memory, or Redis with the
//!   `redis` feature)
//! - **Subscription** - A connection's handle on the broadcast channel
//! - **Pump** - Inbound (client to broker) and outbound (broker to client)
//!   message loops
//! - **Relay** - Runs both pumps for one connection and cleans up after them
//! - **Registry** - Live connections, for shutdown broadcast
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│   Broker    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```

pub mod broker;
pub mod error;
pub mod memory;
pub mod pump;
pub mod registry;
pub mod relay;
pub mod subscription;

#[cfg(feature = "redis")]
pub mod redis_broker;

pub use broker::{Broker, BrokerError, BrokerSubscription};
pub use error::RelayError;
pub use memory::MemoryBroker;
pub use pump::{InboundPump, OutboundPump, PumpOutcome, PumpState};
pub use registry::{Registration, Registry};
pub use relay::{Relay, RelayConfig, RelayOutcome, RelayReport};
pub use subscription::Subscription;

#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;
