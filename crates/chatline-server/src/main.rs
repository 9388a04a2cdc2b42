//! # Chatline Server
//!
//! Broadcast chat relay over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chatline
//!
//! # Run with environment variables
//! CHATLINE_PORT=8080 CHATLINE_HOST=0.0.0.0 chatline
//!
//! # Override any config key
//! CHATLINE__BROKER__KIND=redis CHATLINE__RELAY__CHANNEL=lobby chatline
//!
//! # Fixed worker pool
//! CHATLINE__WORKERS=4 chatline
//! ```

mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.thread_name("chatline-worker").enable_all();
    if let Some(workers) = config.worker_threads() {
        runtime.worker_threads(workers);
    }
    let runtime = runtime.build().context("Failed to build runtime")?;

    tracing::info!(
        broker = ?config.broker.kind,
        sessions = ?config.session.backend,
        channel = %config.relay.channel,
        workers = config.worker_threads().unwrap_or_default(),
        "Starting Chatline server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    runtime.block_on(handlers::run_server(config))
}
