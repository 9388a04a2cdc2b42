//! HTTP and WebSocket handlers for the Chatline server.
//!
//! Every upgraded WebSocket is handed to the shared [`Relay`], which owns
//! the connection until it ends.

use crate::config::{BrokerConfig, BrokerKind, Config, SessionBackendKind};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::session::SessionStore;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chatline_core::{Broker, MemoryBroker, Registry, Relay};
use chatline_transport::{accept_websocket, ConnectionId};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Session key holding the client's public session id.
const SESSION_ID_KEY: &str = "session_id";

/// Shared server state.
pub struct AppState {
    /// Per-connection relay.
    pub relay: Relay,
    /// Session storage.
    pub sessions: SessionStore,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state around a broker, with in-memory sessions.
    #[must_use]
    pub fn new(config: Config, broker: Arc<dyn Broker>) -> Self {
        let sessions = SessionStore::new(
            config.session.cookie_name.clone(),
            Duration::from_secs(config.session.max_age_secs),
        );
        Self::with_sessions(config, broker, sessions)
    }

    /// Create new app state around a broker and session store.
    #[must_use]
    pub fn with_sessions(config: Config, broker: Arc<dyn Broker>, sessions: SessionStore) -> Self {
        let relay = Relay::new(broker, Registry::new(), config.relay_config());

        Self {
            relay,
            sessions,
            config,
        }
    }
}

/// Build the configured broker.
///
/// # Errors
///
/// Returns an error if the broker cannot be reached, or Redis is configured
/// but the server was built without the `redis` feature.
pub async fn build_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    match config.kind {
        BrokerKind::Memory => Ok(Arc::new(MemoryBroker::with_capacity(config.capacity))),
        #[cfg(feature = "redis")]
        BrokerKind::Redis => {
            let broker =
                chatline_core::RedisBroker::connect_with_capacity(&config.redis_url, config.capacity)
                    .await
                    .with_context(|| format!("Failed to connect to {}", config.redis_url))?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        BrokerKind::Redis => {
            anyhow::bail!("Redis broker requested but chatline was built without the `redis` feature")
        }
    }
}

/// Build the configured session store.
///
/// # Errors
///
/// Returns an error if Redis sessions are configured but Redis cannot be
/// reached, or the server was built without the `redis` feature.
pub async fn build_sessions(config: &Config) -> Result<SessionStore> {
    let cookie_name = config.session.cookie_name.clone();
    let max_age = Duration::from_secs(config.session.max_age_secs);

    match config.session.backend {
        SessionBackendKind::Memory => Ok(SessionStore::new(cookie_name, max_age)),
        #[cfg(feature = "redis")]
        SessionBackendKind::Redis => {
            let backend = crate::session::RedisSessions::connect(&config.broker.redis_url)
                .await
                .with_context(|| format!("Failed to connect to {}", config.broker.redis_url))?;
            Ok(SessionStore::with_backend(
                Arc::new(backend),
                cookie_name,
                max_age,
            ))
        }
        #[cfg(not(feature = "redis"))]
        SessionBackendKind::Redis => {
            anyhow::bail!("Redis sessions requested but chatline was built without the `redis` feature")
        }
    }
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the broker is unreachable or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let broker = build_broker(&config.broker).await?;
    let sessions = build_sessions(&config).await?;
    let state = Arc::new(AppState::with_sessions(config.clone(), broker, sessions));

    let sessions = state.sessions.clone();
    let purge_every = Duration::from_secs(config.session.max_age_secs.max(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                debug!(purged, "Purged expired sessions");
            }
        }
    });

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Chatline server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves, then tell every live
/// relay to wind down.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let registry = state.relay.registry().clone();
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        let notified = registry.broadcast_shutdown();
        info!(connections = notified, "Shutting down");
    })
    .await?;

    Ok(())
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/session", get(session_handler))
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Entry page.
async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Return the caller's session id, issuing one on first visit.
async fn session_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let mut session = match state.sessions.get_or_create(&headers).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to load session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session_id = match session.get_str(SESSION_ID_KEY) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            session.insert(SESSION_ID_KEY, id.clone());
            metrics::record_session();
            debug!(session = %id, "Issued session");
            id
        }
    };

    let mut response_headers = HeaderMap::new();
    if let Err(e) = state.sessions.save(&session, &mut response_headers).await {
        error!(error = %e, "Failed to save session");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        response_headers,
        Json(serde_json::json!({ "sessionId": session_id })),
    )
        .into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = session_id(&state.sessions, &headers).await;
    ws.on_upgrade(move |socket| handle_websocket(socket, addr, session_id, state))
}

/// The caller's public session id, if it has one. Used only to attribute
/// relay logs, so lookup failures are not fatal.
async fn session_id(sessions: &SessionStore, headers: &HeaderMap) -> Option<String> {
    match sessions.load(headers).await {
        Ok(session) => session.and_then(|s| s.get_str(SESSION_ID_KEY).map(str::to_string)),
        Err(e) => {
            warn!(error = %e, "Failed to load session for WebSocket");
            None
        }
    }
}

/// Relay a WebSocket connection until it ends.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    session_id: Option<String>,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let started = Instant::now();

    let connection =
        accept_websocket(socket, ConnectionId::generate()).with_remote_addr(addr.to_string());
    let span = info_span!(
        "relay",
        session = session_id.as_deref().unwrap_or("anonymous")
    );
    debug!(parent: &span, connection = %connection.id(), remote = %addr, "WebSocket connected");

    let report = state.relay.run(connection).instrument(span).await;
    metrics::record_relay(&report, started.elapsed().as_secs_f64());
}
