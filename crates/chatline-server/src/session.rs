//! Cookie-keyed session store.
//!
//! The cookie carries only an opaque storage key; session data stays on
//! the server and expires after the configured lifetime. Data lives in a
//! [`SessionBackend`]: in process by default, or in Redis so that several
//! servers share sessions.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configured cookie name or key cannot appear in a header.
    #[error("Invalid session cookie: {0}")]
    InvalidCookie(String),

    /// The session backend failed.
    #[error("Session backend error: {0}")]
    Backend(String),
}

/// A client session.
#[derive(Debug, Clone)]
pub struct Session {
    key: String,
    values: Map<String, Value>,
    is_new: bool,
}

impl Session {
    /// Storage key sent to the client in the cookie.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the session was created by this request.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Get a value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get a string value.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Set a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }
}

/// Where session data is kept.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Load the values stored under `key`, if present and not expired.
    async fn load(&self, key: &str) -> Result<Option<Map<String, Value>>, SessionError>;

    /// Store `values` under `key` for `max_age`.
    async fn store(
        &self,
        key: &str,
        values: &Map<String, Value>,
        max_age: Duration,
    ) -> Result<(), SessionError>;

    /// Drop expired sessions. Returns how many were removed.
    fn purge_expired(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct StoredSession {
    values: Map<String, Value>,
    expires_at: Instant,
}

/// In-process session storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySessions {
    sessions: Arc<DashMap<String, StoredSession>>,
}

impl MemorySessions {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionBackend for MemorySessions {
    async fn load(&self, key: &str) -> Result<Option<Map<String, Value>>, SessionError> {
        let now = Instant::now();
        if let Some(stored) = self.sessions.get(key) {
            if stored.expires_at > now {
                return Ok(Some(stored.values.clone()));
            }
        }
        if self
            .sessions
            .remove_if(key, |_, stored| stored.expires_at <= now)
            .is_some()
        {
            debug!("Session expired");
        }
        Ok(None)
    }

    async fn store(
        &self,
        key: &str,
        values: &Map<String, Value>,
        max_age: Duration,
    ) -> Result<(), SessionError> {
        self.sessions.insert(
            key.to_string(),
            StoredSession {
                values: values.clone(),
                expires_at: Instant::now() + max_age,
            },
        );
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let before = self.len();
        let now = Instant::now();
        self.sessions.retain(|_, stored| stored.expires_at > now);
        before.saturating_sub(self.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis session storage. Values are JSON strings under
/// `chatline:session:<key>`, expired by Redis itself.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisSessions {
    conn: redis::aio::MultiplexedConnection,
}

#[cfg(feature = "redis")]
impl RedisSessions {
    const KEY_PREFIX: &'static str = "chatline:session:";

    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backend`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(url)
            .map_err(|e| SessionError::Backend(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        tracing::info!(url = %url, "Session store connected to Redis");
        Ok(Self { conn })
    }

    fn redis_key(key: &str) -> String {
        format!("{}{}", Self::KEY_PREFIX, key)
    }
}

#[cfg(feature = "redis")]
impl std::fmt::Debug for RedisSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessions").finish_non_exhaustive()
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl SessionBackend for RedisSessions {
    async fn load(&self, key: &str) -> Result<Option<Map<String, Value>>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::redis_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(values) => Ok(Some(values)),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session");
                Ok(None)
            }
        }
    }

    async fn store(
        &self,
        key: &str,
        values: &Map<String, Value>,
        max_age: Duration,
    ) -> Result<(), SessionError> {
        let raw = serde_json::to_string(values).map_err(|e| SessionError::Backend(e.to_string()))?;

        // Redis rejects a zero expiry.
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(raw)
            .arg("EX")
            .arg(max_age.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Session storage behind a cookie.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    cookie_name: String,
    max_age: Duration,
}

impl SessionStore {
    /// Create an in-memory store issuing `cookie_name` cookies valid for
    /// `max_age`.
    #[must_use]
    pub fn new(cookie_name: impl Into<String>, max_age: Duration) -> Self {
        Self::with_backend(Arc::new(MemorySessions::new()), cookie_name, max_age)
    }

    /// Create a store over `backend`.
    #[must_use]
    pub fn with_backend(
        backend: Arc<dyn SessionBackend>,
        cookie_name: impl Into<String>,
        max_age: Duration,
    ) -> Self {
        Self {
            backend,
            cookie_name: cookie_name.into(),
            max_age,
        }
    }

    /// Load the session named by the request cookie, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>, SessionError> {
        let Some(key) = self.cookie_key(headers) else {
            return Ok(None);
        };
        Ok(self.backend.load(&key).await?.map(|values| Session {
            key,
            values,
            is_new: false,
        }))
    }

    /// Load the session named by the request cookie, or start a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get_or_create(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        if let Some(session) = self.load(headers).await? {
            return Ok(session);
        }

        Ok(Session {
            key: Uuid::new_v4().simple().to_string(),
            values: Map::new(),
            is_new: true,
        })
    }

    /// Store the session and set its cookie on the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie cannot be encoded as a header value or
    /// the backend fails.
    pub async fn save(
        &self,
        session: &Session,
        headers: &mut HeaderMap,
    ) -> Result<(), SessionError> {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; Max-Age={}",
            self.cookie_name,
            session.key,
            self.max_age.as_secs()
        );
        let value =
            HeaderValue::from_str(&cookie).map_err(|e| SessionError::InvalidCookie(e.to_string()))?;

        self.backend
            .store(&session.key, &session.values, self.max_age)
            .await?;
        headers.append(header::SET_COOKIE, value);
        Ok(())
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.backend.purge_expired()
    }

    fn cookie_key(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, key)| key.to_string())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("backend", &self.backend.name())
            .field("cookie_name", &self.cookie_name)
            .field("max_age", &self.max_age)
            .finish()
    }
}
