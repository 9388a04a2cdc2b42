//! Process-wide registry of live connections.
//!
//! The registry exists for one purpose: telling every live relay to wind
//! down when the server shuts down. It holds only weak references, so it
//! never keeps a connection alive or decides when one ends.

use chatline_transport::ConnectionId;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Concurrent set of live connections.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    connections: Arc<DashMap<ConnectionId, Weak<Notify>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// The returned [`Registration`] removes the entry when dropped.
    #[must_use]
    pub fn register(&self, id: ConnectionId) -> Registration {
        let signal = Arc::new(Notify::new());
        self.connections.insert(id.clone(), Arc::downgrade(&signal));
        debug!(connection = %id, live = self.connections.len(), "Connection registered");

        Registration {
            id,
            signal,
            registry: self.clone(),
        }
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ask every live connection to shut down.
    ///
    /// Returns the number of connections notified. Entries whose connection
    /// is already gone are pruned.
    pub fn broadcast_shutdown(&self) -> usize {
        let mut notified = 0;
        let mut stale = Vec::new();

        for entry in self.connections.iter() {
            match entry.value().upgrade() {
                Some(signal) => {
                    signal.notify_one();
                    notified += 1;
                }
                None => stale.push(entry.key().clone()),
            }
        }

        for id in stale {
            self.connections.remove(&id);
        }

        info!(connections = notified, "Broadcast shutdown to live connections");
        notified
    }
}

/// A connection's entry in the [`Registry`].
#[derive(Debug)]
pub struct Registration {
    id: ConnectionId,
    signal: Arc<Notify>,
    registry: Registry,
}

impl Registration {
    /// The registered connection.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Resolves once a shutdown has been broadcast.
    ///
    /// A broadcast sent before this is awaited is not lost.
    pub async fn shutdown_requested(&self) {
        self.signal.notified().await;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let own = Arc::downgrade(&self.signal);
        let removed = self
            .registry
            .connections
            .remove_if(&self.id, |_, entry| Weak::ptr_eq(entry, &own))
            .is_some();
        if removed {
            debug!(connection = %self.id, "Connection deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_and_drop() {
        let registry = Registry::new();
        let id = ConnectionId::new("conn-1");

        let registration = registry.register(id.clone());
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registration.id(), &id);

        drop(registration);
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_registration_keeps_replacement() {
        let registry = Registry::new();
        let id = ConnectionId::new("conn-1");
        let old = registry.register(id.clone());
        let new = registry.register(id.clone());

        drop(old);
        assert!(registry.contains(&id));
        drop(new);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_shutdown_notifies_live_connections() {
        let registry = Registry::new();
        let a = registry.register(ConnectionId::new("a"));
        let b = registry.register(ConnectionId::new("b"));

        assert_eq!(registry.broadcast_shutdown(), 2);

        // The permit is stored, so awaiting after the broadcast still resolves.
        tokio::time::timeout(Duration::from_secs(1), a.shutdown_requested())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.shutdown_requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Registry::new();
        let mut handles = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let registration = registry.register(ConnectionId::new(format!("conn-{}", i)));
                tokio::task::yield_now().await;
                drop(registration);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_does_not_own_connections() {
        let registry = Registry::new();
        let id = ConnectionId::new("conn-1");
        let registration = registry.register(id.clone());
        let weak = registry.connections.get(&id).map(|e| e.value().clone()).unwrap();

        drop(registration);
        assert!(weak.upgrade().is_none());
        assert_eq!(registry.broadcast_shutdown(), 0);
    }
}
