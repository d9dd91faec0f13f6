//! Connection registry: every open subscriber and the principal bound to it.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{ConnectionId, Principal};
use metrics::gauge;
use parking_lot::RwLock;
use tracing::debug;

use super::connection::ConnectionHandle;
use crate::metrics::WS_CONNECTIONS_ACTIVE;

/// A connection together with the identity that authenticated it.
#[derive(Clone)]
pub struct RegisteredConnection {
    /// Transport handle.
    pub connection: Arc<dyn ConnectionHandle>,
    /// Principal resolved before admission.
    pub principal: Arc<Principal>,
}

impl RegisteredConnection {
    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }
}

impl std::fmt::Debug for RegisteredConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredConnection")
            .field("id", self.id())
            .field("user_id", &self.principal.user_id)
            .field("open", &self.connection.is_open())
            .finish()
    }
}

/// Concurrent set of open connections keyed by connection ID.
///
/// Callers never see the backing map. Broadcasts iterate over a
/// [`snapshot`](Self::snapshot) taken under a short read lock, so joins and
/// leaves during a pass neither block it nor invalidate it.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, RegisteredConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Admit a connection bound to `principal`.
    ///
    /// Returns `false` and leaves the existing entry untouched when the ID is
    /// already registered.
    pub fn add(&self, connection: Arc<dyn ConnectionHandle>, principal: Arc<Principal>) -> bool {
        let mut conns = self.connections.write();
        let id = connection.id().clone();
        if conns.contains_key(&id) {
            return false;
        }
        debug!(conn_id = %id, user_id = %principal.user_id, "connection registered");
        let _ = conns.insert(
            id,
            RegisteredConnection {
                connection,
                principal,
            },
        );
        record_size(conns.len());
        true
    }

    /// Remove a connection. Returns whether it was present.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let mut conns = self.connections.write();
        let removed = conns.remove(id).is_some();
        if removed {
            debug!(conn_id = %id, "connection unregistered");
            record_size(conns.len());
        }
        removed
    }

    /// Remove every listed connection under one write lock. Returns how many
    /// were present.
    pub fn remove_all<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let mut ids = ids.into_iter().peekable();
        if ids.peek().is_none() {
            return 0;
        }
        let mut conns = self.connections.write();
        let removed = ids.filter(|id| conns.remove(*id).is_some()).count();
        if removed > 0 {
            record_size(conns.len());
        }
        removed
    }

    /// Point-in-time copy of every entry, in no particular order.
    pub fn snapshot(&self) -> Vec<RegisteredConnection> {
        self.connections.read().values().cloned().collect()
    }

    /// Principal bound to a connection.
    pub fn principal_of(&self, id: &ConnectionId) -> Option<Arc<Principal>> {
        self.connections
            .read()
            .get(id)
            .map(|entry| entry.principal.clone())
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_size(len: usize) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(len as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{ClientConnection, Outbound};
    use tokio::sync::mpsc;

    fn make_connection(id: &str) -> (Arc<dyn ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = ClientConnection::channel(ConnectionId::from(id), 8);
        (Arc::new(conn), rx)
    }

    fn principal(user: &str) -> Arc<Principal> {
        Arc::new(Principal::new(user))
    }

    #[test]
    fn add_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("c1");
        assert!(registry.add(conn, principal("alice")));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&ConnectionId::from("c1")));
    }

    #[test]
    fn add_twice_keeps_one_entry() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("c1");
        assert!(registry.add(conn.clone(), principal("alice")));
        assert!(!registry.add(conn, principal("mallory")));
        assert_eq!(registry.len(), 1);
        // The first binding wins
        let bound = registry.principal_of(&ConnectionId::from("c1")).unwrap();
        assert_eq!(bound.user_id, "alice");
    }

    #[test]
    fn remove_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("c1");
        let _ = registry.add(conn, principal("alice"));
        assert!(registry.remove(&ConnectionId::from("c1")));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("c1");
        let _ = registry.add(conn, principal("alice"));
        assert!(!registry.remove(&ConnectionId::from("nope")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_all_counts_present_only() {
        let registry = ConnectionRegistry::new();
        for id in ["a", "b", "c"] {
            let (conn, _rx) = make_connection(id);
            let _ = registry.add(conn, principal(id));
        }
        let ids = [
            ConnectionId::from("a"),
            ConnectionId::from("c"),
            ConnectionId::from("zzz"),
        ];
        assert_eq!(registry.remove_all(&ids), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&ConnectionId::from("b")));
        assert_eq!(registry.remove_all(std::iter::empty()), 0);
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = make_connection("a");
        let (b, _rb) = make_connection("b");
        let _ = registry.add(a, principal("alice"));
        let _ = registry.add(b, principal("bob"));

        let snapshot = registry.snapshot();
        let _ = registry.remove(&ConnectionId::from("a"));
        let (c, _rc) = make_connection("c");
        let _ = registry.add(c, principal("carol"));

        assert_eq!(snapshot.len(), 2);
        let mut users: Vec<_> = snapshot.iter().map(|e| e.principal.user_id.clone()).collect();
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[test]
    fn principal_of_unknown_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.principal_of(&ConnectionId::from("x")).is_none());
    }

    #[test]
    fn concurrent_add_remove_and_snapshot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let mut keep = Vec::new();
                for i in 0..200 {
                    let (conn, rx) = make_connection(&format!("t{t}-{i}"));
                    keep.push(rx);
                    let _ = registry.add(conn, principal("u"));
                    let _ = registry.snapshot();
                    if i % 2 == 0 {
                        let _ = registry.remove(&ConnectionId::from(format!("t{t}-{i}")));
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 4 * 100);
    }
}
