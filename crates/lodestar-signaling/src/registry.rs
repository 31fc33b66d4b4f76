//! Concurrent peer directory.
//!
//! Locking discipline: entries are cloned out of the map before use; no
//! shard guard is held across an `.await` or a call into a connection.

use crate::connection::PeerConnection;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One entry of the peer listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Display name
    pub name: String,
    /// Peer id
    pub id: String,
}

/// Peer listing in its JSON form, `{"clients": [{"name": .., "id": ..}]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDirectory {
    /// Registered peers, in no particular order
    pub clients: Vec<PeerSummary>,
}

/// Maps peer id to its live connection
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Arc<PeerConnection>>,
}

impl PeerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under its id, returning any connection it replaced
    pub fn insert(&self, conn: Arc<PeerConnection>) -> Option<Arc<PeerConnection>> {
        debug!("Registering peer {} ({})", conn.id(), conn.name());
        self.peers.insert(conn.id().to_string(), conn)
    }

    /// Look up a peer
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<PeerConnection>> {
        self.peers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Deregister a peer. Its transport is left alone.
    pub fn remove(&self, id: &str) -> Option<Arc<PeerConnection>> {
        let removed = self.peers.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!("Deregistered peer {}", id);
        }
        removed
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Number of registered peers
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of every registered peer
    #[must_use]
    pub fn list(&self) -> Vec<PeerSummary> {
        self.peers
            .iter()
            .map(|entry| PeerSummary {
                name: entry.name().to_string(),
                id: entry.key().clone(),
            })
            .collect()
    }

    /// Snapshot in directory form
    #[must_use]
    pub fn directory(&self) -> PeerDirectory {
        PeerDirectory {
            clients: self.list(),
        }
    }

    /// Deregister every peer and force its connection closed
    pub fn close_all(&self) {
        let ids: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(conn) = self.remove(&id) {
                conn.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn peer(id: &str, name: &str) -> Arc<PeerConnection> {
        let (conn, _rx) =
            PeerConnection::new(id.into(), name.into(), 4, CancellationToken::new());
        conn
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = PeerRegistry::new();
        assert!(registry.is_empty());

        registry.insert(peer("a", "Alice"));
        registry.insert(peer("b", "Bob"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").unwrap().name(), "Alice");
        assert!(registry.contains("b"));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_leaves_connection_open() {
        let registry = PeerRegistry::new();
        registry.insert(peer("a", "Alice"));
        let conn = registry.remove("a").unwrap();
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_list_snapshot() {
        let registry = PeerRegistry::new();
        registry.insert(peer("a", "Alice"));
        registry.insert(peer("b", "Alice"));

        let mut list = registry.list();
        list.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(
            list,
            vec![
                PeerSummary {
                    name: "Alice".into(),
                    id: "a".into()
                },
                PeerSummary {
                    name: "Alice".into(),
                    id: "b".into()
                },
            ]
        );
    }

    #[test]
    fn test_directory_json_shape() {
        let registry = PeerRegistry::new();
        registry.insert(peer("a", "Alice"));
        let json = serde_json::to_string(&registry.directory()).unwrap();
        assert_eq!(json, r#"{"clients":[{"name":"Alice","id":"a"}]}"#);
    }

    #[test]
    fn test_close_all() {
        let registry = PeerRegistry::new();
        let a = peer("a", "Alice");
        let b = peer("b", "Bob");
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));

        registry.close_all();
        assert!(registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
