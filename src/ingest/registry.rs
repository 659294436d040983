//! # Connection Registry
//!
//! Tracks the streaming connections that are currently open. Each WebSocket gets
//! a fresh identity when it registers and loses it when its receive loop ends.
//!
//! ## Lifecycle:
//! 1. **register**: new identity, creation timestamp, liveness flag set
//! 2. **unregister**: entry removed, liveness flag cleared, count decremented
//!
//! The registry is a plain value owned by the application state rather than a
//! global, so tests can run as many independent registries as they like.
//!
//! ## Thread Safety:
//! Entries live in a `DashMap` and the live count in an `AtomicUsize`. The count
//! only moves when an insert or a remove actually happened, so a double
//! unregister never drives it below the true number of live connections.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identity of one streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-side record of a live connection.
#[derive(Debug)]
struct Connection {
    created_at: DateTime<Utc>,
    live: Arc<AtomicBool>,
}

/// Caller-side handle returned by [`ConnectionRegistry::register`].
///
/// Cloning the handle does not create a new connection; all clones observe the
/// same liveness flag.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    created_at: DateTime<Utc>,
    live: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// False once the connection has been unregistered.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// Diagnostic view of one live connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub created_at: DateTime<Utc>,
}

/// Tracker of currently open streaming connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    live: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Always succeeds; there is no capacity limit.
    pub fn register(&self) -> ConnectionHandle {
        let live = Arc::new(AtomicBool::new(true));
        let created_at = Utc::now();
        let mut id = ConnectionId::new();
        // A v4 collision is not going to happen, but identities must stay unique.
        while self.connections.contains_key(&id) {
            id = ConnectionId::new();
        }

        self.connections.insert(
            id,
            Connection {
                created_at,
                live: live.clone(),
            },
        );
        self.live.fetch_add(1, Ordering::AcqRel);

        ConnectionHandle {
            id,
            created_at,
            live,
        }
    }

    /// Remove a connection. Unknown or already removed handles are a no-op.
    pub fn unregister(&self, handle: &ConnectionHandle) {
        if let Some((_, connection)) = self.connections.remove(&handle.id) {
            connection.live.store(false, Ordering::Release);
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Live connections, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                id: *entry.key(),
                created_at: entry.value().created_at,
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }
}
