//! Tracks the single live outbound connection for each endpoint.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::topology::Endpoint;

/// Opaque identifier of a live transport connection.
///
/// Connection ids are allocated by the transport; the router only stores and compares them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from its raw value.
    pub const fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Maps each endpoint to at most one live connection.
///
/// The registry is the source of truth for whether a node is currently reachable.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Endpoint, ConnectionId>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    /// Returns the live connection for an endpoint.
    pub fn lookup(&self, endpoint: &Endpoint) -> Option<ConnectionId> {
        self.connections.get(endpoint).copied()
    }

    /// Registers a connection for an endpoint, replacing any previous one.
    ///
    /// Returns the displaced connection, if any.
    pub fn register(&mut self, endpoint: Endpoint, connection: ConnectionId) -> Option<ConnectionId> {
        self.connections.insert(endpoint, connection)
    }

    /// Removes the endpoint currently mapped to `connection`.
    ///
    /// The registry holds one entry per cluster node, so a reverse scan is cheap.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<Endpoint> {
        let endpoint = self
            .connections
            .iter()
            .find_map(|(endpoint, conn)| (*conn == connection).then(|| endpoint.clone()))?;
        self.connections.remove(&endpoint);
        Some(endpoint)
    }

    /// Iterates over every registered endpoint and its connection.
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, ConnectionId)> {
        self.connections.iter().map(|(endpoint, conn)| (endpoint, *conn))
    }

    /// The number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
