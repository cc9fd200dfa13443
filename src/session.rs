//! Sessions for calls that have been written to a connection and await a reply.
//!
//! Every transmitted call gets a locally minted [`SessionId`], embedded in the request frame and
//! echoed back by the remote side. [`SessionTable`] keeps two indexes over the same sessions:
//!
//! - by session id, to match a reply to its caller, and
//! - by connection, to fail every call in flight on a connection when it breaks.
//!
//! Both indexes are private and updated together inside each method, so a session is always
//! present in both or in neither.

use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    fmt,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{call::CallerContext, registry::ConnectionId};

/// Locally minted identifier correlating one outstanding remote call with its reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session id from its raw value.
    pub const fn new(id: u64) -> Self {
        SessionId(id)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A call written to a connection, awaiting its reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightSession {
    /// The session id sent to the remote node.
    pub session: SessionId,
    /// The connection the call was written to.
    pub connection: ConnectionId,
    /// Who to answer.
    pub caller: CallerContext,
    /// The remote method, kept for diagnostics.
    pub method: String,
}

/// Primary index of in-flight sessions plus the per-connection reverse index.
#[derive(Clone, Debug, Default)]
pub struct SessionTable {
    last_session: u64,
    sessions: HashMap<SessionId, InFlightSession>,
    by_connection: HashMap<ConnectionId, HashSet<SessionId>>,
}

impl SessionTable {
    /// Creates an empty session table.
    pub fn new() -> Self {
        SessionTable::default()
    }

    /// Mints the next session id and records the call as in flight on `connection`.
    ///
    /// Ids increase monotonically from 1 and are never reused by this table.
    pub fn open(
        &mut self,
        connection: ConnectionId,
        caller: CallerContext,
        method: impl Into<String>,
    ) -> SessionId {
        self.last_session += 1;
        let session = SessionId(self.last_session);
        self.by_connection
            .entry(connection)
            .or_default()
            .insert(session);
        self.sessions.insert(
            session,
            InFlightSession {
                session,
                connection,
                caller,
                method: method.into(),
            },
        );
        session
    }

    /// Removes and returns the session, if it is still in flight.
    ///
    /// A reply can legitimately arrive after its session was failed by a connection error, so an
    /// unknown id is not an error. Each session resolves at most once.
    pub fn resolve(&mut self, session: SessionId) -> Option<InFlightSession> {
        let entry = self.sessions.remove(&session)?;
        if let Entry::Occupied(mut sessions) = self.by_connection.entry(entry.connection) {
            sessions.get_mut().remove(&session);
            if sessions.get().is_empty() {
                sessions.remove();
            }
        }
        Some(entry)
    }

    /// Removes and returns every session in flight on `connection`, in ascending session order.
    pub fn fail_all(&mut self, connection: ConnectionId) -> Vec<InFlightSession> {
        let Some(sessions) = self.by_connection.remove(&connection) else {
            return Vec::new();
        };
        sessions
            .into_iter()
            .sorted()
            .filter_map(|session| self.sessions.remove(&session))
            .collect()
    }

    /// Returns the session, if it is still in flight.
    pub fn get(&self, session: SessionId) -> Option<&InFlightSession> {
        self.sessions.get(&session)
    }

    /// The number of sessions in flight on `connection`.
    pub fn connection_len(&self, connection: ConnectionId) -> usize {
        self.by_connection.get(&connection).map_or(0, HashSet::len)
    }

    /// The total number of sessions in flight.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterates over every in-flight session, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &InFlightSession> {
        self.sessions.values()
    }
}
