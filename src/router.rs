//! The request router: routes calls to connections and matches replies to callers.
//!
//! [`Router`] owns every index the cluster client keeps:
//!
//! - the [`Topology`], resolving node names to endpoints,
//! - the [`ConnectionRegistry`], holding the live connection per endpoint,
//! - the [`PendingQueues`], holding calls that wait for a connection, and
//! - the [`SessionTable`], holding calls written to a connection that await a reply.
//!
//! The router performs no I/O. Each operation consumes one inbound event and returns the
//! [`Effect`]s it produced, in order: commands for the transport, and outcomes for the
//! dispatcher. Handling one event runs to completion before the next, so every index update
//! within an operation is atomic with respect to all other operations.
//!
//! # Endpoint lifecycle
//!
//! ```text
//! Unconnected --call--> Connecting --connected--> Connected
//!      ^                    |                         |
//!      +-------error--------+-----------error---------+
//! ```

use itertools::Itertools;
use kameo::Reply;
use serde::Serialize;

use crate::{
    call::{CallRequest, CallerContext, RemoteCall},
    codec::{MsgPackCodec, RequestFrame, WireCodec},
    config::ClientConfig,
    error::ErrorKind,
    pending::{PendingQueues, PendingSend},
    registry::{ConnectionId, ConnectionRegistry},
    session::{InFlightSession, SessionTable},
    topology::{Endpoint, Topology},
    transport::{ErrorTarget, SocketEvent},
};

/// An action requested by the router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Open a connection to the endpoint.
    Connect(Endpoint),
    /// Write the buffers, in order, to the connection.
    Send {
        /// The connection to write to.
        connection: ConnectionId,
        /// The encoded request frame.
        buffers: Vec<Vec<u8>>,
    },
    /// Answer the caller with a reply payload.
    Respond {
        /// The caller being answered.
        caller: CallerContext,
        /// The reply payload.
        payload: Vec<u8>,
    },
    /// Answer the caller with a failure.
    Fail {
        /// The caller being answered.
        caller: CallerContext,
        /// Why the call failed.
        kind: ErrorKind,
        /// A human readable description.
        message: String,
    },
}

/// Connection state of an endpoint, derived from the registry and the pending queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EndpointState {
    /// No connection, nothing queued.
    Unconnected,
    /// A connect command is outstanding and calls are queued.
    Connecting,
    /// A connection is registered.
    Connected,
}

/// A point-in-time view of the router's indexes, for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Reply)]
pub struct RouterSnapshot {
    /// Registered connections, sorted by endpoint.
    pub connections: Vec<(Endpoint, ConnectionId)>,
    /// Number of queued calls per waiting endpoint, sorted by endpoint.
    pub queued: Vec<(Endpoint, usize)>,
    /// Calls awaiting a reply, sorted by session id.
    pub in_flight: Vec<InFlightSession>,
}

/// Routes outbound calls and inbound socket events.
#[derive(Debug)]
pub struct Router<C = MsgPackCodec> {
    topology: Topology,
    codec: C,
    request_tag: u32,
    registry: ConnectionRegistry,
    pending: PendingQueues,
    sessions: SessionTable,
}

impl Router<MsgPackCodec> {
    /// Creates a router using the default MessagePack codec.
    pub fn new(config: ClientConfig) -> Self {
        Router::with_codec(config, MsgPackCodec::new())
    }
}

impl<C: WireCodec> Router<C> {
    /// Creates a router using a custom wire codec.
    pub fn with_codec(config: ClientConfig, codec: C) -> Self {
        Router {
            request_tag: config.request_tag(),
            topology: config.into_topology(),
            codec,
            registry: ConnectionRegistry::new(),
            pending: PendingQueues::new(),
            sessions: SessionTable::new(),
        }
    }

    /// Routes a call to its node.
    ///
    /// The call is written immediately if the node's endpoint has a live connection. Otherwise it
    /// is queued, and the first call queued for the endpoint also requests a connection.
    pub fn handle_call(&mut self, request: CallRequest) -> Vec<Effect> {
        let mut effects = Vec::new();
        let CallRequest { caller, node, call } = request;

        let Some(endpoint) = self.topology.resolve(&node).cloned() else {
            tracing::warn!(%node, method = %call.method, "call to unknown remote node");
            effects.push(Effect::Fail {
                caller,
                kind: ErrorKind::UnknownRemoteNode,
                message: format!("unknown remote node {node}"),
            });
            return effects;
        };

        match self.registry.lookup(&endpoint) {
            Some(connection) => self.send_into(connection, caller, call, &mut effects),
            None => {
                if self.pending.enqueue(&endpoint, PendingSend { caller, call }) {
                    tracing::debug!(%node, %endpoint, "connecting to remote node");
                    effects.push(Effect::Connect(endpoint));
                }
            }
        }

        effects
    }

    /// Writes a call to an established connection.
    ///
    /// A session is opened for the call and its id embedded in the request frame. The caller is
    /// answered later, when the reply arrives or the connection fails.
    pub fn send_on_connection(
        &mut self,
        connection: ConnectionId,
        caller: CallerContext,
        call: RemoteCall,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.send_into(connection, caller, call, &mut effects);
        effects
    }

    /// Handles a transport event.
    pub fn handle_event(&mut self, event: SocketEvent) -> Vec<Effect> {
        match event {
            SocketEvent::Connected {
                endpoint,
                connection,
            } => self.on_connected(endpoint, connection),
            SocketEvent::Error { target, reason } => self.on_error(target, &reason),
            SocketEvent::Data { connection, bytes } => self.on_data(connection, &bytes),
        }
    }

    /// Registers a new connection and flushes the endpoint's queue onto it, in arrival order.
    pub fn on_connected(&mut self, endpoint: Endpoint, connection: ConnectionId) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Some(previous) = self.registry.register(endpoint.clone(), connection) {
            if previous != connection {
                tracing::debug!(%endpoint, %previous, %connection, "replacing connection");
            }
        }

        let queued = self.pending.drain_all(&endpoint);
        tracing::debug!(%endpoint, %connection, queued = queued.len(), "connected");
        for PendingSend { caller, call } in queued {
            self.send_into(connection, caller, call, &mut effects);
        }

        effects
    }

    /// Fails every call affected by a transport error.
    ///
    /// An error on an established connection fails every session in flight on it and removes the
    /// connection from the registry. An error on a connect attempt fails every call queued for
    /// the endpoint. Either way the endpoint becomes eligible for a fresh connect.
    pub fn on_error(&mut self, target: ErrorTarget, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();

        match target {
            ErrorTarget::Connection(connection) => {
                let endpoint = self.registry.unregister(connection);
                let failed = self.sessions.fail_all(connection);
                tracing::warn!(
                    %connection,
                    ?endpoint,
                    failed = failed.len(),
                    reason,
                    "connection failed"
                );
                effects.extend(failed.into_iter().map(|session| Effect::Fail {
                    caller: session.caller,
                    kind: ErrorKind::SocketDisconnected,
                    message: "remote call failed".to_string(),
                }));
            }
            ErrorTarget::Endpoint(endpoint) => {
                let failed = self.pending.drain_all(&endpoint);
                tracing::warn!(%endpoint, failed = failed.len(), reason, "connect failed");
                effects.extend(failed.into_iter().map(|PendingSend { caller, call }| {
                    Effect::Fail {
                        caller,
                        kind: ErrorKind::SocketDisconnected,
                        message: format!("remote call {} failed", call.method),
                    }
                }));
            }
        }

        effects
    }

    /// Matches a reply frame to its session and answers the caller.
    ///
    /// Replies for sessions no longer in flight are dropped: their caller was already failed when
    /// the owning connection broke.
    pub fn on_data(&mut self, connection: ConnectionId, bytes: &[u8]) -> Vec<Effect> {
        let mut effects = Vec::new();

        let response = match self.codec.decode_response(bytes) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%connection, %err, "dropping undecodable frame");
                return effects;
            }
        };

        let Some(session) = self.sessions.resolve(response.session) else {
            tracing::debug!(%connection, session = %response.session, "reply for unknown session");
            return effects;
        };
        if session.connection != connection {
            tracing::debug!(
                %connection,
                expected = %session.connection,
                session = %session.session,
                "reply arrived on a different connection"
            );
        }

        if response.is_ok() {
            effects.push(Effect::Respond {
                caller: session.caller,
                payload: response.payload,
            });
        } else {
            effects.push(Effect::Fail {
                caller: session.caller,
                kind: ErrorKind::RemoteExecution(response.status),
                message: "remote call error".to_string(),
            });
        }

        effects
    }

    /// The connection state of an endpoint.
    pub fn endpoint_state(&self, endpoint: &Endpoint) -> EndpointState {
        if self.registry.lookup(endpoint).is_some() {
            EndpointState::Connected
        } else if self.pending.contains(endpoint) {
            EndpointState::Connecting
        } else {
            EndpointState::Unconnected
        }
    }

    /// The cluster topology calls are resolved against.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The live connection of an endpoint.
    pub fn connection(&self, endpoint: &Endpoint) -> Option<ConnectionId> {
        self.registry.lookup(endpoint)
    }

    /// The number of calls queued for an endpoint.
    pub fn queued(&self, endpoint: &Endpoint) -> usize {
        self.pending.len(endpoint)
    }

    /// The in-flight session table.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// The total number of calls awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.sessions.len()
    }

    /// Captures the router's indexes.
    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            connections: self
                .registry
                .iter()
                .map(|(endpoint, connection)| (endpoint.clone(), connection))
                .sorted()
                .collect(),
            queued: self
                .pending
                .iter()
                .map(|(endpoint, queue)| (endpoint.clone(), queue.len()))
                .sorted()
                .collect(),
            in_flight: self
                .sessions
                .iter()
                .cloned()
                .sorted_by_key(|session| session.session)
                .collect(),
        }
    }

    fn send_into(
        &mut self,
        connection: ConnectionId,
        caller: CallerContext,
        call: RemoteCall,
        effects: &mut Vec<Effect>,
    ) {
        let RemoteCall {
            service,
            method,
            payload,
        } = call;
        let session = self.sessions.open(connection, caller, method.clone());
        let frame = RequestFrame {
            service,
            session,
            tag: self.request_tag,
            method,
            payload,
        };

        match self.codec.encode_request(frame) {
            Ok(buffers) => {
                tracing::trace!(%connection, %session, "sending request");
                effects.push(Effect::Send {
                    connection,
                    buffers,
                });
            }
            Err(err) => {
                self.sessions.resolve(session);
                tracing::warn!(%connection, %err, "failed to encode request");
                effects.push(Effect::Fail {
                    caller,
                    kind: ErrorKind::MalformedRequest,
                    message: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{ResponseFrame, STATUS_OK},
        error::CodecError,
        session::SessionId,
    };

    const CONN: ConnectionId = ConnectionId::new(7);

    fn db1() -> Endpoint {
        Endpoint::new("10.0.0.5", 9000)
    }

    fn router() -> Router {
        Router::new(ClientConfig::new(Topology::new().with_node("db1", db1())))
    }

    fn call(caller_session: u64, method: &str) -> CallRequest {
        CallRequest::new(
            CallerContext::new(1, caller_session),
            "db1",
            RemoteCall::new("store", method, caller_session.to_be_bytes().to_vec()),
        )
    }

    /// Decodes the request frames written by `Send` effects, in order.
    fn sent(effects: &[Effect]) -> Vec<(ConnectionId, RequestFrame)> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send {
                    connection,
                    buffers,
                } => Some((
                    *connection,
                    MsgPackCodec.decode_request(&buffers[1]).unwrap(),
                )),
                _ => None,
            })
            .collect()
    }

    fn reply(frame: &ResponseFrame) -> Vec<u8> {
        MsgPackCodec.encode_response(frame).unwrap().pop().unwrap()
    }

    #[test]
    fn first_call_connects_and_queues() {
        let mut router = router();

        let effects = router.handle_call(call(1, "get"));
        assert_eq!(effects, vec![Effect::Connect(db1())]);
        assert_eq!(router.queued(&db1()), 1);
        assert_eq!(router.endpoint_state(&db1()), EndpointState::Connecting);

        // A second call while connecting must not connect again.
        let effects = router.handle_call(call(2, "get"));
        assert!(effects.is_empty());
        assert_eq!(router.queued(&db1()), 2);
    }

    #[test]
    fn connected_flushes_queue_in_order() {
        let mut router = router();
        router.handle_call(call(1, "first"));
        router.handle_call(call(2, "second"));

        let effects = router.on_connected(db1(), CONN);
        let frames = sent(&effects);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|(connection, _)| *connection == CONN));
        assert_eq!(frames[0].1.method, "first");
        assert_eq!(frames[1].1.method, "second");
        assert!(frames[0].1.session < frames[1].1.session);
        assert_eq!(frames[0].1.service, "store");
        assert_eq!(frames[0].1.tag, crate::config::DEFAULT_REQUEST_TAG);

        assert_eq!(router.in_flight(), 2);
        assert_eq!(router.sessions().connection_len(CONN), 2);
        assert_eq!(router.queued(&db1()), 0);
        assert_eq!(router.endpoint_state(&db1()), EndpointState::Connected);
    }

    #[test]
    fn queued_calls_go_out_before_later_calls() {
        let mut router = router();
        for session in 1..=3 {
            router.handle_call(call(session, "queued"));
        }

        let mut effects = router.on_connected(db1(), CONN);
        effects.extend(router.handle_call(call(4, "direct")));

        let methods: Vec<_> = sent(&effects)
            .into_iter()
            .map(|(_, frame)| frame.method)
            .collect();
        assert_eq!(methods, vec!["queued", "queued", "queued", "direct"]);
    }

    #[test]
    fn call_on_live_connection_is_sent_directly() {
        let mut router = router();
        router.on_connected(db1(), CONN);

        let effects = router.handle_call(call(1, "get"));
        let frames = sent(&effects);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, CONN);
        assert_eq!(frames[0].1.payload, 1u64.to_be_bytes().to_vec());
        assert_eq!(router.queued(&db1()), 0);
    }

    #[test]
    fn send_on_connection_opens_a_session() {
        let mut router = router();
        let effects = router.send_on_connection(
            CONN,
            CallerContext::new(4, 2),
            RemoteCall::new("store", "put", Vec::new()),
        );

        let frames = sent(&effects);
        let session = router.sessions().get(frames[0].1.session).unwrap();
        assert_eq!(session.connection, CONN);
        assert_eq!(session.caller, CallerContext::new(4, 2));
        assert_eq!(session.method, "put");
    }

    #[test]
    fn unknown_node_fails_immediately() {
        let mut router = router();
        let request = CallRequest::new(
            CallerContext::new(1, 1),
            "db9",
            RemoteCall::new("store", "get", Vec::new()),
        );

        let effects = router.handle_call(request);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Fail { kind: ErrorKind::UnknownRemoteNode, .. }]
        ));
        assert!(router.snapshot().queued.is_empty());
    }

    #[test]
    fn ok_reply_is_delivered_once() {
        let mut router = router();
        router.handle_call(call(1, "get"));
        router.handle_call(call(2, "get"));
        let frames = sent(&router.on_connected(db1(), CONN));
        let first = frames[0].1.session;

        let bytes = reply(&ResponseFrame::ok(first, b"X".to_vec()));
        let effects = router.on_data(CONN, &bytes);
        assert_eq!(
            effects,
            vec![Effect::Respond {
                caller: CallerContext::new(1, 1),
                payload: b"X".to_vec(),
            }]
        );
        assert!(router.sessions().get(first).is_none());
        assert_eq!(router.sessions().connection_len(CONN), 1);

        // Duplicate reply for the same session.
        assert!(router.on_data(CONN, &bytes).is_empty());
    }

    #[test]
    fn error_reply_is_forwarded_with_remote_code() {
        let mut router = router();
        router.on_connected(db1(), CONN);
        let session = sent(&router.handle_call(call(1, "get")))[0].1.session;

        let effects = router.on_data(CONN, &reply(&ResponseFrame::error(session, 404)));
        assert_eq!(
            effects,
            vec![Effect::Fail {
                caller: CallerContext::new(1, 1),
                kind: ErrorKind::RemoteExecution(404),
                message: "remote call error".to_string(),
            }]
        );
        assert_eq!(router.in_flight(), 0);
    }

    #[test]
    fn undecodable_and_unknown_replies_are_dropped() {
        let mut router = router();
        router.on_connected(db1(), CONN);
        router.handle_call(call(1, "get"));

        assert!(router.on_data(CONN, &[0xFF, 0x00, 0x13]).is_empty());
        let unknown = ResponseFrame {
            session: SessionId::new(999),
            status: STATUS_OK,
            payload: Vec::new(),
        };
        assert!(router.on_data(CONN, &reply(&unknown)).is_empty());
        assert_eq!(router.in_flight(), 1);
    }

    #[test]
    fn connection_error_fails_every_in_flight_session() {
        let mut router = router();
        router.on_connected(db1(), CONN);
        for session in 1..=3 {
            router.handle_call(call(session, "get"));
        }

        let effects = router.on_error(ErrorTarget::Connection(CONN), "reset by peer");
        let failed: Vec<_> = effects
            .iter()
            .map(|effect| match effect {
                Effect::Fail {
                    caller,
                    kind: ErrorKind::SocketDisconnected,
                    message,
                } => {
                    assert_eq!(message, "remote call failed");
                    caller.session
                }
                other => panic!("unexpected effect {other:?}"),
            })
            .collect();
        assert_eq!(failed, vec![1, 2, 3]);
        assert_eq!(router.connection(&db1()), None);
        assert_eq!(router.in_flight(), 0);
        assert_eq!(router.endpoint_state(&db1()), EndpointState::Unconnected);
    }

    #[test]
    fn connect_error_fails_every_queued_call() {
        let mut router = router();
        router.handle_call(call(1, "get"));
        router.handle_call(call(2, "put"));

        let effects = router.on_error(ErrorTarget::Endpoint(db1()), "connection refused");
        assert_eq!(
            effects,
            vec![
                Effect::Fail {
                    caller: CallerContext::new(1, 1),
                    kind: ErrorKind::SocketDisconnected,
                    message: "remote call get failed".to_string(),
                },
                Effect::Fail {
                    caller: CallerContext::new(1, 2),
                    kind: ErrorKind::SocketDisconnected,
                    message: "remote call put failed".to_string(),
                },
            ]
        );
        assert_eq!(router.queued(&db1()), 0);
        assert_eq!(router.endpoint_state(&db1()), EndpointState::Unconnected);

        // The endpoint may be retried on the next call.
        assert_eq!(
            router.handle_call(call(3, "get")),
            vec![Effect::Connect(db1())]
        );
    }

    #[test]
    fn displaced_connection_error_still_fails_its_sessions() {
        let mut router = router();
        router.on_connected(db1(), CONN);
        router.handle_call(call(1, "get"));

        let replacement = ConnectionId::new(8);
        router.on_connected(db1(), replacement);
        router.handle_call(call(2, "get"));

        let effects = router.on_error(ErrorTarget::Connection(CONN), "closed");
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            Effect::Fail { caller, .. } if caller.session == 1
        ));
        assert_eq!(router.connection(&db1()), Some(replacement));
        assert_eq!(router.in_flight(), 1);
    }

    #[test]
    fn scenario_connect_reply_disconnect_late_reply() {
        let mut router = router();

        // A: two calls to a node never seen before, one connect.
        assert_eq!(
            router.handle_call(call(1, "get")),
            vec![Effect::Connect(db1())]
        );
        assert!(router.handle_call(call(2, "get")).is_empty());

        // B: connection comes up, both calls are sent on it.
        let frames = sent(&router.handle_event(SocketEvent::Connected {
            endpoint: db1(),
            connection: CONN,
        }));
        assert_eq!(frames.len(), 2);
        let (first, second) = (frames[0].1.session, frames[1].1.session);

        // C: the first call is answered.
        let effects = router.handle_event(SocketEvent::Data {
            connection: CONN,
            bytes: reply(&ResponseFrame::ok(first, b"X".to_vec())),
        });
        assert!(matches!(
            effects.as_slice(),
            [Effect::Respond { caller, .. }] if caller.session == 1
        ));

        // D: the connection breaks, failing the second call.
        let effects = router.handle_event(SocketEvent::Error {
            target: ErrorTarget::Connection(CONN),
            reason: "reset".to_string(),
        });
        assert!(matches!(
            effects.as_slice(),
            [Effect::Fail { caller, kind: ErrorKind::SocketDisconnected, .. }] if caller.session == 2
        ));
        assert_eq!(router.connection(&db1()), None);

        // A late reply for the failed session is dropped.
        let effects = router.handle_event(SocketEvent::Data {
            connection: CONN,
            bytes: reply(&ResponseFrame::ok(second, Vec::new())),
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn snapshot_reflects_indexes() {
        let mut router = router();
        router.handle_call(call(1, "get"));
        let snapshot = router.snapshot();
        assert_eq!(snapshot.queued, vec![(db1(), 1)]);
        assert!(snapshot.connections.is_empty());

        router.on_connected(db1(), CONN);
        let snapshot = router.snapshot();
        assert_eq!(snapshot.connections, vec![(db1(), CONN)]);
        assert!(snapshot.queued.is_empty());
        assert_eq!(snapshot.in_flight.len(), 1);
        assert_eq!(snapshot.in_flight[0].caller, CallerContext::new(1, 1));
    }

    struct FailingCodec;

    impl WireCodec for FailingCodec {
        fn encode_request(&self, request: RequestFrame) -> Result<Vec<Vec<u8>>, CodecError> {
            Err(CodecError::FrameTooLarge(request.payload.len()))
        }

        fn decode_response(&self, bytes: &[u8]) -> Result<ResponseFrame, CodecError> {
            MsgPackCodec.decode_response(bytes)
        }
    }

    #[test]
    fn encode_failure_fails_the_call_and_closes_its_session() {
        let config = ClientConfig::new(Topology::new().with_node("db1", db1()));
        let mut router = Router::with_codec(config, FailingCodec);
        router.on_connected(db1(), CONN);

        let effects = router.handle_call(call(1, "get"));
        assert!(matches!(
            effects.as_slice(),
            [Effect::Fail { kind: ErrorKind::MalformedRequest, .. }]
        ));
        assert_eq!(router.in_flight(), 0);
        assert_eq!(router.sessions().connection_len(CONN), 0);
    }
}
