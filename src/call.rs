//! Outbound call requests and the caller context they carry.

use serde::{Deserialize, Serialize};

/// Identity and session of the original requester.
///
/// Both values are opaque to the router. They are handed back unchanged when the call is answered,
/// so the caller can match the answer to its own outstanding request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerContext {
    /// Identifies the calling service.
    pub id: u64,
    /// The caller's own session id for this request.
    pub session: u64,
}

impl CallerContext {
    /// Creates a new caller context.
    pub const fn new(id: u64, session: u64) -> Self {
        CallerContext { id, session }
    }
}

/// What to invoke on the remote node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// The service hosted on the remote node.
    pub service: String,
    /// The method to invoke on that service.
    pub method: String,
    /// Opaque request payload.
    pub payload: Vec<u8>,
}

impl RemoteCall {
    /// Creates a new remote call.
    pub fn new(service: impl Into<String>, method: impl Into<String>, payload: Vec<u8>) -> Self {
        RemoteCall {
            service: service.into(),
            method: method.into(),
            payload,
        }
    }
}

/// A request to call a service on a named cluster node.
///
/// This is the message sent to a [`ClusterClient`](crate::client::ClusterClient). The answer is
/// never returned directly; it is delivered later through the client's
/// [`Dispatcher`](crate::dispatch::Dispatcher).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRequest {
    /// Who to answer.
    pub caller: CallerContext,
    /// The logical name of the remote node, resolved through the topology.
    pub node: String,
    /// What to invoke.
    pub call: RemoteCall,
}

impl CallRequest {
    /// Creates a new call request.
    pub fn new(caller: CallerContext, node: impl Into<String>, call: RemoteCall) -> Self {
        CallRequest {
            caller,
            node: node.into(),
            call,
        }
    }
}
