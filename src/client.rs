//! The cluster client actor.
//!
//! [`ClusterClient`] owns a [`Router`] and runs it inside a kameo actor. The actor's mailbox is
//! the single event queue: call requests and transport events are processed one at a time, each
//! to completion, so the router needs no locking. Effects produced by the router are applied
//! immediately: connect and send commands go to the [`Transport`], call outcomes go to the
//! [`Dispatcher`].
//!
//! # Example
//!
//! ```
//! use kameo_cluster_client::{
//!     CallRequest, CallerContext, ChannelDispatcher, ClientConfig, ClusterClient, ErrorKind,
//!     RemoteCall, Topology,
//! };
//!
//! # tokio_test::block_on(async {
//! let (dispatcher, mut deliveries) = ChannelDispatcher::new();
//! let client = ClusterClient::spawn_tcp(ClientConfig::new(Topology::new()), dispatcher);
//!
//! client
//!     .tell(CallRequest::new(
//!         CallerContext::new(1, 1),
//!         "db1",
//!         RemoteCall::new("store", "get", b"key".to_vec()),
//!     ))
//!     .await?;
//!
//! let delivery = deliveries.recv().await.unwrap();
//! assert_eq!(delivery.outcome.unwrap_err().kind, ErrorKind::UnknownRemoteNode);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use std::fmt;

use kameo::{
    actor::ActorRef,
    error::Infallible,
    message::{Context, Message},
    Actor,
};

use crate::{
    call::CallRequest,
    codec::{MsgPackCodec, WireCodec},
    config::ClientConfig,
    dispatch::Dispatcher,
    router::{Effect, Router, RouterSnapshot},
    transport::{SocketEvent, TcpTransport, Transport},
};

/// Routes calls to remote cluster nodes.
///
/// Send it [`CallRequest`]s to issue calls and [`SocketEvent`]s to report transport activity;
/// ask it [`Inspect`] for a [`RouterSnapshot`].
pub struct ClusterClient<T, D, C = MsgPackCodec> {
    router: Router<C>,
    transport: T,
    dispatcher: D,
}

impl<T, D> ClusterClient<T, D, MsgPackCodec>
where
    T: Transport,
    D: Dispatcher,
{
    /// Creates a client using the default MessagePack codec.
    pub fn new(config: ClientConfig, transport: T, dispatcher: D) -> Self {
        ClusterClient::with_codec(config, MsgPackCodec::new(), transport, dispatcher)
    }
}

impl<T, D, C> ClusterClient<T, D, C>
where
    T: Transport,
    D: Dispatcher,
    C: WireCodec,
{
    /// Creates a client using a custom wire codec.
    pub fn with_codec(config: ClientConfig, codec: C, transport: T, dispatcher: D) -> Self {
        ClusterClient {
            router: Router::with_codec(config, codec),
            transport,
            dispatcher,
        }
    }

    /// The router driven by this client.
    pub fn router(&self) -> &Router<C> {
        &self.router
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Connect(endpoint) => self.transport.connect(&endpoint),
                Effect::Send {
                    connection,
                    buffers,
                } => self.transport.send(connection, buffers),
                Effect::Respond { caller, payload } => {
                    self.dispatcher.deliver_response(caller, payload)
                }
                Effect::Fail {
                    caller,
                    kind,
                    message,
                } => self.dispatcher.deliver_error(caller, kind, message),
            }
        }
    }
}

impl<D: Dispatcher> ClusterClient<TcpTransport, D> {
    /// Spawns a client connected to the cluster over TCP.
    ///
    /// A background task forwards transport events into the client's mailbox. It holds only a
    /// weak reference, and ends once the client stops.
    pub fn spawn_tcp(config: ClientConfig, dispatcher: D) -> ActorRef<Self> {
        let (transport, mut events) = TcpTransport::new(config.max_frame_size());
        let client_ref = <Self as Actor>::spawn(ClusterClient::new(config, transport, dispatcher));

        let weak_ref = client_ref.downgrade();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(client_ref) = weak_ref.upgrade() else {
                    break;
                };
                if client_ref.tell(event).await.is_err() {
                    break;
                }
            }
        });

        client_ref
    }
}

impl<T, D, C> fmt::Debug for ClusterClient<T, D, C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl<T, D, C> Actor for ClusterClient<T, D, C>
where
    T: Transport,
    D: Dispatcher,
    C: WireCodec,
{
    type Args = Self;
    type Error = Infallible;

    fn name() -> &'static str {
        "ClusterClient"
    }

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::debug!(nodes = state.router.topology().len(), "cluster client started");
        Ok(state)
    }
}

impl<T, D, C> Message<CallRequest> for ClusterClient<T, D, C>
where
    T: Transport,
    D: Dispatcher,
    C: WireCodec,
{
    type Reply = ();

    async fn handle(
        &mut self,
        request: CallRequest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let effects = self.router.handle_call(request);
        self.apply(effects);
    }
}

impl<T, D, C> Message<SocketEvent> for ClusterClient<T, D, C>
where
    T: Transport,
    D: Dispatcher,
    C: WireCodec,
{
    type Reply = ();

    async fn handle(
        &mut self,
        event: SocketEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let effects = self.router.handle_event(event);
        self.apply(effects);
    }
}

/// Asks a [`ClusterClient`] for a [`RouterSnapshot`] of its connections, queues and sessions.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inspect;

impl<T, D, C> Message<Inspect> for ClusterClient<T, D, C>
where
    T: Transport,
    D: Dispatcher,
    C: WireCodec,
{
    type Reply = RouterSnapshot;

    async fn handle(&mut self, _: Inspect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.router.snapshot()
    }
}
