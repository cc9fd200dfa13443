//! Delivery of call outcomes back to the original callers.

use tokio::sync::mpsc;

use crate::{
    call::CallerContext,
    error::{CallError, ErrorKind},
};

/// Returns results to the original caller through the service dispatch layer.
///
/// Every call routed by a [`ClusterClient`](crate::client::ClusterClient) is answered through
/// exactly one of these methods, at most once, unless it is still in flight.
pub trait Dispatcher: Send + 'static {
    /// Delivers a successful reply payload.
    fn deliver_response(&mut self, caller: CallerContext, payload: Vec<u8>);

    /// Delivers a failure.
    fn deliver_error(&mut self, caller: CallerContext, kind: ErrorKind, message: String);
}

/// The outcome of one call, as sent by [`ChannelDispatcher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// The caller being answered.
    pub caller: CallerContext,
    /// The reply payload, or why the call failed.
    pub outcome: Result<Vec<u8>, CallError>,
}

/// A [`Dispatcher`] forwarding every outcome over an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelDispatcher { tx }, rx)
    }

    fn deliver(&self, delivery: Delivery) {
        if let Err(mpsc::error::SendError(delivery)) = self.tx.send(delivery) {
            tracing::warn!(
                caller = delivery.caller.id,
                caller_session = delivery.caller.session,
                "delivery receiver dropped, discarding call outcome"
            );
        }
    }
}

impl Dispatcher for ChannelDispatcher {
    fn deliver_response(&mut self, caller: CallerContext, payload: Vec<u8>) {
        self.deliver(Delivery {
            caller,
            outcome: Ok(payload),
        });
    }

    fn deliver_error(&mut self, caller: CallerContext, kind: ErrorKind, message: String) {
        self.deliver(Delivery {
            caller,
            outcome: Err(CallError { kind, message }),
        });
    }
}
