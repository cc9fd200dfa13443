#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod call;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pending;
pub mod registry;
pub mod router;
pub mod session;
pub mod topology;
pub mod transport;

pub use call::{CallRequest, CallerContext, RemoteCall};
pub use client::{ClusterClient, Inspect};
pub use config::ClientConfig;
pub use dispatch::{ChannelDispatcher, Delivery, Dispatcher};
pub use error::{CallError, ErrorKind};
pub use registry::ConnectionId;
pub use router::{Router, RouterSnapshot};
pub use session::SessionId;
pub use topology::{Endpoint, Topology};
pub use transport::{SocketEvent, TcpTransport, Transport};
