//! Defines error handling constructs for the cluster client.
//!
//! Errors fall into two groups. [`ErrorKind`] and [`CallError`] describe why a single remote call
//! failed, and are handed back to the original caller through a [`Dispatcher`]. [`ConfigError`]
//! and [`CodecError`] are ordinary `Result` errors returned while loading the cluster topology or
//! converting frames to and from bytes.
//!
//! Nothing in this crate is fatal to the process: a broken connection only fails the calls that
//! were routed through it.
//!
//! [`Dispatcher`]: crate::dispatch::Dispatcher

use std::{fmt, io};

use serde::{Deserialize, Serialize};

/// Why a remote call failed, as reported to the original caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The remote node name is not present in the cluster topology.
    ///
    /// The call is failed immediately and never queued.
    UnknownRemoteNode,
    /// The connection carrying the call broke, or could not be established.
    SocketDisconnected,
    /// The remote side executed the call and replied with a non-OK status code.
    RemoteExecution(u32),
    /// The call could not be encoded into a wire frame.
    MalformedRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnknownRemoteNode => write!(f, "unknown remote node"),
            ErrorKind::SocketDisconnected => write!(f, "socket disconnected"),
            ErrorKind::RemoteExecution(code) => write!(f, "remote execution error ({code})"),
            ErrorKind::MalformedRequest => write!(f, "malformed request"),
        }
    }
}

/// A failed remote call, as delivered to the original caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    /// The failure category.
    pub kind: ErrorKind,
    /// A human readable description.
    pub message: String,
}

impl CallError {
    /// Creates a new call error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CallError {
            kind,
            message: message.into(),
        }
    }
}

/// Error returned when loading the cluster topology or client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read cluster config: {0}")]
    Io(#[from] io::Error),
    /// The configuration file is not valid JSON, or has the wrong shape.
    #[error("failed to parse cluster config: {0}")]
    Json(#[from] serde_json::Error),
    /// An endpoint is not of the form `host:port`.
    #[error("invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),
}

/// Error returned by a [`WireCodec`](crate::codec::WireCodec).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// The bytes are not a valid frame.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// The frame body does not fit in the length prefix.
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
}
