//! Wire codec for cluster request and response frames.
//!
//! The [`WireCodec`] trait abstracts over the serialization used on the wire, so the router never
//! deals with bytes directly. [`MsgPackCodec`] is the default implementation: each frame is a
//! MessagePack body (via `rmp-serde`) preceded by a 4-byte big-endian length prefix.
//!
//! Encoding produces the prefix and the body as separate buffers. Decoding takes a frame body
//! only; stripping the prefix is the transport's job (see [`read_frame`]).
//!
//! [`read_frame`]: crate::transport::read_frame

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{error::CodecError, session::SessionId};

/// Status code of a successful reply.
pub const STATUS_OK: u32 = 0;

/// Size in bytes of the length prefix preceding every frame body.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// A call, as written to a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// The service hosted on the remote node.
    pub service: String,
    /// Locally minted session id, echoed back in the reply.
    pub session: SessionId,
    /// Protocol tag identifying the frame as an RPC request.
    pub tag: u32,
    /// The method to invoke.
    pub method: String,
    /// Opaque request payload.
    pub payload: Vec<u8>,
}

/// A reply, as read from a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// The session id of the request being answered.
    pub session: SessionId,
    /// [`STATUS_OK`], or a remote execution error code.
    pub status: u32,
    /// Opaque response payload.
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    /// Creates a successful reply.
    pub fn ok(session: SessionId, payload: Vec<u8>) -> Self {
        ResponseFrame {
            session,
            status: STATUS_OK,
            payload,
        }
    }

    /// Creates an error reply with the given status code.
    pub fn error(session: SessionId, status: u32) -> Self {
        ResponseFrame {
            session,
            status,
            payload: Vec::new(),
        }
    }

    /// Returns `true` if the remote side executed the call successfully.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Converts request frames to bytes and response bytes to frames.
pub trait WireCodec: Send + 'static {
    /// Encodes a request into the buffers to write, in order.
    fn encode_request(&self, request: RequestFrame) -> Result<Vec<Vec<u8>>, CodecError>;

    /// Decodes one response frame body.
    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseFrame, CodecError>;
}

/// Length-prefixed MessagePack codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Creates a new codec.
    pub fn new() -> Self {
        MsgPackCodec
    }

    /// Decodes one request frame body. Used by the serving side of the cluster.
    pub fn decode_request(&self, bytes: &[u8]) -> Result<RequestFrame, CodecError> {
        decode_body(bytes)
    }

    /// Encodes a response into the buffers to write. Used by the serving side of the cluster.
    pub fn encode_response(&self, response: &ResponseFrame) -> Result<Vec<Vec<u8>>, CodecError> {
        encode_frame(response)
    }
}

impl WireCodec for MsgPackCodec {
    fn encode_request(&self, request: RequestFrame) -> Result<Vec<Vec<u8>>, CodecError> {
        encode_frame(&request)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseFrame, CodecError> {
        decode_body(bytes)
    }
}

fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<Vec<u8>>, CodecError> {
    let body = rmp_serde::to_vec_named(value)?;
    let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge(body.len()))?;
    Ok(vec![len.to_be_bytes().to_vec(), body])
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
