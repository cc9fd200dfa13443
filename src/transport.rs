//! Transport commands and events, and a TCP transport built on tokio.
//!
//! The router never touches sockets. It asks a [`Transport`] to connect and to send, and learns
//! about the outcome later through [`SocketEvent`]s fed back into the client's mailbox.
//!
//! [`TcpTransport`] runs one task per connection. Each task connects, reports
//! [`SocketEvent::Connected`], then reads length-prefixed frames as [`SocketEvent::Data`] and
//! writes queued buffers until either side fails. It reports exactly one [`SocketEvent::Error`]
//! when the connection ends.

use std::{collections::HashMap, io};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};

use crate::{registry::ConnectionId, topology::Endpoint};

/// What a transport error refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorTarget {
    /// An established connection failed.
    Connection(ConnectionId),
    /// A connect attempt failed before any connection existed.
    Endpoint(Endpoint),
}

/// A notification from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// A connection to the endpoint was established.
    Connected {
        /// The endpoint connected to.
        endpoint: Endpoint,
        /// The new connection.
        connection: ConnectionId,
    },
    /// A connection, or a connect attempt, failed.
    Error {
        /// What failed.
        target: ErrorTarget,
        /// Why it failed.
        reason: String,
    },
    /// A frame body was read from a connection.
    Data {
        /// The connection the frame arrived on.
        connection: ConnectionId,
        /// The frame body, without its length prefix.
        bytes: Vec<u8>,
    },
}

/// Fire-and-forget socket commands.
///
/// Neither method blocks or reports failure directly; failures surface later as
/// [`SocketEvent::Error`].
pub trait Transport: Send + 'static {
    /// Starts connecting to the endpoint.
    fn connect(&mut self, endpoint: &Endpoint);

    /// Queues the buffers to be written, in order, to the connection.
    fn send(&mut self, connection: ConnectionId, buffers: Vec<Vec<u8>>);
}

/// A [`Transport`] over TCP, framing every message with a 4-byte big-endian length prefix.
#[derive(Debug)]
pub struct TcpTransport {
    last_connection: u64,
    max_frame_size: usize,
    writers: HashMap<ConnectionId, mpsc::UnboundedSender<Vec<Vec<u8>>>>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl TcpTransport {
    /// Creates a transport and the receiving end of its event channel.
    ///
    /// Inbound frame bodies larger than `max_frame_size` bytes fail their connection.
    pub fn new(max_frame_size: usize) -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = TcpTransport {
            last_connection: 0,
            max_frame_size,
            writers: HashMap::new(),
            events,
        };
        (transport, rx)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: &Endpoint) {
        self.writers.retain(|_, writer| !writer.is_closed());

        self.last_connection += 1;
        let connection = ConnectionId::new(self.last_connection);
        let (writer, outbound) = mpsc::unbounded_channel();
        self.writers.insert(connection, writer);

        tracing::debug!(%endpoint, %connection, "connecting");
        tokio::spawn(run_connection(
            connection,
            endpoint.clone(),
            outbound,
            self.events.clone(),
            self.max_frame_size,
        ));
    }

    fn send(&mut self, connection: ConnectionId, buffers: Vec<Vec<u8>>) {
        let Some(writer) = self.writers.get(&connection) else {
            tracing::warn!(%connection, "send on unknown connection");
            return;
        };
        if writer.send(buffers).is_err() {
            // The connection task has ended and reported its error.
            tracing::debug!(%connection, "send on closed connection");
            self.writers.remove(&connection);
        }
    }
}

async fn run_connection(
    connection: ConnectionId,
    endpoint: Endpoint,
    mut outbound: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
    events: mpsc::UnboundedSender<SocketEvent>,
    max_frame_size: usize,
) {
    let stream = match TcpStream::connect((endpoint.host(), endpoint.port())).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.send(SocketEvent::Error {
                target: ErrorTarget::Endpoint(endpoint),
                reason: err.to_string(),
            });
            return;
        }
    };
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(%connection, %err, "failed to set TCP_NODELAY");
    }

    let (mut reader, mut writer) = stream.into_split();
    if events
        .send(SocketEvent::Connected {
            endpoint,
            connection,
        })
        .is_err()
    {
        return;
    }

    let read_events = events.clone();
    let read_loop = async move {
        loop {
            match read_frame(&mut reader, max_frame_size).await {
                Ok(Some(bytes)) => {
                    if read_events
                        .send(SocketEvent::Data { connection, bytes })
                        .is_err()
                    {
                        return io::Error::other("event receiver dropped");
                    }
                }
                Ok(None) => {
                    return io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )
                }
                Err(err) => return err,
            }
        }
    };
    let write_loop = async move {
        while let Some(buffers) = outbound.recv().await {
            for buffer in &buffers {
                writer.write_all(buffer).await?;
            }
        }
        writer.shutdown().await?;
        Ok::<_, io::Error>(())
    };

    let reason = tokio::select! {
        err = read_loop => err.to_string(),
        res = write_loop => match res {
            Ok(()) => "transport dropped".to_string(),
            Err(err) => err.to_string(),
        },
    };
    tracing::debug!(%connection, %reason, "connection closed");
    let _ = events.send(SocketEvent::Error {
        target: ErrorTarget::Connection(connection),
        reason,
    });
}

/// Reads one length-prefixed frame body.
///
/// Returns `Ok(None)` if the stream ended cleanly before a new frame began.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if len > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the maximum of {max_frame_size}"),
        ));
    }

    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
