//! Backend socket lifecycle: connect, read loop, ordered writes, close.
//!
//! A successful [`BackendConnection::connect`] spawns two tasks:
//!
//! - a reader that splits the byte stream on the frame terminator,
//!   decodes each frame and forwards it as a [`ConnectionEvent::Message`],
//!   then emits exactly one [`ConnectionEvent::Closed`] when the stream
//!   ends for any reason;
//! - a writer that drains an unbounded queue, so frames hit the socket in
//!   the order [`BackendConnection::send`] was called.
//!
//! Reconnection is not handled here; the gateway supervisor decides when
//! to call `connect` again.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{Notify, mpsc};

use super::codec::{self, FRAME_TERMINATOR, InboundMessage};
use crate::error::GatewayError;
use crate::sync;

/// Something that happened on the backend socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A decoded inbound frame.
    Message(InboundMessage),
    /// The stream ended. Sent exactly once per connection.
    Closed,
}

/// Owner of the single backend socket.
#[derive(Debug, Default)]
pub struct BackendConnection {
    link: Mutex<Option<Link>>,
}

#[derive(Debug)]
struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    close: Arc<Notify>,
}

impl BackendConnection {
    /// Creates a disconnected connection handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes one connection attempt to the Unix socket at `address`.
    ///
    /// On success returns the receiver of this connection's events.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] if the socket cannot be
    /// reached. No retry is attempted.
    pub async fn connect(
        &self,
        address: &Path,
    ) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>, GatewayError> {
        let stream = UnixStream::connect(address).await.map_err(|err| {
            GatewayError::BackendUnavailable(format!(
                "unable to connect to {}: {err}",
                address.display()
            ))
        })?;
        tracing::info!(address = %address.display(), "klippy connection established");
        Ok(self.attach(stream))
    }

    /// Takes ownership of an already-open stream and starts its reader and
    /// writer tasks. Any previous stream is closed first.
    pub fn attach<S>(&self, stream: S) -> mpsc::UnboundedReceiver<ConnectionEvent>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let close = Arc::new(Notify::new());

        tokio::spawn(write_frames(writer, outbound_rx, Arc::clone(&close)));
        tokio::spawn(read_frames(reader, event_tx, Arc::clone(&close)));

        let previous = sync::lock(&self.link).replace(Link {
            outbound: outbound_tx,
            close,
        });
        if let Some(previous) = previous {
            tracing::warn!("replacing an open klippy connection");
            previous.close.notify_one();
        }
        event_rx
    }

    /// Queues one encoded frame for writing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] immediately when no
    /// connection is active; nothing is queued in that case.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), GatewayError> {
        let link = sync::lock(&self.link);
        let Some(link) = link.as_ref() else {
            return Err(GatewayError::not_connected());
        };
        link.outbound
            .send(frame)
            .map_err(|_| GatewayError::not_connected())
    }

    /// Returns `true` while a stream is attached and its writer is alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        sync::lock(&self.link)
            .as_ref()
            .is_some_and(|link| !link.outbound.is_closed())
    }

    /// Closes the socket if one is open. Safe to call repeatedly.
    pub fn close(&self) {
        if let Some(link) = sync::lock(&self.link).take() {
            tracing::debug!("closing klippy connection");
            link.close.notify_one();
        }
    }
}

/// Reads terminator-delimited frames until the stream ends or `close` is
/// notified, then reports [`ConnectionEvent::Closed`] once.
///
/// Malformed frames are logged and skipped; the stream stays in sync
/// because every frame boundary is a terminator byte.
pub(crate) async fn read_frames<R>(
    reader: R,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    close: Arc<Notify>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(4096);

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(FRAME_TERMINATOR, &mut buf) => read,
            () = close.notified() => break,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() != Some(&FRAME_TERMINATOR) {
                    tracing::debug!(bytes = buf.len(), "discarding partial frame at end of stream");
                    break;
                }
                match codec::decode_frame(&buf) {
                    Ok(message) => {
                        if events.send(ConnectionEvent::Message(message)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            frame = %String::from_utf8_lossy(&buf),
                            "error processing klippy host response"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "klippy stream read error");
                break;
            }
        }
    }

    tracing::info!("klippy stream closed");
    let _ = events.send(ConnectionEvent::Closed);
}

/// Writes queued frames in order. A failed write closes the connection so
/// the reader reports the closure.
async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    close: Arc<Notify>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            tracing::warn!(error = %err, "klippy write failed; closing connection");
            close.notify_one();
            return;
        }
    }
    let _ = writer.shutdown().await;
}
