//! Paired TCP session: framed reader/writer tasks over one stream.
//!
//! After a pairing handshake succeeds, the raw stream is handed to
//! [`spawn_session`].  The reader half accumulates bytes and emits one
//! [`SessionEvent::Frame`] per decoded message; the writer half drains an
//! outbound channel, encoding each message before it hits the socket.  The
//! application layer never touches the socket again — it only sees the
//! [`SessionHandle`] and the event channel.
//!
//! Framing corruption on a stream is unrecoverable: once the byte boundary is
//! lost there is no way to resynchronise, so the reader emits
//! [`SessionEvent::Corrupt`] and closes.  Only this session dies; the rest of
//! the daemon keeps running.

use std::time::Duration;

use coop_core::{encode_message, split_frame, CoopMessage, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Interval between keep-alive `Ping`s sent by the service tick.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// A session with no valid inbound frame for this long is considered dead.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Events emitted by a session's reader task to the application layer.
#[derive(Debug)]
pub enum SessionEvent {
    /// One complete frame arrived from the peer.
    Frame { uuid: String, message: CoopMessage },
    /// The peer closed the connection (EOF or I/O error).
    Closed { uuid: String },
    /// Framing was corrupted; the session was torn down.
    Corrupt { uuid: String, error: ProtocolError },
}

/// The machine's owned connection handle.
///
/// Cloning is cheap; dropping the last clone closes the writer task and with
/// it the connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<CoopMessage>,
}

impl SessionHandle {
    /// Queues a message for transmission.  Returns `false` if the session
    /// has already closed.
    pub fn send(&self, message: CoopMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Builds a handle backed by a plain channel, with no socket behind it.
    ///
    /// Tests use this to inspect what the application layer would have sent.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<CoopMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Splits `stream` into reader and writer tasks and returns the outbound
/// handle.  Inbound frames and lifecycle events arrive on `events`.
pub fn spawn_session(
    uuid: String,
    stream: TcpStream,
    events: mpsc::Sender<SessionEvent>,
) -> SessionHandle {
    let (tx, mut outbound) = mpsc::unbounded_channel::<CoopMessage>();
    let (mut read_half, mut write_half) = stream.into_split();

    // Writer: drain the outbound queue until every handle is dropped.
    let writer_uuid = uuid.clone();
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let bytes = encode_message(&message);
            if let Err(e) = write_half.write_all(&bytes).await {
                debug!("session {writer_uuid}: write failed: {e}");
                break;
            }
        }
        // Closing the write half signals EOF to the peer's reader.
        let _ = write_half.shutdown().await;
    });

    // Reader: accumulate bytes, emit one event per frame.
    tokio::spawn(async move {
        let mut buf = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            let n = match read_half.read(&mut chunk).await {
                Ok(0) => {
                    let _ = events.send(SessionEvent::Closed { uuid }).await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!("session {uuid}: read failed: {e}");
                    let _ = events.send(SessionEvent::Closed { uuid }).await;
                    return;
                }
            };
            buf.extend_from_slice(&chunk[..n]);

            loop {
                match split_frame(&mut buf) {
                    Ok(Some(message)) => {
                        let event = SessionEvent::Frame {
                            uuid: uuid.clone(),
                            message,
                        };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("session {uuid}: framing corrupted: {error}");
                        let _ = events.send(SessionEvent::Corrupt { uuid, error }).await;
                        return;
                    }
                }
            }
        }
    });

    SessionHandle { tx }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
