//! TCP listener and connection greeting.
//!
//! The accept loop owns no server state.  Each connection gets a greeting
//! task that advertises our protocol version, reads the client's reply, and
//! either refuses the peer (`EICV` for a version we cannot serve, `EBAD` for
//! a reply that is not a greeting at all) or hands a [`PendingSession`] — a
//! fresh id, the requested screen name, and the spawned reader/writer
//! tasks — to the server, which decides admission by name.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use deskspan_core::protocol::{
    decode_hello_back, encode_hello, Message, ProtocolError, PROTOCOL_MAJOR, PROTOCOL_MINOR,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::server::{PendingSession, ServerEvent};
use crate::application::ClientId;
use crate::infrastructure::network::session::{run_session_reader, run_session_writer};

/// How long a freshly accepted connection may take to finish the greeting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Session id allocator; ids are never reused within a server run.
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Accepts connections forever, spawning a greeting task per socket.
pub fn spawn_accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = ClientId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
                    debug!(client = %id, %peer, "accepted connection");
                    tokio::spawn(handshake(id, stream, events.clone()));
                }
                Err(e) => {
                    // Transient accept failures (EMFILE and friends) resolve
                    // themselves; don't spin on them.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

async fn handshake(id: ClientId, stream: TcpStream, events: mpsc::UnboundedSender<ServerEvent>) {
    stream.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = stream.into_split();

    if write_half
        .write_all(&encode_hello(PROTOCOL_MAJOR, PROTOCOL_MINOR))
        .await
        .is_err()
    {
        return;
    }

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_hello(&mut read_half)).await;
    match reply {
        Ok(Ok((major, minor, name))) => {
            // Equal or newer clients are accepted; only peers older than us
            // cannot be served.
            if major < PROTOCOL_MAJOR || (major == PROTOCOL_MAJOR && minor < PROTOCOL_MINOR) {
                warn!(client = %id, major, minor, "incompatible client version");
                let msg = Message::Incompatible {
                    major: PROTOCOL_MAJOR,
                    minor: PROTOCOL_MINOR,
                };
                let _ = write_half.write_all(&msg.encoded()).await;
                let _ = write_half.shutdown().await;
                return;
            }

            info!(client = %id, name = %name, major, minor, "client greeting accepted");
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let reader = tokio::spawn(run_session_reader(
                id,
                read_half,
                outbound.clone(),
                events.clone(),
            ));
            let writer = tokio::spawn(run_session_writer(write_half, outbound_rx));
            let _ = events.send(ServerEvent::Accepted(PendingSession {
                id,
                name,
                outbound,
                tasks: vec![reader, writer],
            }));
        }
        Ok(Err(e)) => {
            warn!(client = %id, error = %e, "bad greeting");
            let _ = write_half.write_all(&Message::ErrBad.encoded()).await;
            let _ = write_half.shutdown().await;
        }
        Err(_) => {
            warn!(client = %id, "greeting timed out");
            let _ = write_half.write_all(&Message::ErrBad.encoded()).await;
            let _ = write_half.shutdown().await;
        }
    }
}

/// Reads the client's greeting, tolerating arbitrary packetization.
async fn read_hello<R>(reader: &mut R) -> Result<(u16, u16, String), HelloError>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(64);
    let mut scratch = [0u8; 256];
    loop {
        match decode_hello_back(&buf) {
            Ok(((major, minor, name), _)) => return Ok((major, minor, name)),
            Err(ProtocolError::Truncated { .. }) => {}
            Err(e) => return Err(HelloError::Protocol(e)),
        }
        let n = reader.read(&mut scratch).await.map_err(HelloError::Io)?;
        if n == 0 {
            return Err(HelloError::Closed);
        }
        buf.extend_from_slice(&scratch[..n]);
    }
}

#[derive(Debug, thiserror::Error)]
enum HelloError {
    #[error("connection closed during greeting")]
    Closed,
    #[error(transparent)]
    Protocol(ProtocolError),
    #[error(transparent)]
    Io(std::io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
