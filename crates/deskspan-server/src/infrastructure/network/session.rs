//! Per-client session I/O.
//!
//! Each admitted connection runs two tasks.  The *reader* turns the byte
//! stream into whole messages and posts them to the server as
//! [`SessionEvent`]s; it also drives the heartbeat, answering inbound silence
//! with `CALV` and declaring the peer dead after
//! [`HEART_DEATH_FACTOR`] quiet intervals.  The *writer* drains the session's
//! outbound queue, collapsing backlogged mouse motion so a slow link never
//! replays stale positions.
//!
//! Neither task touches server state; everything flows through channels.

use deskspan_core::protocol::{Message, ProtocolError, HEART_DEATH_FACTOR, HEART_RATE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::application::server::{ServerEvent, SessionEvent};
use crate::application::ClientId;

/// Collapses each run of consecutive mouse moves to its final position.
/// Ordering against other messages is preserved.
pub fn coalesce_motion(batch: &mut Vec<Message>) {
    let mut kept: Vec<Message> = Vec::with_capacity(batch.len());
    for msg in batch.drain(..) {
        if matches!(msg, Message::MouseMove { .. }) {
            if let Some(last) = kept.last_mut() {
                if matches!(last, Message::MouseMove { .. }) {
                    *last = msg;
                    continue;
                }
            }
        }
        kept.push(msg);
    }
    *batch = kept;
}

/// Messages a client may legitimately send.  Heartbeats and no-ops only feed
/// liveness; anything else on the list becomes a [`SessionEvent`].
fn translate(msg: Message) -> Result<Option<SessionEvent>, ()> {
    match msg {
        Message::Info(info) => Ok(Some(SessionEvent::Info(info))),
        Message::GrabClipboard { id, seq_num } => {
            Ok(Some(SessionEvent::ClipboardGrab { id, seq_num }))
        }
        Message::ClipboardData { id, seq_num, data } => {
            Ok(Some(SessionEvent::ClipboardData { id, seq_num, data }))
        }
        Message::KeepAlive | Message::Noop => Ok(None),
        other => {
            warn!(code = other.code(), "unexpected message from client");
            Err(())
        }
    }
}

/// Reads, frames, and dispatches inbound traffic until the peer disconnects,
/// goes silent, or violates the protocol.
pub async fn run_session_reader<R>(
    id: ClientId,
    mut reader: R,
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<ServerEvent>,
) where
    R: AsyncRead + Unpin,
{
    let death = HEART_RATE * HEART_DEATH_FACTOR;
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut scratch = [0u8; 4096];
    let mut last_inbound = Instant::now();

    loop {
        // Drain every whole message already buffered.
        loop {
            match Message::decode(&buf) {
                Ok((msg, consumed)) => {
                    buf.drain(..consumed);
                    match translate(msg) {
                        Ok(Some(event)) => post(&events, id, event),
                        Ok(None) => {}
                        Err(()) => {
                            post(&events, id, SessionEvent::ProtocolError);
                            return;
                        }
                    }
                }
                Err(ProtocolError::Truncated { .. }) => break,
                Err(e) => {
                    warn!(client = %id, error = %e, "bad message from client");
                    post(&events, id, SessionEvent::ProtocolError);
                    return;
                }
            }
        }

        match tokio::time::timeout(HEART_RATE, reader.read(&mut scratch)).await {
            // Idle: heartbeat, and give up on a peer that stayed silent for
            // the whole death budget.
            Err(_) => {
                if last_inbound.elapsed() >= death {
                    debug!(client = %id, "peer silent past heartbeat budget");
                    post(&events, id, SessionEvent::Disconnected);
                    return;
                }
                let _ = outbound.send(Message::KeepAlive);
            }
            Ok(Ok(0)) => {
                debug!(client = %id, "peer closed the connection");
                post(&events, id, SessionEvent::Disconnected);
                return;
            }
            Ok(Ok(n)) => {
                last_inbound = Instant::now();
                buf.extend_from_slice(&scratch[..n]);
            }
            Ok(Err(e)) => {
                debug!(client = %id, error = %e, "read failed");
                post(&events, id, SessionEvent::Disconnected);
                return;
            }
        }
    }
}

fn post(events: &mpsc::UnboundedSender<ServerEvent>, id: ClientId, event: SessionEvent) {
    let _ = events.send(ServerEvent::Session(id, event));
}

/// Drains the outbound queue onto the socket.  Ends when the queue closes,
/// the socket fails, or after flushing a goodbye/error advisory.
pub async fn run_session_writer<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<Message> = Vec::new();
    loop {
        let Some(first) = outbound.recv().await else { return };
        batch.clear();
        batch.push(first);
        while let Ok(msg) = outbound.try_recv() {
            batch.push(msg);
        }
        coalesce_motion(&mut batch);

        let mut bytes = Vec::new();
        for msg in &batch {
            msg.encode(&mut bytes);
        }
        if writer.write_all(&bytes).await.is_err() {
            return;
        }

        // An advisory is the last thing a session says; flush it and half
        // close so the peer sees a clean end of stream.
        if batch.iter().any(is_final_message) {
            let _ = writer.shutdown().await;
            return;
        }
    }
}

fn is_final_message(msg: &Message) -> bool {
    matches!(
        msg,
        Message::CloseDown
            | Message::ErrBad
            | Message::ErrBusy
            | Message::ErrUnknown
            | Message::Incompatible { .. }
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use deskspan_core::protocol::{ClientInfo, ClipboardId};

    fn mouse(x: i16, y: i16) -> Message {
        Message::MouseMove { x, y }
    }

    // ── coalesce_motion ───────────────────────────────────────────────────────

    #[test]
    fn test_coalesce_collapses_a_burst_to_the_final_position() {
        let mut batch = vec![mouse(1, 1), mouse(2, 2), mouse(3, 3), mouse(4, 4)];
        coalesce_motion(&mut batch);
        assert_eq!(batch, vec![mouse(4, 4)]);
    }

    #[test]
    fn test_coalesce_preserves_ordering_around_other_messages() {
        let mut batch = vec![
            mouse(1, 1),
            mouse(2, 2),
            Message::MouseDown { button: 1 },
            mouse(3, 3),
            mouse(4, 4),
        ];
        coalesce_motion(&mut batch);
        assert_eq!(
            batch,
            vec![mouse(2, 2), Message::MouseDown { button: 1 }, mouse(4, 4)]
        );
    }

    #[test]
    fn test_coalesce_leaves_motionless_batches_alone() {
        let mut batch = vec![Message::KeepAlive, Message::LeaveScreen];
        coalesce_motion(&mut batch);
        assert_eq!(batch, vec![Message::KeepAlive, Message::LeaveScreen]);
    }

    #[test]
    fn test_coalesce_on_empty_batch() {
        let mut batch = Vec::new();
        coalesce_motion(&mut batch);
        assert!(batch.is_empty());
    }

    // ── Reader ────────────────────────────────────────────────────────────────

    fn start_reader(
        read_half: tokio::io::DuplexStream,
    ) -> (
        mpsc::UnboundedReceiver<ServerEvent>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_session_reader(ClientId(7), read_half, out_tx, event_tx));
        (event_rx, out_rx)
    }

    #[tokio::test]
    async fn test_reader_frames_and_forwards_client_messages() {
        let (mut local, remote) = tokio::io::duplex(256);
        let (mut events, _out) = start_reader(remote);

        let info = ClientInfo {
            x: 0,
            y: 0,
            width: 1280,
            height: 1024,
            zone_size: 1,
            mouse_x: 10,
            mouse_y: 20,
        };
        local.write_all(&Message::Info(info).encoded()).await.unwrap();
        local
            .write_all(
                &Message::GrabClipboard { id: ClipboardId::Clipboard, seq_num: 3 }.encoded(),
            )
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            ServerEvent::Session(ClientId(7), SessionEvent::Info(i)) if i == info
        ));
        let second = events.recv().await.unwrap();
        assert!(matches!(
            second,
            ServerEvent::Session(_, SessionEvent::ClipboardGrab { seq_num: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_reader_reassembles_a_message_split_across_reads() {
        let (mut local, remote) = tokio::io::duplex(256);
        let (mut events, _out) = start_reader(remote);

        let bytes = Message::GrabClipboard { id: ClipboardId::Selection, seq_num: 9 }.encoded();
        let (head, tail) = bytes.split_at(5);
        local.write_all(head).await.unwrap();
        tokio::task::yield_now().await;
        local.write_all(tail).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::Session(_, SessionEvent::ClipboardGrab { seq_num: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_reader_reports_protocol_error_on_garbage() {
        let (mut local, remote) = tokio::io::duplex(256);
        let (mut events, _out) = start_reader(remote);

        local.write_all(b"XXXXnonsense").await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::Session(_, SessionEvent::ProtocolError)
        ));
    }

    #[tokio::test]
    async fn test_reader_rejects_server_only_messages() {
        let (mut local, remote) = tokio::io::duplex(256);
        let (mut events, _out) = start_reader(remote);

        // A client has no business sending an enter.
        local
            .write_all(
                &Message::EnterScreen { x: 0, y: 0, seq_num: 1, modifier_mask: 0 }.encoded(),
            )
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::Session(_, SessionEvent::ProtocolError)
        ));
    }

    #[tokio::test]
    async fn test_reader_reports_disconnect_on_peer_close() {
        let (local, remote) = tokio::io::duplex(256);
        let (mut events, _out) = start_reader(remote);

        drop(local);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::Session(_, SessionEvent::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_heartbeats_when_idle_then_gives_up() {
        let (local, remote) = tokio::io::duplex(256);
        let (mut events, mut out) = start_reader(remote);

        // First quiet interval: a heartbeat goes out.
        let beat = out.recv().await.unwrap();
        assert_eq!(beat, Message::KeepAlive);
        assert!(events.try_recv().is_err(), "one quiet interval is not fatal");

        // Second quiet interval: the peer is dead.
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::Session(_, SessionEvent::Disconnected)
        ));
        drop(local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_keep_alive_only_feeds_liveness() {
        let (mut local, remote) = tokio::io::duplex(256);
        let (mut events, _out) = start_reader(remote);

        // A steady heartbeat keeps the session alive well past the death
        // budget without producing any server events.
        for _ in 0..5u32 {
            local.write_all(&Message::KeepAlive.encoded()).await.unwrap();
            tokio::time::sleep(HEART_RATE).await;
        }
        assert!(events.try_recv().is_err());
        drop(local);
    }

    // ── Writer ────────────────────────────────────────────────────────────────

    async fn read_messages(
        remote: &mut tokio::io::DuplexStream,
        expected: usize,
    ) -> Vec<Message> {
        let mut buf = Vec::new();
        let mut scratch = [0u8; 1024];
        let mut out = Vec::new();
        while out.len() < expected {
            let n = remote.read(&mut scratch).await.unwrap();
            assert!(n > 0, "stream closed early");
            buf.extend_from_slice(&scratch[..n]);
            loop {
                match Message::decode(&buf) {
                    Ok((msg, consumed)) => {
                        buf.drain(..consumed);
                        out.push(msg);
                    }
                    Err(ProtocolError::Truncated { .. }) => break,
                    Err(e) => panic!("bad bytes from writer: {e}"),
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_writer_coalesces_backlogged_motion() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();

        // Queue a backlog before the writer starts, so it all lands in one
        // batch: only the final position may reach the wire.
        for i in 1..=50i16 {
            tx.send(mouse(i, i)).unwrap();
        }
        tx.send(Message::MouseDown { button: 1 }).unwrap();
        tokio::spawn(run_session_writer(local, rx));

        let messages = read_messages(&mut remote, 2).await;
        assert_eq!(messages, vec![mouse(50, 50), Message::MouseDown { button: 1 }]);
    }

    #[tokio::test]
    async fn test_writer_closes_the_stream_after_a_goodbye() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Message::CloseDown).unwrap();
        tokio::spawn(run_session_writer(local, rx));

        let messages = read_messages(&mut remote, 1).await;
        assert_eq!(messages, vec![Message::CloseDown]);
        // End of stream follows the advisory.
        let mut scratch = [0u8; 16];
        assert_eq!(remote.read(&mut scratch).await.unwrap(), 0);
    }
}
