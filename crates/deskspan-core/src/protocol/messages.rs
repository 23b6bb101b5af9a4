//! Typed protocol messages.
//!
//! Every message starts with a four-byte ASCII code followed by a positional
//! payload.  The first letter groups the codes: `C` for commands, `D` for
//! data, `Q` for queries, `E` for errors.  Each code's payload shape is fixed
//! by a format string (see [`codec`](super::codec)); the same string is used
//! to encode and, with the code prefix stripped, to decode.
//!
//! All integers are big-endian.  Strings carry a 4-byte length prefix and no
//! terminator.

use std::time::Duration;

use super::codec::{readf, writef, ProtocolError, WireArg, WireValue};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version advertised in the connection greeting.
pub const PROTOCOL_MAJOR: u16 = 1;
pub const PROTOCOL_MINOR: u16 = 3;

/// Idle interval after which a session emits a heartbeat.
pub const HEART_RATE: Duration = Duration::from_secs(2);

/// A peer silent for this multiple of [`HEART_RATE`] is considered dead.
pub const HEART_DEATH_FACTOR: u32 = 2;

// ── Message format strings ────────────────────────────────────────────────────
//
// The leading four characters are the wire code; the remainder describes the
// payload.  Decoders strip the code with `fmt[4..]`.

const FMT_ENTER: &str = "CINN%2i%2i%4i%2i";
const FMT_LEAVE: &str = "COUT";
const FMT_NOOP: &str = "CNOP";
const FMT_KEEP_ALIVE: &str = "CALV";
const FMT_CLOSE_DOWN: &str = "CBYE";
const FMT_CLIPBOARD_GRAB: &str = "CCLP%1i%4i";
const FMT_SCREENSAVER: &str = "CSEC%1i";
const FMT_INFO_ACK: &str = "CIAK";
const FMT_RESET_OPTIONS: &str = "CROP";
const FMT_KEY_DOWN: &str = "DKDN%2i%2i%2i";
const FMT_KEY_REPEAT: &str = "DKRP%2i%2i%2i%2i";
const FMT_KEY_UP: &str = "DKUP%2i%2i%2i";
const FMT_MOUSE_DOWN: &str = "DMDN%1i";
const FMT_MOUSE_UP: &str = "DMUP%1i";
const FMT_MOUSE_MOVE: &str = "DMMV%2i%2i";
const FMT_MOUSE_WHEEL: &str = "DMWM%2i";
const FMT_CLIPBOARD_DATA: &str = "DCLP%1i%4i%s";
const FMT_INFO: &str = "DINF%2i%2i%2i%2i%2i%2i%2i";
const FMT_QUERY_INFO: &str = "QINF";
const FMT_INCOMPATIBLE: &str = "EICV%2i%2i";
const FMT_BUSY: &str = "EBSY";
const FMT_UNKNOWN: &str = "EUNK";
const FMT_BAD: &str = "EBAD";

const FMT_HELLO: &str = "Synergy%2i%2i";
const FMT_HELLO_BACK: &str = "Synergy%2i%2i%s";

// Option assignments are a count followed by that many id/value pairs, which
// the fixed-arity format grammar cannot express; encode/decode handle the
// repetition by hand around this prefix.
const FMT_SET_OPTIONS: &str = "DSOP%4i";

// ── Clipboard identifiers ─────────────────────────────────────────────────────

/// The two replicated clipboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClipboardId {
    /// The explicit copy/paste clipboard.
    Clipboard = 0,
    /// The X11-style primary selection.
    Selection = 1,
}

/// Number of clipboard slots carried by the protocol.
pub const CLIPBOARD_COUNT: usize = 2;

impl ClipboardId {
    /// All clipboard slots, in id order.
    pub const ALL: [ClipboardId; CLIPBOARD_COUNT] = [ClipboardId::Clipboard, ClipboardId::Selection];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for ClipboardId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(ClipboardId::Clipboard),
            1 => Ok(ClipboardId::Selection),
            _ => Err(()),
        }
    }
}

// ── Client info ───────────────────────────────────────────────────────────────

/// Screen geometry reported by a client in `DINF`.
///
/// Coordinates are in the client's own pixel space; the server never compares
/// raw coordinates across screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    /// Origin of the client's screen rectangle (zero in practice).
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    /// Jump-zone thickness along the client's edges, in pixels.
    pub zone_size: u16,
    /// Current mouse position on the client.
    pub mouse_x: i16,
    pub mouse_y: i16,
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `CINN`: the cursor entered this screen at (x, y).  Carries the enter
    /// sequence number and the current toggle-modifier mask.
    EnterScreen { x: i16, y: i16, seq_num: u32, modifier_mask: u16 },
    /// `COUT`: the cursor left this screen.
    LeaveScreen,
    /// `CNOP`: accepted and discarded.
    Noop,
    /// `CALV`: heartbeat.
    KeepAlive,
    /// `CBYE`: the peer should disconnect.
    CloseDown,
    /// `CCLP`: take ownership of a clipboard.
    GrabClipboard { id: ClipboardId, seq_num: u32 },
    /// `CSEC`: screensaver started or stopped.
    Screensaver { on: bool },
    /// `CIAK`: client info was received; motion may resume.
    InfoAck,
    /// `CROP`: revert options to defaults.
    ResetOptions,
    /// `DKDN`
    KeyDown { key: u16, mask: u16, button: u16 },
    /// `DKRP`
    KeyRepeat { key: u16, mask: u16, count: u16, button: u16 },
    /// `DKUP`
    KeyUp { key: u16, mask: u16, button: u16 },
    /// `DMDN`
    MouseDown { button: u8 },
    /// `DMUP`
    MouseUp { button: u8 },
    /// `DMMV`: absolute mouse position on the receiving screen.
    MouseMove { x: i16, y: i16 },
    /// `DMWM`
    MouseWheel { delta: i16 },
    /// `DCLP`: clipboard contents in marshalled form.
    ClipboardData { id: ClipboardId, seq_num: u32, data: Vec<u8> },
    /// `DINF`: the client's shape and jump zone.
    Info(ClientInfo),
    /// `DSOP`: option id/value assignments.
    SetOptions { options: Vec<(u32, u32)> },
    /// `QINF`: ask the client to report its info.
    QueryInfo,
    /// `EICV`: versions are incompatible; carries the sender's version.
    Incompatible { major: u16, minor: u16 },
    /// `EBSY`: the screen name is already connected.
    ErrBusy,
    /// `EUNK`: the screen name is not in the configuration.
    ErrUnknown,
    /// `EBAD`: the peer violated the protocol.
    ErrBad,
}

impl Message {
    /// The four-character wire code, for logging.
    pub fn code(&self) -> &'static str {
        &self.fmt()[..4]
    }

    fn fmt(&self) -> &'static str {
        match self {
            Message::EnterScreen { .. } => FMT_ENTER,
            Message::LeaveScreen => FMT_LEAVE,
            Message::Noop => FMT_NOOP,
            Message::KeepAlive => FMT_KEEP_ALIVE,
            Message::CloseDown => FMT_CLOSE_DOWN,
            Message::GrabClipboard { .. } => FMT_CLIPBOARD_GRAB,
            Message::Screensaver { .. } => FMT_SCREENSAVER,
            Message::InfoAck => FMT_INFO_ACK,
            Message::ResetOptions => FMT_RESET_OPTIONS,
            Message::KeyDown { .. } => FMT_KEY_DOWN,
            Message::KeyRepeat { .. } => FMT_KEY_REPEAT,
            Message::KeyUp { .. } => FMT_KEY_UP,
            Message::MouseDown { .. } => FMT_MOUSE_DOWN,
            Message::MouseUp { .. } => FMT_MOUSE_UP,
            Message::MouseMove { .. } => FMT_MOUSE_MOVE,
            Message::MouseWheel { .. } => FMT_MOUSE_WHEEL,
            Message::ClipboardData { .. } => FMT_CLIPBOARD_DATA,
            Message::Info(_) => FMT_INFO,
            Message::SetOptions { .. } => FMT_SET_OPTIONS,
            Message::QueryInfo => FMT_QUERY_INFO,
            Message::Incompatible { .. } => FMT_INCOMPATIBLE,
            Message::ErrBusy => FMT_BUSY,
            Message::ErrUnknown => FMT_UNKNOWN,
            Message::ErrBad => FMT_BAD,
        }
    }

    /// Encodes the message, appending to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Message::EnterScreen { x, y, seq_num, modifier_mask } => writef(
                out,
                FMT_ENTER,
                &[
                    WireArg::Int(*x as u16 as u32),
                    WireArg::Int(*y as u16 as u32),
                    WireArg::Int(*seq_num),
                    WireArg::Int(u32::from(*modifier_mask)),
                ],
            ),
            Message::GrabClipboard { id, seq_num } => writef(
                out,
                FMT_CLIPBOARD_GRAB,
                &[WireArg::Int(u32::from(*id as u8)), WireArg::Int(*seq_num)],
            ),
            Message::Screensaver { on } => {
                writef(out, FMT_SCREENSAVER, &[WireArg::Int(u32::from(*on))])
            }
            Message::KeyDown { key, mask, button } => writef(
                out,
                FMT_KEY_DOWN,
                &[
                    WireArg::Int(u32::from(*key)),
                    WireArg::Int(u32::from(*mask)),
                    WireArg::Int(u32::from(*button)),
                ],
            ),
            Message::KeyRepeat { key, mask, count, button } => writef(
                out,
                FMT_KEY_REPEAT,
                &[
                    WireArg::Int(u32::from(*key)),
                    WireArg::Int(u32::from(*mask)),
                    WireArg::Int(u32::from(*count)),
                    WireArg::Int(u32::from(*button)),
                ],
            ),
            Message::KeyUp { key, mask, button } => writef(
                out,
                FMT_KEY_UP,
                &[
                    WireArg::Int(u32::from(*key)),
                    WireArg::Int(u32::from(*mask)),
                    WireArg::Int(u32::from(*button)),
                ],
            ),
            Message::MouseDown { button } => {
                writef(out, FMT_MOUSE_DOWN, &[WireArg::Int(u32::from(*button))])
            }
            Message::MouseUp { button } => {
                writef(out, FMT_MOUSE_UP, &[WireArg::Int(u32::from(*button))])
            }
            Message::MouseMove { x, y } => writef(
                out,
                FMT_MOUSE_MOVE,
                &[WireArg::Int(*x as u16 as u32), WireArg::Int(*y as u16 as u32)],
            ),
            Message::MouseWheel { delta } => {
                writef(out, FMT_MOUSE_WHEEL, &[WireArg::Int(*delta as u16 as u32)])
            }
            Message::ClipboardData { id, seq_num, data } => writef(
                out,
                FMT_CLIPBOARD_DATA,
                &[
                    WireArg::Int(u32::from(*id as u8)),
                    WireArg::Int(*seq_num),
                    WireArg::Bytes(data),
                ],
            ),
            Message::Info(info) => writef(
                out,
                FMT_INFO,
                &[
                    WireArg::Int(info.x as u16 as u32),
                    WireArg::Int(info.y as u16 as u32),
                    WireArg::Int(u32::from(info.width)),
                    WireArg::Int(u32::from(info.height)),
                    WireArg::Int(u32::from(info.zone_size)),
                    WireArg::Int(info.mouse_x as u16 as u32),
                    WireArg::Int(info.mouse_y as u16 as u32),
                ],
            ),
            Message::SetOptions { options } => {
                writef(out, FMT_SET_OPTIONS, &[WireArg::Int(options.len() as u32)]);
                for (id, value) in options {
                    writef(out, "%4i%4i", &[WireArg::Int(*id), WireArg::Int(*value)]);
                }
            }
            Message::Incompatible { major, minor } => writef(
                out,
                FMT_INCOMPATIBLE,
                &[WireArg::Int(u32::from(*major)), WireArg::Int(u32::from(*minor))],
            ),
            // Codes with no payload.
            Message::LeaveScreen
            | Message::Noop
            | Message::KeepAlive
            | Message::CloseDown
            | Message::InfoAck
            | Message::ResetOptions
            | Message::QueryInfo
            | Message::ErrBusy
            | Message::ErrUnknown
            | Message::ErrBad => writef(out, self.fmt(), &[]),
        }
    }

    /// Encodes into a fresh buffer.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decodes one message from the front of `buf`, returning it together
    /// with the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] means the buffer holds a message prefix
    /// and the caller should retry with more data.  [`ProtocolError::UnknownCode`]
    /// and [`ProtocolError::LiteralMismatch`] are unrecoverable for the
    /// stream.
    pub fn decode(buf: &[u8]) -> Result<(Message, usize), ProtocolError> {
        if buf.len() < 4 {
            return Err(ProtocolError::Truncated { needed: 4, available: buf.len() });
        }
        let code: [u8; 4] = [buf[0], buf[1], buf[2], buf[3]];
        let body = &buf[4..];

        // Payload formats skip the four-byte code; `consumed` counts it back in.
        let payload = |fmt: &str| -> Result<(Vec<WireValue>, usize), ProtocolError> {
            let (values, n) = readf(body, &fmt[4..]).map_err(grow_by_code)?;
            Ok((values, n + 4))
        };

        match &code {
            b"CINN" => {
                let (v, n) = payload(FMT_ENTER)?;
                Ok((
                    Message::EnterScreen {
                        x: v[0].as_int() as u16 as i16,
                        y: v[1].as_int() as u16 as i16,
                        seq_num: v[2].as_int(),
                        modifier_mask: v[3].as_int() as u16,
                    },
                    n,
                ))
            }
            b"COUT" => Ok((Message::LeaveScreen, 4)),
            b"CNOP" => Ok((Message::Noop, 4)),
            b"CALV" => Ok((Message::KeepAlive, 4)),
            b"CBYE" => Ok((Message::CloseDown, 4)),
            b"CCLP" => {
                let (v, n) = payload(FMT_CLIPBOARD_GRAB)?;
                let id = clipboard_id(v[0].as_int())?;
                Ok((Message::GrabClipboard { id, seq_num: v[1].as_int() }, n))
            }
            b"CSEC" => {
                let (v, n) = payload(FMT_SCREENSAVER)?;
                Ok((Message::Screensaver { on: v[0].as_int() != 0 }, n))
            }
            b"CIAK" => Ok((Message::InfoAck, 4)),
            b"CROP" => Ok((Message::ResetOptions, 4)),
            b"DKDN" => {
                let (v, n) = payload(FMT_KEY_DOWN)?;
                Ok((
                    Message::KeyDown {
                        key: v[0].as_int() as u16,
                        mask: v[1].as_int() as u16,
                        button: v[2].as_int() as u16,
                    },
                    n,
                ))
            }
            b"DKRP" => {
                let (v, n) = payload(FMT_KEY_REPEAT)?;
                Ok((
                    Message::KeyRepeat {
                        key: v[0].as_int() as u16,
                        mask: v[1].as_int() as u16,
                        count: v[2].as_int() as u16,
                        button: v[3].as_int() as u16,
                    },
                    n,
                ))
            }
            b"DKUP" => {
                let (v, n) = payload(FMT_KEY_UP)?;
                Ok((
                    Message::KeyUp {
                        key: v[0].as_int() as u16,
                        mask: v[1].as_int() as u16,
                        button: v[2].as_int() as u16,
                    },
                    n,
                ))
            }
            b"DMDN" => {
                let (v, n) = payload(FMT_MOUSE_DOWN)?;
                Ok((Message::MouseDown { button: v[0].as_int() as u8 }, n))
            }
            b"DMUP" => {
                let (v, n) = payload(FMT_MOUSE_UP)?;
                Ok((Message::MouseUp { button: v[0].as_int() as u8 }, n))
            }
            b"DMMV" => {
                let (v, n) = payload(FMT_MOUSE_MOVE)?;
                Ok((
                    Message::MouseMove {
                        x: v[0].as_int() as u16 as i16,
                        y: v[1].as_int() as u16 as i16,
                    },
                    n,
                ))
            }
            b"DMWM" => {
                let (v, n) = payload(FMT_MOUSE_WHEEL)?;
                Ok((Message::MouseWheel { delta: v[0].as_int() as u16 as i16 }, n))
            }
            b"DCLP" => {
                let (mut v, n) = payload(FMT_CLIPBOARD_DATA)?;
                let id = clipboard_id(v[0].as_int())?;
                let seq_num = v[1].as_int();
                let data = v.pop().map(WireValue::into_bytes).unwrap_or_default();
                Ok((Message::ClipboardData { id, seq_num, data }, n))
            }
            b"DINF" => {
                let (v, n) = payload(FMT_INFO)?;
                Ok((
                    Message::Info(ClientInfo {
                        x: v[0].as_int() as u16 as i16,
                        y: v[1].as_int() as u16 as i16,
                        width: v[2].as_int() as u16,
                        height: v[3].as_int() as u16,
                        zone_size: v[4].as_int() as u16,
                        mouse_x: v[5].as_int() as u16 as i16,
                        mouse_y: v[6].as_int() as u16 as i16,
                    }),
                    n,
                ))
            }
            b"DSOP" => {
                let (v, mut n) = payload(FMT_SET_OPTIONS)?;
                let count = v[0].as_int() as usize;
                // Demand the whole pair list up front so a huge count cannot
                // reserve memory the wire never backs.
                if buf.len() < n + count * 8 {
                    return Err(ProtocolError::Truncated {
                        needed: n + count * 8,
                        available: buf.len(),
                    });
                }
                let mut options = Vec::with_capacity(count);
                for _ in 0..count {
                    let (pair, m) = readf(&buf[n..], "%4i%4i").map_err(grow_by(n))?;
                    options.push((pair[0].as_int(), pair[1].as_int()));
                    n += m;
                }
                Ok((Message::SetOptions { options }, n))
            }
            b"QINF" => Ok((Message::QueryInfo, 4)),
            b"EICV" => {
                let (v, n) = payload(FMT_INCOMPATIBLE)?;
                Ok((
                    Message::Incompatible {
                        major: v[0].as_int() as u16,
                        minor: v[1].as_int() as u16,
                    },
                    n,
                ))
            }
            b"EBSY" => Ok((Message::ErrBusy, 4)),
            b"EUNK" => Ok((Message::ErrUnknown, 4)),
            b"EBAD" => Ok((Message::ErrBad, 4)),
            _ => Err(ProtocolError::UnknownCode(code)),
        }
    }
}

fn clipboard_id(raw: u32) -> Result<ClipboardId, ProtocolError> {
    ClipboardId::try_from(raw as u8)
        .map_err(|()| ProtocolError::BadField { what: "clipboard id", value: raw })
}

/// Re-bases a `Truncated` error from a payload slice onto the whole buffer so
/// streaming callers see how many bytes the full message needs.
fn grow_by(offset: usize) -> impl Fn(ProtocolError) -> ProtocolError {
    move |e| match e {
        ProtocolError::Truncated { needed, available } => ProtocolError::Truncated {
            needed: needed + offset,
            available: available + offset,
        },
        other => other,
    }
}

fn grow_by_code(e: ProtocolError) -> ProtocolError {
    grow_by(4)(e)
}

// ── Connection greeting ───────────────────────────────────────────────────────

/// Encodes the server's greeting: protocol name and version.
pub fn encode_hello(major: u16, minor: u16) -> Vec<u8> {
    let mut out = Vec::new();
    writef(
        &mut out,
        FMT_HELLO,
        &[WireArg::Int(u32::from(major)), WireArg::Int(u32::from(minor))],
    );
    out
}

/// Encodes the client's reply: version plus the requested screen name.
pub fn encode_hello_back(major: u16, minor: u16, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    writef(
        &mut out,
        FMT_HELLO_BACK,
        &[
            WireArg::Int(u32::from(major)),
            WireArg::Int(u32::from(minor)),
            WireArg::Bytes(name.as_bytes()),
        ],
    );
    out
}

/// Decodes a server greeting.
pub fn decode_hello(buf: &[u8]) -> Result<((u16, u16), usize), ProtocolError> {
    let (v, n) = readf(buf, FMT_HELLO)?;
    Ok(((v[0].as_int() as u16, v[1].as_int() as u16), n))
}

/// Decodes a client greeting reply, returning version and screen name.
pub fn decode_hello_back(buf: &[u8]) -> Result<((u16, u16, String), usize), ProtocolError> {
    let (mut v, n) = readf(buf, FMT_HELLO_BACK)?;
    let name = String::from_utf8_lossy(&v.pop().map(WireValue::into_bytes).unwrap_or_default())
        .into_owned();
    Ok(((v[0].as_int() as u16, v[1].as_int() as u16, name), n))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &Message) -> Message {
        let encoded = msg.encoded();
        let (decoded, consumed) = Message::decode(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len(), "decode must consume the whole message");
        decoded
    }

    #[test]
    fn test_enter_screen_round_trip() {
        let msg = Message::EnterScreen { x: 0, y: 474, seq_num: 1, modifier_mask: 0x2000 };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_enter_screen_wire_layout() {
        let msg = Message::EnterScreen { x: 1, y: 2, seq_num: 3, modifier_mask: 4 };
        let bytes = msg.encoded();
        assert_eq!(&bytes[..4], b"CINN");
        assert_eq!(&bytes[4..], [0, 1, 0, 2, 0, 0, 0, 3, 0, 4]);
    }

    #[test]
    fn test_payloadless_messages_round_trip() {
        for msg in [
            Message::LeaveScreen,
            Message::Noop,
            Message::KeepAlive,
            Message::CloseDown,
            Message::InfoAck,
            Message::ResetOptions,
            Message::QueryInfo,
            Message::ErrBusy,
            Message::ErrUnknown,
            Message::ErrBad,
        ] {
            assert_eq!(round_trip(&msg), msg);
            assert_eq!(msg.encoded().len(), 4);
        }
    }

    #[test]
    fn test_grab_clipboard_round_trip() {
        let msg = Message::GrabClipboard { id: ClipboardId::Selection, seq_num: 42 };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_screensaver_round_trip() {
        assert_eq!(round_trip(&Message::Screensaver { on: true }), Message::Screensaver { on: true });
        assert_eq!(
            round_trip(&Message::Screensaver { on: false }),
            Message::Screensaver { on: false }
        );
    }

    #[test]
    fn test_key_messages_round_trip() {
        let down = Message::KeyDown { key: 0x0061, mask: 0x0001, button: 38 };
        let repeat = Message::KeyRepeat { key: 0x0061, mask: 0, count: 3, button: 38 };
        let up = Message::KeyUp { key: 0x0061, mask: 0x0001, button: 38 };
        assert_eq!(round_trip(&down), down);
        assert_eq!(round_trip(&repeat), repeat);
        assert_eq!(round_trip(&up), up);
    }

    #[test]
    fn test_mouse_messages_round_trip() {
        for msg in [
            Message::MouseDown { button: 1 },
            Message::MouseUp { button: 3 },
            Message::MouseMove { x: 640, y: 480 },
            Message::MouseWheel { delta: 120 },
        ] {
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_mouse_wheel_negative_delta_round_trip() {
        let msg = Message::MouseWheel { delta: -120 };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_negative_coordinates_survive_the_wire() {
        // Jump-zone adjustment can push a crossing coordinate below zero.
        let msg = Message::MouseMove { x: -1, y: -32 };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_clipboard_data_round_trip() {
        let msg = Message::ClipboardData {
            id: ClipboardId::Clipboard,
            seq_num: 7,
            data: b"hello".to_vec(),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_clipboard_data_empty_round_trip() {
        let msg = Message::ClipboardData {
            id: ClipboardId::Selection,
            seq_num: 0,
            data: Vec::new(),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_info_round_trip() {
        let msg = Message::Info(ClientInfo {
            x: 0,
            y: 0,
            width: 1280,
            height: 1024,
            zone_size: 1,
            mouse_x: 640,
            mouse_y: 512,
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_set_options_round_trip() {
        let msg = Message::SetOptions { options: vec![(1, 250), (2, 500)] };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_set_options_empty_round_trip() {
        let msg = Message::SetOptions { options: Vec::new() };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_incompatible_round_trip() {
        let msg = Message::Incompatible { major: PROTOCOL_MAJOR, minor: PROTOCOL_MINOR };
        assert_eq!(round_trip(&msg), msg);
    }

    // ── Streaming decode behavior ─────────────────────────────────────────────

    #[test]
    fn test_decode_short_buffer_reports_truncated() {
        let result = Message::decode(b"CIN");
        assert!(matches!(result, Err(ProtocolError::Truncated { needed: 4, available: 3 })));
    }

    #[test]
    fn test_decode_partial_payload_reports_truncated_with_full_length() {
        let bytes = Message::EnterScreen { x: 1, y: 2, seq_num: 3, modifier_mask: 4 }.encoded();
        let result = Message::decode(&bytes[..6]);
        match result {
            Err(ProtocolError::Truncated { needed, available }) => {
                // Lengths are rebased onto the whole buffer, code included.
                assert!(needed > available);
                assert_eq!(available, 6);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_code_is_an_error() {
        let result = Message::decode(b"XXXX");
        assert_eq!(result, Err(ProtocolError::UnknownCode(*b"XXXX")));
    }

    #[test]
    fn test_decode_two_back_to_back_messages() {
        let mut buf = Message::MouseMove { x: 1, y: 2 }.encoded();
        buf.extend_from_slice(&Message::KeepAlive.encoded());

        let (first, n) = Message::decode(&buf).unwrap();
        assert_eq!(first, Message::MouseMove { x: 1, y: 2 });
        let (second, m) = Message::decode(&buf[n..]).unwrap();
        assert_eq!(second, Message::KeepAlive);
        assert_eq!(n + m, buf.len());
    }

    #[test]
    fn test_set_options_truncated_mid_pairs() {
        let bytes = Message::SetOptions { options: vec![(9, 9), (8, 8)] }.encoded();
        let result = Message::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    // ── Greeting ──────────────────────────────────────────────────────────────

    #[test]
    fn test_hello_round_trip() {
        let bytes = encode_hello(1, 3);
        let ((major, minor), n) = decode_hello(&bytes).unwrap();
        assert_eq!((major, minor), (1, 3));
        assert_eq!(n, bytes.len());
    }

    #[test]
    fn test_hello_back_round_trip() {
        let bytes = encode_hello_back(1, 3, "laptop");
        let ((major, minor, name), n) = decode_hello_back(&bytes).unwrap();
        assert_eq!((major, minor), (1, 3));
        assert_eq!(name, "laptop");
        assert_eq!(n, bytes.len());
    }

    #[test]
    fn test_hello_starts_with_protocol_name() {
        let bytes = encode_hello(PROTOCOL_MAJOR, PROTOCOL_MINOR);
        assert_eq!(&bytes[..7], b"Synergy");
    }

    #[test]
    fn test_hello_back_rejects_wrong_protocol_name() {
        let mut bytes = encode_hello_back(1, 3, "laptop");
        bytes[0] = b'Z';
        assert!(matches!(
            decode_hello_back(&bytes),
            Err(ProtocolError::LiteralMismatch { .. })
        ));
    }

    #[test]
    fn test_clipboard_id_try_from() {
        assert_eq!(ClipboardId::try_from(0), Ok(ClipboardId::Clipboard));
        assert_eq!(ClipboardId::try_from(1), Ok(ClipboardId::Selection));
        assert!(ClipboardId::try_from(2).is_err());
    }
}
