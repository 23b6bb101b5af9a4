//! Wire protocol: the positional codec and the typed message layer.

pub mod codec;
pub mod messages;

pub use codec::{readf, writef, ProtocolError, WireArg, WireValue};
pub use messages::{
    decode_hello, decode_hello_back, encode_hello, encode_hello_back, ClientInfo, ClipboardId,
    Message, CLIPBOARD_COUNT, HEART_DEATH_FACTOR, HEART_RATE, PROTOCOL_MAJOR, PROTOCOL_MINOR,
};
