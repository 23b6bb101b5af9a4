//! # deskspan-core
//!
//! Shared library for Deskspan: the wire protocol codec, typed messages, the
//! screen map, and cross-screen coordinate mapping.
//!
//! This crate is used by the server and by protocol-level tests.  It has no
//! dependencies on OS APIs or network sockets.

pub mod domain;
pub mod protocol;

pub use domain::config::{options, OptionMap, ScreenMap, ScreenMapError};
pub use domain::geometry::{edge_hit, map_orthogonal, sides, Direction, ScreenShape};
pub use protocol::{
    ClientInfo, ClipboardId, Message, ProtocolError, CLIPBOARD_COUNT, HEART_RATE,
    PROTOCOL_MAJOR, PROTOCOL_MINOR,
};
