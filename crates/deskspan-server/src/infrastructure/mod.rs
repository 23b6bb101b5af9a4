//! Infrastructure layer: sockets, session I/O, the primary-screen seam, and
//! configuration storage.
//!
//! This layer may depend on `application` and `deskspan_core`, but must not
//! be imported by them.

pub mod network;
pub mod primary;
pub mod storage;
