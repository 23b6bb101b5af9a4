//! Network infrastructure.
//!
//! - **`listener`** — the TCP accept loop and the version greeting; admitted
//!   connections reach the server as pending sessions.
//! - **`session`** — per-client reader/writer tasks: framing, heartbeat, and
//!   outbound motion coalescing.

pub mod listener;
pub mod session;
