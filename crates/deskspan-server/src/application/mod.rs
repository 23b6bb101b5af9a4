//! Application layer: the switching engine, clipboard replication, and the
//! server orchestrator.
//!
//! Everything here depends on channels and the [`PrimaryScreen`] trait, never
//! on sockets directly, so the whole layer is unit-testable with the
//! recording mock and in-memory sessions.
//!
//! - **`server`** — owns all mutable state and reacts to one event at a time:
//!   input from the primary, messages from client sessions, timer deadlines,
//!   reload and shutdown requests.
//! - **`switcher`** — the gate deciding whether an edge hit becomes a screen
//!   switch (two-tap gesture, switch delay, lock-to-screen).
//! - **`clipboard`** — ownership, sequencing, and caching for the two
//!   replicated clipboards.
//!
//! [`PrimaryScreen`]: crate::infrastructure::primary::PrimaryScreen

pub mod clipboard;
pub mod server;
pub mod switcher;

/// Stable handle for a remote client session.  Ids are allocated once per
/// connection and never reused within a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The screen currently receiving forwarded input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveScreen {
    Primary,
    Remote(ClientId),
}

impl ActiveScreen {
    pub fn is_primary(self) -> bool {
        matches!(self, ActiveScreen::Primary)
    }
}
