//! The primary-screen seam.
//!
//! The primary screen is the machine running the server: the only screen with
//! real input hardware.  Platform back-ends (X11, Win32, Carbon) live outside
//! this crate; the server consumes them through [`PrimaryScreen`] plus a
//! stream of [`PrimaryEvent`]s funnelled onto the server's event channel.
//! Back-ends that run their own threads must post events through the channel
//! rather than calling into server state directly.

use std::time::Duration;

use deskspan_core::protocol::ClipboardId;
use deskspan_core::ScreenShape;
use thiserror::Error;

pub mod mock;

/// Key id for ScrollLock, the lock-to-screen command key.
pub const KEY_SCROLL_LOCK: u16 = 0xEF14;

/// Toggle-modifier bits reported in [`PrimaryScreen::toggle_mask`].
pub mod toggles {
    pub const CAPS_LOCK: u16 = 0x1000;
    pub const NUM_LOCK: u16 = 0x2000;
    pub const SCROLL_LOCK: u16 = 0x4000;
}

/// An input or state event reported by the primary screen back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryEvent {
    KeyDown { key: u16, mask: u16, button: u16 },
    KeyRepeat { key: u16, mask: u16, count: u16, button: u16 },
    KeyUp { key: u16, mask: u16, button: u16 },
    ButtonDown { button: u8 },
    ButtonUp { button: u8 },
    /// Absolute cursor motion while the primary screen is active.
    MotionOnPrimary { x: i32, y: i32 },
    /// Relative motion deltas while a remote screen is active.
    MotionOnSecondary { dx: i32, dy: i32 },
    Wheel { delta: i16 },
    ScreensaverActivated,
    ScreensaverDeactivated,
    /// The primary's resolution or position changed.
    ShapeChanged,
    /// The primary's platform took or lost a clipboard.
    ClipboardGrabbed { id: ClipboardId },
}

/// Operations the server invokes on the primary screen.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// server's event loop.
pub trait PrimaryScreen: Send + Sync {
    /// The cursor entered the primary screen at (x, y).
    fn enter(&self, x: i32, y: i32, for_screensaver: bool);

    /// The cursor is leaving the primary screen.  Returning `false` vetoes
    /// the switch (for example while a drag is in progress).
    fn leave(&self) -> bool;

    /// Tells the back-end which sides currently have reachable neighbors, as
    /// a [`deskspan_core::sides`] mask.
    fn reconfigure(&self, active_sides: u8);

    /// Moves the physical cursor.
    fn warp_cursor(&self, x: i32, y: i32);

    /// Current toggle-key state ([`toggles`]).
    fn toggle_mask(&self) -> u16;

    /// Whether the back-end wants the cursor pinned to this screen (drag in
    /// progress, modal grab).
    fn is_locked_to_screen(&self) -> bool;

    /// Center of the primary screen, used as the landing point when the
    /// active screen vanishes.
    fn cursor_center(&self) -> (i32, i32);

    /// Thickness of the primary's jump zones in pixels.
    fn jump_zone_size(&self) -> i32;

    /// The primary screen rectangle.
    fn shape(&self) -> ScreenShape;

    /// Reads a clipboard in marshalled form.  Back-ends report transfer
    /// failures as an empty payload.
    fn clipboard(&self, id: ClipboardId) -> Vec<u8>;

    /// Writes a clipboard in marshalled form.
    fn set_clipboard(&self, id: ClipboardId, data: &[u8]);

    /// Takes platform ownership of a clipboard on behalf of a remote screen.
    fn grab_clipboard(&self, id: ClipboardId);

    /// Mirrors the screensaver state onto the local display.
    fn screensaver(&self, on: bool);
}

/// Errors from opening a platform back-end.
#[derive(Debug, Error)]
pub enum PrimaryScreenError {
    /// The back-end failed but may come up later (X server restarting, RDP
    /// session detached).  `retry` is the back-end's suggested wait.
    #[error("primary screen unavailable, retry in {retry:?}")]
    Unavailable { retry: Duration },

    /// No back-end can ever open in this build or environment.
    #[error("no primary screen back-end available: {0}")]
    Fatal(String),
}

/// Opens the platform primary-screen back-end.
///
/// Platform back-ends register here behind target cfgs; a build without any
/// reports [`PrimaryScreenError::Fatal`] and the caller exits with a runtime
/// failure.
pub fn open_primary_screen() -> Result<std::sync::Arc<dyn PrimaryScreen>, PrimaryScreenError> {
    Err(PrimaryScreenError::Fatal(
        "this build carries no platform back-end".to_string(),
    ))
}
