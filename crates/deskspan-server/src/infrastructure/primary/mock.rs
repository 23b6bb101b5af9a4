//! Recording primary screen for unit tests.
//!
//! Lets tests observe every call the server makes on the primary back-end and
//! script its answers (shape, jump zone, toggle mask, lock state, clipboard
//! contents, leave vetoes) without any platform code.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, Ordering};
use std::sync::Mutex;

use deskspan_core::protocol::{ClipboardId, CLIPBOARD_COUNT};
use deskspan_core::ScreenShape;

use super::PrimaryScreen;

/// One observed call on the [`MockPrimaryScreen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryCall {
    Enter { x: i32, y: i32, for_screensaver: bool },
    Leave,
    Reconfigure { active_sides: u8 },
    WarpCursor { x: i32, y: i32 },
    SetClipboard { id: ClipboardId, data: Vec<u8> },
    GrabClipboard { id: ClipboardId },
    Screensaver { on: bool },
}

/// A scriptable, recording [`PrimaryScreen`].
pub struct MockPrimaryScreen {
    calls: Mutex<Vec<PrimaryCall>>,
    shape: Mutex<ScreenShape>,
    zone_size: AtomicI32,
    toggle_mask: AtomicU16,
    locked: AtomicBool,
    veto_leave: AtomicBool,
    clipboards: Mutex<[Vec<u8>; CLIPBOARD_COUNT]>,
}

impl MockPrimaryScreen {
    pub fn new(shape: ScreenShape, zone_size: i32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            shape: Mutex::new(shape),
            zone_size: AtomicI32::new(zone_size),
            toggle_mask: AtomicU16::new(0),
            locked: AtomicBool::new(false),
            veto_leave: AtomicBool::new(false),
            clipboards: Mutex::new(Default::default()),
        }
    }

    /// Drains and returns all recorded calls.
    pub fn take_calls(&self) -> Vec<PrimaryCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Returns recorded calls without draining them.
    pub fn calls(&self) -> Vec<PrimaryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_toggle_mask(&self, mask: u16) {
        self.toggle_mask.store(mask, Ordering::Relaxed);
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Relaxed);
    }

    /// Makes subsequent `leave()` calls refuse.
    pub fn set_veto_leave(&self, veto: bool) {
        self.veto_leave.store(veto, Ordering::Relaxed);
    }

    pub fn set_shape(&self, shape: ScreenShape) {
        *self.shape.lock().unwrap() = shape;
    }

    /// Scripts what `clipboard()` returns for a slot.
    pub fn put_clipboard(&self, id: ClipboardId, data: &[u8]) {
        self.clipboards.lock().unwrap()[id.index()] = data.to_vec();
    }

    fn record(&self, call: PrimaryCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockPrimaryScreen {
    fn default() -> Self {
        Self::new(ScreenShape::new(0, 0, 1920, 1080), 1)
    }
}

impl PrimaryScreen for MockPrimaryScreen {
    fn enter(&self, x: i32, y: i32, for_screensaver: bool) {
        self.record(PrimaryCall::Enter { x, y, for_screensaver });
    }

    fn leave(&self) -> bool {
        self.record(PrimaryCall::Leave);
        !self.veto_leave.load(Ordering::Relaxed)
    }

    fn reconfigure(&self, active_sides: u8) {
        self.record(PrimaryCall::Reconfigure { active_sides });
    }

    fn warp_cursor(&self, x: i32, y: i32) {
        self.record(PrimaryCall::WarpCursor { x, y });
    }

    fn toggle_mask(&self) -> u16 {
        self.toggle_mask.load(Ordering::Relaxed)
    }

    fn is_locked_to_screen(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn cursor_center(&self) -> (i32, i32) {
        self.shape.lock().unwrap().center()
    }

    fn jump_zone_size(&self) -> i32 {
        self.zone_size.load(Ordering::Relaxed)
    }

    fn shape(&self) -> ScreenShape {
        *self.shape.lock().unwrap()
    }

    fn clipboard(&self, id: ClipboardId) -> Vec<u8> {
        self.clipboards.lock().unwrap()[id.index()].clone()
    }

    fn set_clipboard(&self, id: ClipboardId, data: &[u8]) {
        self.record(PrimaryCall::SetClipboard { id, data: data.to_vec() });
    }

    fn grab_clipboard(&self, id: ClipboardId) {
        self.record(PrimaryCall::GrabClipboard { id });
    }

    fn screensaver(&self, on: bool) {
        self.record(PrimaryCall::Screensaver { on });
    }
}
