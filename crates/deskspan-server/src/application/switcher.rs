//! The switch gate: decides whether an edge hit becomes a screen switch.
//!
//! A raw edge crossing does not always switch.  Depending on configuration
//! the gate demands a double tap of the edge, a dwell delay in the jump zone,
//! or refuses outright while the cursor is locked to the screen.  The gate
//! only tracks timing state; the server performs the actual switch.
//!
//! The two-tap gesture: the first edge hit engages the gate, the cursor must
//! then leave the tap zone (which *arms* it), and a second hit on the same
//! edge within the configured delay switches.  Arming is what distinguishes
//! two taps from one continuous press against the edge.

use std::time::{Duration, Instant};

use deskspan_core::{Direction, ScreenShape};
use tracing::debug;

use super::ActiveScreen;

/// Minimum tap-zone thickness used when arming the two-tap gesture; a 1 px
/// jump zone is too thin to reliably detect leaving it.
const MIN_TAP_ZONE: i32 = 3;

/// A switch scheduled by the dwell delay.
#[derive(Debug, Clone, Copy)]
struct PendingWait {
    x: i32,
    y: i32,
    deadline: Instant,
}

/// Gating state for edge-crossing switches.
#[derive(Debug)]
pub struct SwitchGate {
    switch_dir: Option<Direction>,
    switch_screen: Option<ActiveScreen>,

    two_tap_delay: Duration,
    two_tap_engaged: bool,
    two_tap_armed: bool,
    two_tap_started: Option<Instant>,

    wait_delay: Duration,
    wait: Option<PendingWait>,
}

impl SwitchGate {
    pub fn new() -> Self {
        Self {
            switch_dir: None,
            switch_screen: None,
            two_tap_delay: Duration::ZERO,
            two_tap_engaged: false,
            two_tap_armed: false,
            two_tap_started: None,
            wait_delay: Duration::ZERO,
            wait: None,
        }
    }

    /// Sets the double-tap window.  Zero disables the gesture.  Any gesture
    /// in progress is abandoned.
    pub fn set_two_tap_delay(&mut self, delay: Duration) {
        self.two_tap_delay = delay;
        self.stop_two_tap();
    }

    /// Sets the dwell delay.  Zero switches immediately.  Any pending wait is
    /// canceled.
    pub fn set_wait_delay(&mut self, delay: Duration) {
        self.wait_delay = delay;
        self.wait = None;
    }

    /// Evaluates one edge hit toward `target`.  Returns `true` when the
    /// switch should happen right now; `false` means the gate swallowed the
    /// hit (gesture pending, dwell timer started, or locked).
    pub fn check(
        &mut self,
        target: ActiveScreen,
        dir: Direction,
        x: i32,
        y: i32,
        locked: bool,
        now: Instant,
    ) -> bool {
        let mut prevent = false;
        let mut allow = false;

        let new_direction = self.switch_dir != Some(dir);
        if new_direction || self.switch_screen.is_none() {
            self.switch_dir = Some(dir);
            self.switch_screen = Some(target);
        }

        if self.two_tap_delay > Duration::ZERO {
            if new_direction || !self.two_tap_engaged || !self.second_tap_counts(now) {
                // A different edge, or the first tap: wait for the second.
                prevent = true;
                self.two_tap_engaged = true;
                self.two_tap_armed = false;
                self.two_tap_started = Some(now);
                debug!(dir = %dir, "waiting for second tap");
            } else {
                allow = true;
            }
        }

        if !allow && self.wait_delay > Duration::ZERO {
            if new_direction || self.wait.is_none() {
                self.wait = Some(PendingWait { x, y, deadline: now + self.wait_delay });
                debug!(dir = %dir, delay = ?self.wait_delay, "waiting to switch");
            }
            prevent = true;
        }

        if !prevent && locked {
            debug!("locked to screen");
            prevent = true;
            self.stop();
        }

        !prevent
    }

    /// Reports that the cursor is back in the screen interior.  Cancels any
    /// dwell wait and, once the cursor has left the tap zone, arms the
    /// two-tap gesture.
    pub fn no_switch(&mut self, shape: &ScreenShape, jump_zone: i32, x: i32, y: i32, now: Instant) {
        if self.two_tap_engaged {
            if self.tap_expired(now) {
                self.stop_two_tap();
            } else if !self.two_tap_armed {
                let z = jump_zone.max(MIN_TAP_ZONE);
                let inside = x >= shape.x + z
                    && x < shape.x + shape.w - z
                    && y >= shape.y + z
                    && y < shape.y + shape.h - z;
                if inside {
                    self.two_tap_armed = true;
                }
            }
        }
        self.wait = None;
    }

    /// Abandons all pending switch state.
    pub fn stop(&mut self) {
        if self.switch_screen.is_some() {
            self.switch_screen = None;
            self.switch_dir = None;
            self.stop_two_tap();
            self.wait = None;
        }
    }

    /// The screen a pending gesture or wait would switch to.
    pub fn pending_screen(&self) -> Option<ActiveScreen> {
        self.switch_screen
    }

    /// The edge direction of the pending switch.
    pub fn pending_dir(&self) -> Option<Direction> {
        self.switch_dir
    }

    /// The deadline of the dwell timer, if one is running.
    pub fn wait_deadline(&self) -> Option<Instant> {
        self.wait.map(|w| w.deadline)
    }

    /// Consumes a due dwell timer, returning the switch target and the cursor
    /// position remembered when the wait began.
    pub fn take_expired_wait(&mut self, now: Instant) -> Option<(ActiveScreen, i32, i32)> {
        let wait = self.wait?;
        if now < wait.deadline {
            return None;
        }
        self.wait = None;
        self.switch_screen.map(|screen| (screen, wait.x, wait.y))
    }

    fn second_tap_counts(&self, now: Instant) -> bool {
        self.two_tap_armed && !self.tap_expired(now)
    }

    fn tap_expired(&self, now: Instant) -> bool {
        match self.two_tap_started {
            Some(started) => now.duration_since(started) > self.two_tap_delay,
            None => true,
        }
    }

    fn stop_two_tap(&mut self) {
        self.two_tap_engaged = false;
        self.two_tap_armed = false;
        self.two_tap_started = None;
    }
}

impl Default for SwitchGate {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
