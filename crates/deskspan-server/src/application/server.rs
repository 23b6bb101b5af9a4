//! The server orchestrator.
//!
//! [`Server`] owns every piece of mutable control-plane state: the screen
//! map, the roster of connected clients, the active screen and cursor, the
//! switch gate, and the clipboard store.  It reacts to one [`ServerEvent`] at
//! a time, so a switch (`leave`, state change, `enter`) always runs to
//! completion before the next input event is looked at and no locking is
//! needed anywhere.
//!
//! Sessions and the primary back-end never call in directly; they post events
//! onto the channel and receive [`Message`]s on their outbound queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deskspan_core::domain::config::options;
use deskspan_core::protocol::{ClientInfo, ClipboardId, Message, CLIPBOARD_COUNT};
use deskspan_core::{edge_hit, map_orthogonal, Direction, ScreenMap, ScreenShape};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clipboard::{ClipboardStore, GrabOutcome, UpdateOutcome};
use super::switcher::SwitchGate;
use super::{ActiveScreen, ClientId};
use crate::infrastructure::primary::{toggles, PrimaryEvent, PrimaryScreen, KEY_SCROLL_LOCK};

/// How long a closing client may linger before it is forcibly destroyed.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the server reacts to.
#[derive(Debug)]
pub enum ServerEvent {
    /// Input or state change from the primary screen back-end.
    Primary(PrimaryEvent),
    /// Decoded traffic from a client session.
    Session(ClientId, SessionEvent),
    /// A connection that passed the version handshake.
    Accepted(PendingSession),
    /// A freshly parsed configuration from a reload signal.
    ConfigReload(ScreenMap),
    /// Orderly shutdown.
    Shutdown,
}

/// Decoded inbound traffic from one client session.
#[derive(Debug)]
pub enum SessionEvent {
    Info(ClientInfo),
    ClipboardGrab { id: ClipboardId, seq_num: u32 },
    ClipboardData { id: ClipboardId, seq_num: u32, data: Vec<u8> },
    /// The session stream violated the protocol.
    ProtocolError,
    /// The socket closed or the peer went silent past the heartbeat budget.
    Disconnected,
}

/// Hand-off from the listener after a successful version handshake.
#[derive(Debug)]
pub struct PendingSession {
    pub id: ClientId,
    /// The screen name the client asked for, unresolved.
    pub name: String,
    pub outbound: mpsc::UnboundedSender<Message>,
    /// Reader/writer tasks, aborted when the client is destroyed.
    pub tasks: Vec<JoinHandle<()>>,
}

struct RemoteClient {
    /// Canonical display name from the screen map.
    name: String,
    outbound: mpsc::UnboundedSender<Message>,
    /// Geometry from `DINF`; `None` until the client answered `QINF`.
    info: Option<ClientInfo>,
    dirty: [bool; CLIPBOARD_COUNT],
    /// The client asked for contents the owner has not provided yet.
    pull_pending: [bool; CLIPBOARD_COUNT],
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteClient {
    fn send(&self, msg: Message) {
        // A failed send means the session is tearing down; the disconnect
        // event will clean up.
        let _ = self.outbound.send(msg);
    }

    fn shape(&self) -> Option<ScreenShape> {
        self.info.map(|i| {
            ScreenShape::new(i.x.into(), i.y.into(), i.width.into(), i.height.into())
        })
    }
}

struct OldClient {
    name: String,
    deadline: Instant,
    tasks: Vec<JoinHandle<()>>,
}

struct SaverState {
    /// Where to jump back to on deactivation, cleared if that screen dies.
    return_to: Option<(ActiveScreen, i32, i32)>,
}

/// The control plane.  See the module docs.
pub struct Server {
    config: ScreenMap,
    primary: Arc<dyn PrimaryScreen>,
    primary_name: String,

    clients: HashMap<ClientId, RemoteClient>,
    old_clients: HashMap<ClientId, OldClient>,

    active: ActiveScreen,
    x: i32,
    y: i32,
    seq_num: u32,
    gate: SwitchGate,

    clipboards: ClipboardStore,
    primary_dirty: [bool; CLIPBOARD_COUNT],

    saver: Option<SaverState>,
}

impl Server {
    /// Builds the server around a configuration and the primary back-end.
    /// `primary_name` must be a screen in `config`.
    pub fn new(config: ScreenMap, primary: Arc<dyn PrimaryScreen>, primary_name: &str) -> Self {
        let canonical = config
            .canonical_name(primary_name)
            .unwrap_or(primary_name)
            .to_string();
        debug_assert!(config.is_screen(&canonical), "primary screen must be configured");

        let (x, y) = primary.cursor_center();
        let mut server = Self {
            clipboards: ClipboardStore::new(&canonical),
            config,
            primary,
            primary_name: canonical,
            clients: HashMap::new(),
            old_clients: HashMap::new(),
            active: ActiveScreen::Primary,
            x,
            y,
            seq_num: 0,
            gate: SwitchGate::new(),
            primary_dirty: [false; CLIPBOARD_COUNT],
            saver: None,
        };
        server.process_options();
        server.primary.reconfigure(server.active_sides());
        server
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    /// Runs until shutdown, interleaving events with timer deadlines.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        info!(primary = %self.primary_name, "server running");
        loop {
            // With nothing scheduled, park on a far-away tick; any event
            // recomputes the deadline.
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event, Instant::now()) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.into()) => {
                    self.handle_deadlines(Instant::now());
                }
            }
        }
        info!("server stopped");
    }

    /// Dispatches one event.  Returns `false` when the server should stop.
    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) -> bool {
        match event {
            ServerEvent::Primary(ev) => self.handle_primary_event(ev, now),
            ServerEvent::Session(id, ev) => self.handle_session_event(id, ev, now),
            ServerEvent::Accepted(pending) => self.adopt_client(pending, now),
            ServerEvent::ConfigReload(map) => {
                self.set_config(map, now);
            }
            ServerEvent::Shutdown => {
                info!("shutting down");
                for client in self.clients.values() {
                    client.send(Message::CloseDown);
                }
                return false;
            }
        }
        true
    }

    /// Fires any due timers: the switch-wait timer and client close timers.
    pub fn handle_deadlines(&mut self, now: Instant) {
        if self.gate.wait_deadline().is_some_and(|d| now >= d) {
            if self.is_locked_to_screen() {
                debug!("locked to screen");
                self.gate.stop();
            } else if let Some((screen, x, y)) = self.gate.take_expired_wait(now) {
                if self.is_connected(screen) {
                    self.switch_screen(screen, x, y, false);
                } else {
                    self.gate.stop();
                }
            }
        }

        let due: Vec<ClientId> = self
            .old_clients
            .iter()
            .filter(|(_, old)| now >= old.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Some(old) = self.old_clients.remove(&id) {
                warn!(client = %id, name = %old.name, "forced disconnection of client");
                abort_all(old.tasks);
            }
        }
    }

    /// The earliest pending timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let close = self.old_clients.values().map(|old| old.deadline).min();
        match (self.gate.wait_deadline(), close) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── Primary-screen events ─────────────────────────────────────────────────

    fn handle_primary_event(&mut self, event: PrimaryEvent, now: Instant) {
        match event {
            PrimaryEvent::KeyDown { key, mask, button } => {
                self.on_command_key(key);
                self.send_active(Message::KeyDown { key, mask, button });
            }
            PrimaryEvent::KeyRepeat { key, mask, count, button } => {
                self.on_command_key(key);
                self.send_active(Message::KeyRepeat { key, mask, count, button });
            }
            PrimaryEvent::KeyUp { key, mask, button } => {
                self.on_command_key(key);
                self.send_active(Message::KeyUp { key, mask, button });
            }
            PrimaryEvent::ButtonDown { button } => {
                self.send_active(Message::MouseDown { button });
            }
            PrimaryEvent::ButtonUp { button } => {
                self.send_active(Message::MouseUp { button });
            }
            PrimaryEvent::Wheel { delta } => {
                self.send_active(Message::MouseWheel { delta });
            }
            PrimaryEvent::MotionOnPrimary { x, y } => self.on_mouse_move_primary(x, y, now),
            PrimaryEvent::MotionOnSecondary { dx, dy } => {
                self.on_mouse_move_secondary(dx, dy, now)
            }
            PrimaryEvent::ScreensaverActivated => self.on_screensaver(true),
            PrimaryEvent::ScreensaverDeactivated => self.on_screensaver(false),
            PrimaryEvent::ShapeChanged => self.on_primary_shape_changed(now),
            PrimaryEvent::ClipboardGrabbed { id } => {
                // The primary's grabs are always honored; tag them with a
                // fresh sequence number so they linearize after every enter.
                self.seq_num += 1;
                self.on_clipboard_grab(ActiveScreen::Primary, id, self.seq_num);
            }
        }
    }

    fn on_command_key(&mut self, key: u16) {
        // ScrollLock flips lock-to-screen via the toggle mask; refresh which
        // primary edges are live.  The key still relays to the active screen.
        if key == KEY_SCROLL_LOCK {
            self.primary.reconfigure(self.active_sides());
        }
    }

    /// Absolute motion while the primary is active: watch the jump zones.
    fn on_mouse_move_primary(&mut self, x: i32, y: i32, now: Instant) {
        if self.active != ActiveScreen::Primary {
            // A motion event raced a switch; the relative handler owns the
            // cursor now.
            return;
        }
        self.x = x;
        self.y = y;

        let shape = self.primary.shape();
        let zone = self.primary.jump_zone_size();
        match edge_hit(&shape, zone, x, y) {
            None => self.gate.no_switch(&shape, zone, x, y, now),
            Some((dir, ax, ay)) => {
                let mut nx = ax;
                let mut ny = ay;
                match self.map_to_neighbor(ActiveScreen::Primary, dir, &mut nx, &mut ny) {
                    None => {
                        debug!(dir = %dir, "no neighbor");
                        self.gate.stop();
                    }
                    Some(dst) => {
                        let locked = self.is_locked_to_screen();
                        if self.gate.check(dst, dir, nx, ny, locked, now) {
                            self.switch_screen(dst, nx, ny, false);
                        }
                    }
                }
            }
        }
    }

    /// Relative motion while a remote screen is active: accumulate against
    /// its shape, switching on overshoot and clamping otherwise.
    fn on_mouse_move_secondary(&mut self, dx: i32, dy: i32, now: Instant) {
        if self.active == ActiveScreen::Primary {
            // The active client disconnected while this delta was in flight.
            return;
        }

        let x_old = self.x;
        let y_old = self.y;
        self.x += dx;
        self.y += dy;

        let shape = self.shape_of(self.active);
        let dir = if self.x < shape.x {
            Some(Direction::Left)
        } else if self.x > shape.x + shape.w - 1 {
            Some(Direction::Right)
        } else if self.y < shape.y {
            Some(Direction::Top)
        } else if self.y > shape.y + shape.h - 1 {
            Some(Direction::Bottom)
        } else {
            None
        };

        let mut jump = None;
        match dir {
            Some(dir) => {
                let mut nx = self.x;
                let mut ny = self.y;
                match self.map_to_neighbor(self.active, dir, &mut nx, &mut ny) {
                    None => self.gate.stop(),
                    Some(dst) => {
                        let locked = self.is_locked_to_screen();
                        if self.gate.check(dst, dir, nx, ny, locked, now) {
                            jump = Some((dst, nx, ny));
                        }
                    }
                }
            }
            None => {
                // Still on the screen.  If a switch is pending and the cursor
                // moved off that border, stop waiting and arm the gesture.
                if self.gate.pending_screen().is_some() {
                    let zone = self.primary.jump_zone_size();
                    let clear = match self.gate.pending_dir() {
                        Some(Direction::Left) => self.x >= shape.x + zone,
                        Some(Direction::Right) => self.x <= shape.x + shape.w - 1 - zone,
                        Some(Direction::Top) => self.y >= shape.y + zone,
                        Some(Direction::Bottom) => self.y <= shape.y + shape.h - 1 - zone,
                        None => false,
                    };
                    if clear {
                        self.gate.no_switch(&shape, zone, self.x, self.y, now);
                    }
                }
            }
        }

        if let Some((dst, nx, ny)) = jump {
            self.switch_screen(dst, nx, ny, false);
        } else {
            // Same screen: clamp the accumulator to the shape and warp the
            // client cursor if anything moved.
            self.x = x_old + dx;
            self.y = y_old + dy;
            let (cx, cy) = shape.clamp(self.x, self.y);
            if cx != self.x {
                debug!(screen = %self.name_of(self.active), "clamped to horizontal edge");
            }
            if cy != self.y {
                debug!(screen = %self.name_of(self.active), "clamped to vertical edge");
            }
            self.x = cx;
            self.y = cy;
            if self.x != x_old || self.y != y_old {
                self.mouse_move_on(self.active, self.x, self.y);
            }
        }
    }

    fn on_primary_shape_changed(&mut self, now: Instant) {
        info!(screen = %self.primary_name, "primary screen shape changed");
        if self.active == ActiveScreen::Primary {
            let shape = self.primary.shape();
            let (x, y) = shape.clamp(self.x, self.y);
            self.on_mouse_move_primary(x, y, now);
        }
    }

    // ── Screensaver interlock ─────────────────────────────────────────────────

    fn on_screensaver(&mut self, activated: bool) {
        debug!(activated, "screensaver");
        if activated {
            self.saver = Some(SaverState { return_to: Some((self.active, self.x, self.y)) });
            if self.active != ActiveScreen::Primary {
                self.switch_screen(ActiveScreen::Primary, 0, 0, true);
            }
        } else if let Some(saver) = self.saver.take() {
            if let Some((screen, sx, sy)) = saver.return_to {
                if screen != ActiveScreen::Primary && self.is_connected(screen) {
                    // The screen may have changed shape while the saver ran;
                    // pull the saved position inside its jump zones.
                    let shape = self.shape_of(screen);
                    let zone = self.jump_zone_of(screen);
                    let x = sx.clamp(shape.x + zone, shape.x + shape.w - zone - 1);
                    let y = sy.clamp(shape.y + zone, shape.y + shape.h - zone - 1);
                    self.switch_screen(screen, x, y, false);
                }
            }
        }

        self.primary.screensaver(activated);
        for client in self.clients.values() {
            client.send(Message::Screensaver { on: activated });
        }
    }

    // ── Switching ─────────────────────────────────────────────────────────────

    /// Moves input focus to `dst` at (x, y).  Wrapping onto the same screen
    /// skips leave/enter and only warps.
    fn switch_screen(&mut self, dst: ActiveScreen, x: i32, y: i32, for_screensaver: bool) {
        let shape = self.shape_of(dst);
        debug_assert!(shape.contains(x, y), "switch target out of shape");
        let (x, y) = shape.clamp(x, y);

        info!(
            from = %self.name_of(self.active),
            to = %self.name_of(dst),
            x,
            y,
            "switch screens"
        );

        self.gate.stop();
        self.x = x;
        self.y = y;

        if self.active == dst {
            self.mouse_move_on(dst, x, y);
            return;
        }

        if !self.leave_active() {
            warn!("cannot leave screen");
            return;
        }

        // Leaving the primary lazily publishes whatever it still owns.
        if self.active == ActiveScreen::Primary {
            self.flush_primary_clipboards();
        }

        self.active = dst;
        self.seq_num += 1;
        self.enter_active(x, y, for_screensaver);

        for id in ClipboardId::ALL {
            self.push_clipboard(dst, id);
        }
    }

    fn leave_active(&mut self) -> bool {
        match self.active {
            ActiveScreen::Primary => self.primary.leave(),
            ActiveScreen::Remote(id) => {
                if let Some(client) = self.clients.get(&id) {
                    client.send(Message::LeaveScreen);
                }
                true
            }
        }
    }

    fn enter_active(&mut self, x: i32, y: i32, for_screensaver: bool) {
        match self.active {
            ActiveScreen::Primary => self.primary.enter(x, y, for_screensaver),
            ActiveScreen::Remote(id) => {
                if let Some(client) = self.clients.get(&id) {
                    client.send(Message::EnterScreen {
                        x: x as i16,
                        y: y as i16,
                        seq_num: self.seq_num,
                        modifier_mask: self.primary.toggle_mask(),
                    });
                }
            }
        }
    }

    /// Resolves the first *connected* screen on `dir` of `src`, skipping
    /// through configured-but-absent screens.  A self-link wraps.
    fn neighbor_screen(&self, src: ActiveScreen, dir: Direction) -> Option<ActiveScreen> {
        let mut src_name = self.name_of(src).to_string();
        let mut dst_name = self.config.neighbor(&src_name, dir)?.to_string();
        if dst_name.eq_ignore_ascii_case(&src_name) {
            return Some(src);
        }
        loop {
            if dst_name.eq_ignore_ascii_case(&src_name) {
                // A skipped screen wrapping onto itself ends the search.
                return None;
            }
            if let Some(screen) = self.connected_by_name(&dst_name) {
                return Some(screen);
            }
            debug!(skipped = %dst_name, dir = %dir, "ignored disconnected neighbor");
            src_name = dst_name;
            dst_name = self.config.neighbor(&src_name, dir)?.to_string();
        }
    }

    /// Like [`Self::neighbor_screen`], additionally translating (x, y) from
    /// `src`'s space into the destination's.
    ///
    /// The walk runs in a canonical space where each screen's corner is the
    /// origin: the parallel coordinate sheds the extent of every screen the
    /// cursor overshoots until it lands inside one, then the orthogonal
    /// coordinate is scaled proportionally between the end screens.
    fn map_to_neighbor(
        &self,
        src: ActiveScreen,
        dir: Direction,
        x: &mut i32,
        y: &mut i32,
    ) -> Option<ActiveScreen> {
        let mut dst = self.neighbor_screen(src, dir)?;
        let src_shape = self.shape_of(src);
        let mut last_good = src;
        let mut d = src_shape;

        match dir {
            Direction::Left => {
                *x -= d.x;
                loop {
                    last_good = dst;
                    d = self.shape_of(dst);
                    *x += d.w;
                    if *x >= 0 {
                        break;
                    }
                    debug!(screen = %self.name_of(last_good), "skipping over screen");
                    match self.neighbor_screen(last_good, dir) {
                        Some(next) => dst = next,
                        None => break,
                    }
                }
                *x += d.x;
            }
            Direction::Right => {
                *x -= d.x;
                loop {
                    *x -= d.w;
                    last_good = dst;
                    d = self.shape_of(dst);
                    if *x < d.w {
                        break;
                    }
                    debug!(screen = %self.name_of(last_good), "skipping over screen");
                    match self.neighbor_screen(last_good, dir) {
                        Some(next) => dst = next,
                        None => break,
                    }
                }
                *x += d.x;
            }
            Direction::Top => {
                *y -= d.y;
                loop {
                    last_good = dst;
                    d = self.shape_of(dst);
                    *y += d.h;
                    if *y >= 0 {
                        break;
                    }
                    debug!(screen = %self.name_of(last_good), "skipping over screen");
                    match self.neighbor_screen(last_good, dir) {
                        Some(next) => dst = next,
                        None => break,
                    }
                }
                *y += d.y;
            }
            Direction::Bottom => {
                *y -= d.y;
                loop {
                    *y -= d.h;
                    last_good = dst;
                    d = self.shape_of(dst);
                    if *y < d.h {
                        break;
                    }
                    debug!(screen = %self.name_of(last_good), "skipping over screen");
                    match self.neighbor_screen(last_good, dir) {
                        Some(next) => dst = next,
                        None => break,
                    }
                }
                *y += d.y;
            }
        }

        let dst = last_good;

        // Entering the primary lands inside its jump zone unless the entry
        // side has no neighbor and cannot re-trigger a jump.
        if dst == ActiveScreen::Primary {
            let zone = self.primary.jump_zone_size();
            match dir {
                Direction::Left => {
                    if self.config.neighbor(&self.primary_name, Direction::Right).is_some()
                        && *x > d.x + d.w - 1 - zone
                    {
                        *x = d.x + d.w - 1 - zone;
                    }
                }
                Direction::Right => {
                    if self.config.neighbor(&self.primary_name, Direction::Left).is_some()
                        && *x < d.x + zone
                    {
                        *x = d.x + zone;
                    }
                }
                Direction::Top => {
                    if self.config.neighbor(&self.primary_name, Direction::Bottom).is_some()
                        && *y > d.y + d.h - 1 - zone
                    {
                        *y = d.y + d.h - 1 - zone;
                    }
                }
                Direction::Bottom => {
                    if self.config.neighbor(&self.primary_name, Direction::Top).is_some()
                        && *y < d.y + zone
                    {
                        *y = d.y + zone;
                    }
                }
            }
        }

        let (mx, my) = map_orthogonal(&src_shape, &d, dir, *x, *y);
        *x = mx;
        *y = my;

        Some(dst)
    }

    // ── Clipboard replication ─────────────────────────────────────────────────

    fn on_clipboard_grab(&mut self, grabber: ActiveScreen, id: ClipboardId, seq_num: u32) {
        // A dirty client sending a grab is re-pulling contents for a local
        // paste, not taking ownership: hand it the cached data, or remember
        // the request until the owner provides some.
        if let ActiveScreen::Remote(cid) = grabber {
            let is_pull = self.clients.get(&cid).is_some_and(|c| c.dirty[id.index()])
                && seq_num >= self.clipboards.slot(id).seq_num;
            if is_pull {
                if self.clipboards.slot(id).data.is_empty() {
                    debug!(client = %cid, clipboard = ?id, "pull deferred until the owner pushes");
                    if let Some(client) = self.clients.get_mut(&cid) {
                        client.pull_pending[id.index()] = true;
                    }
                } else {
                    self.push_clipboard(grabber, id);
                }
                return;
            }
        }

        let name = self.name_of(grabber).to_string();
        match self.clipboards.grab(id, &name, seq_num, grabber.is_primary()) {
            GrabOutcome::Missequenced => {
                info!(screen = %name, clipboard = ?id, "ignored stale clipboard grab");
            }
            GrabOutcome::Taken => {
                info!(screen = %name, clipboard = ?id, seq_num, "clipboard grabbed");
                let seq_num = self.clipboards.slot(id).seq_num;

                // Everyone but the new owner relinquishes ownership and is
                // dirty until the data flows back to it.
                for (cid, client) in &mut self.clients {
                    client.pull_pending[id.index()] = false;
                    if grabber == ActiveScreen::Remote(*cid) {
                        client.dirty[id.index()] = false;
                    } else {
                        client.send(Message::GrabClipboard { id, seq_num });
                        client.dirty[id.index()] = true;
                    }
                }
                if grabber.is_primary() {
                    self.primary_dirty[id.index()] = false;
                } else {
                    self.primary.grab_clipboard(id);
                    self.primary_dirty[id.index()] = true;
                }
            }
        }
    }

    fn on_clipboard_update(
        &mut self,
        sender: ActiveScreen,
        id: ClipboardId,
        seq_num: u32,
        data: Vec<u8>,
    ) {
        let name = self.name_of(sender).to_string();
        match self.clipboards.update(id, &name, seq_num, data) {
            UpdateOutcome::Rejected => {
                info!(screen = %name, clipboard = ?id, "ignored clipboard update (missequenced)");
            }
            UpdateOutcome::Unchanged => {
                debug!(screen = %name, clipboard = ?id, "ignored clipboard update (unchanged)");
            }
            UpdateOutcome::Changed => {
                info!(screen = %name, clipboard = ?id, "clipboard updated");
                for (cid, client) in &mut self.clients {
                    client.dirty[id.index()] = sender != ActiveScreen::Remote(*cid);
                }
                self.primary_dirty[id.index()] = !sender.is_primary();
                self.push_clipboard(self.active, id);

                // Serve clients that asked for the contents before the owner
                // pushed them.
                let waiting: Vec<ClientId> = self
                    .clients
                    .iter()
                    .filter(|(_, c)| c.pull_pending[id.index()])
                    .map(|(cid, _)| *cid)
                    .collect();
                for cid in waiting {
                    if let Some(client) = self.clients.get_mut(&cid) {
                        client.pull_pending[id.index()] = false;
                    }
                    self.push_clipboard(ActiveScreen::Remote(cid), id);
                }
            }
        }
    }

    /// Sends cached contents to `target` if its copy is out of date.
    fn push_clipboard(&mut self, target: ActiveScreen, id: ClipboardId) {
        let slot = self.clipboards.slot(id);
        let seq_num = slot.seq_num;
        let data = slot.data.clone();
        match target {
            ActiveScreen::Primary => {
                if self.primary_dirty[id.index()] {
                    self.primary.set_clipboard(id, &data);
                    self.primary_dirty[id.index()] = false;
                }
            }
            ActiveScreen::Remote(cid) => {
                if let Some(client) = self.clients.get_mut(&cid) {
                    if client.dirty[id.index()] {
                        client.send(Message::ClipboardData { id, seq_num, data });
                        client.dirty[id.index()] = false;
                    }
                }
            }
        }
    }

    /// Publishes every clipboard the primary owns before the cursor leaves
    /// it; remote owners push their data themselves on grab.
    fn flush_primary_clipboards(&mut self) {
        for id in ClipboardId::ALL {
            if self.clipboards.owned_by(id, &self.primary_name) {
                let seq_num = self.clipboards.slot(id).seq_num;
                let data = self.primary.clipboard(id);
                self.on_clipboard_update(ActiveScreen::Primary, id, seq_num, data);
            }
        }
    }

    // ── Session events and the client roster ──────────────────────────────────

    fn handle_session_event(&mut self, id: ClientId, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Info(info) => self.on_client_info(id, info),
            SessionEvent::ClipboardGrab { id: clip, seq_num } => {
                if self.clients.contains_key(&id) {
                    self.on_clipboard_grab(ActiveScreen::Remote(id), clip, seq_num);
                }
            }
            SessionEvent::ClipboardData { id: clip, seq_num, data } => {
                if self.clients.contains_key(&id) {
                    self.on_clipboard_update(ActiveScreen::Remote(id), clip, seq_num, data);
                }
            }
            SessionEvent::ProtocolError => {
                warn!(client = %id, "protocol error");
                self.close_client(id, Message::ErrBad, now);
            }
            SessionEvent::Disconnected => self.on_disconnected(id),
        }
    }

    /// Admits or rejects a connection that passed the version handshake.
    fn adopt_client(&mut self, pending: PendingSession, now: Instant) {
        let Some(canonical) = self.config.canonical_name(&pending.name).map(str::to_string)
        else {
            warn!(name = %pending.name, "client name is not in the screen map");
            self.reject_client(pending, Message::ErrUnknown, now);
            return;
        };
        if self.name_in_use(&canonical) {
            warn!(name = %canonical, "a client with this name is already connected");
            self.reject_client(pending, Message::ErrBusy, now);
            return;
        }

        info!(client = %pending.id, name = %canonical, "client adopted");
        let client = RemoteClient {
            name: canonical,
            outbound: pending.outbound,
            info: None,
            dirty: [false; CLIPBOARD_COUNT],
            pull_pending: [false; CLIPBOARD_COUNT],
            tasks: pending.tasks,
        };
        client.send(Message::QueryInfo);
        if self.saver.is_some() {
            client.send(Message::Screensaver { on: true });
        }
        self.clients.insert(pending.id, client);
    }

    fn reject_client(&mut self, pending: PendingSession, msg: Message, now: Instant) {
        let _ = pending.outbound.send(msg);
        self.old_clients.insert(
            pending.id,
            OldClient {
                name: pending.name,
                deadline: now + CLOSE_TIMEOUT,
                tasks: pending.tasks,
            },
        );
    }

    fn on_client_info(&mut self, id: ClientId, info: ClientInfo) {
        if info.width == 0 || info.height == 0 {
            warn!(client = %id, "ignoring client info with an empty shape");
            return;
        }
        let Some(client) = self.clients.get_mut(&id) else { return };
        let first = client.info.is_none();
        let name = client.name.clone();
        client.info = Some(info);
        client.send(Message::InfoAck);

        if first {
            info!(client = %id, name = %name, width = info.width, height = info.height,
                  "client connected");
            let options = self.config.options_for(&name);
            if let Some(client) = self.clients.get(&id) {
                client.send(Message::SetOptions { options });
            }
            self.primary.reconfigure(self.active_sides());
        } else {
            info!(client = %id, name = %name, "client shape changed");
            if self.active == ActiveScreen::Remote(id) {
                let shape = self.shape_of(self.active);
                let (x, y) = shape.clamp(self.x, self.y);
                self.x = x;
                self.y = y;
            }
        }
    }

    /// Starts a graceful close: advisory message, then a bounded grace period
    /// in the old-client set.
    fn close_client(&mut self, id: ClientId, msg: Message, now: Instant) {
        let Some(client) = self.clients.remove(&id) else { return };
        info!(client = %id, name = %client.name, code = msg.code(), "disconnecting client");
        client.send(msg);
        let name = client.name.clone();
        self.old_clients.insert(
            id,
            OldClient { name: client.name, deadline: now + CLOSE_TIMEOUT, tasks: client.tasks },
        );
        self.drop_client_state(id, &name);
    }

    fn on_disconnected(&mut self, id: ClientId) {
        if let Some(client) = self.clients.remove(&id) {
            info!(client = %id, name = %client.name, "client disconnected");
            let name = client.name.clone();
            abort_all(client.tasks);
            self.drop_client_state(id, &name);
        }
        if let Some(old) = self.old_clients.remove(&id) {
            debug!(client = %id, name = %old.name, "closing client finished disconnecting");
            abort_all(old.tasks);
        }
    }

    /// Shared teardown after a client leaves the active set.
    fn drop_client_state(&mut self, id: ClientId, name: &str) {
        // Ownership must never point at a screen that is gone.
        let primary = self.primary_name.clone();
        self.clipboards.reassign(name, &primary);
        self.force_leave(ActiveScreen::Remote(id));
        self.primary.reconfigure(self.active_sides());
    }

    /// Jumps home to the primary when the screen the cursor sits on (or the
    /// screen the saver would return to) goes away.
    fn force_leave(&mut self, screen: ActiveScreen) {
        let effective = self
            .saver
            .as_ref()
            .and_then(|s| s.return_to.map(|(sc, _, _)| sc))
            .unwrap_or(self.active);

        if effective == screen {
            let (cx, cy) = self.primary.cursor_center();
            self.x = cx;
            self.y = cy;
            if self.gate.pending_screen() == Some(screen) {
                self.gate.stop();
            }
            info!(
                from = %self.name_of(screen),
                to = %self.primary_name,
                x = cx,
                y = cy,
                "jump to primary"
            );
            self.active = ActiveScreen::Primary;
            self.seq_num += 1;
            // Unless the saver already parked us on the primary.
            if self.saver.is_none() {
                self.primary.enter(cx, cy, false);
            }
        }

        if let Some(saver) = self.saver.as_mut() {
            if saver.return_to.map(|(sc, _, _)| sc) == Some(screen) {
                saver.return_to = None;
            }
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    /// Swaps in a new configuration, closing clients it no longer names.
    /// Returns `false` (and keeps the old one) if it omits the primary.
    pub fn set_config(&mut self, config: ScreenMap, now: Instant) -> bool {
        if !config.is_screen(&self.primary_name) {
            warn!(primary = %self.primary_name, "new configuration omits the primary screen");
            return false;
        }

        let doomed: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| !config.is_canonical(&client.name))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            self.close_client(id, Message::CloseDown, now);
        }

        self.config = config;
        self.process_options();
        self.primary.reconfigure(self.active_sides());
        for client in self.clients.values() {
            // Old assignments may not exist any more; reset before resending.
            client.send(Message::ResetOptions);
            client.send(Message::SetOptions {
                options: self.config.options_for(&client.name),
            });
        }
        info!("configuration replaced");
        true
    }

    fn process_options(&mut self) {
        if let Some(ms) = self.config.global_option(options::SWITCH_DELAY) {
            self.gate.set_wait_delay(Duration::from_millis(ms.into()));
        }
        if let Some(ms) = self.config.global_option(options::SWITCH_TWO_TAP) {
            self.gate.set_two_tap_delay(Duration::from_millis(ms.into()));
        }
    }

    // ── Small lookups ─────────────────────────────────────────────────────────

    fn is_locked_to_screen(&self) -> bool {
        if self.primary.toggle_mask() & toggles::SCROLL_LOCK != 0 {
            debug!("locked by ScrollLock");
            return true;
        }
        self.primary.is_locked_to_screen()
    }

    fn active_sides(&self) -> u8 {
        let mut mask = 0;
        if !self.is_locked_to_screen() {
            for dir in Direction::ALL {
                if self.neighbor_screen(ActiveScreen::Primary, dir).is_some() {
                    mask |= dir.side_mask();
                }
            }
        }
        mask
    }

    fn name_of(&self, screen: ActiveScreen) -> &str {
        match screen {
            ActiveScreen::Primary => &self.primary_name,
            ActiveScreen::Remote(id) => {
                self.clients.get(&id).map(|c| c.name.as_str()).unwrap_or("<gone>")
            }
        }
    }

    fn shape_of(&self, screen: ActiveScreen) -> ScreenShape {
        match screen {
            ActiveScreen::Primary => self.primary.shape(),
            ActiveScreen::Remote(id) => {
                self.clients.get(&id).and_then(RemoteClient::shape).unwrap_or_else(|| {
                    debug_assert!(false, "shape of a screen without info");
                    self.primary.shape()
                })
            }
        }
    }

    fn jump_zone_of(&self, screen: ActiveScreen) -> i32 {
        // Only the primary detects jumps locally; remote screens have none.
        match screen {
            ActiveScreen::Primary => self.primary.jump_zone_size(),
            ActiveScreen::Remote(_) => 0,
        }
    }

    fn is_connected(&self, screen: ActiveScreen) -> bool {
        match screen {
            ActiveScreen::Primary => true,
            ActiveScreen::Remote(id) => {
                self.clients.get(&id).is_some_and(|c| c.info.is_some())
            }
        }
    }

    fn connected_by_name(&self, name: &str) -> Option<ActiveScreen> {
        if name.eq_ignore_ascii_case(&self.primary_name) {
            return Some(ActiveScreen::Primary);
        }
        self.clients
            .iter()
            .find(|(_, c)| c.info.is_some() && c.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| ActiveScreen::Remote(*id))
    }

    fn name_in_use(&self, canonical: &str) -> bool {
        canonical.eq_ignore_ascii_case(&self.primary_name)
            || self.clients.values().any(|c| c.name.eq_ignore_ascii_case(canonical))
    }

    fn send_active(&self, msg: Message) {
        if let ActiveScreen::Remote(id) = self.active {
            if let Some(client) = self.clients.get(&id) {
                client.send(msg);
            }
        }
    }

    fn mouse_move_on(&self, screen: ActiveScreen, x: i32, y: i32) {
        match screen {
            ActiveScreen::Primary => self.primary.warp_cursor(x, y),
            ActiveScreen::Remote(id) => {
                if let Some(client) = self.clients.get(&id) {
                    client.send(Message::MouseMove { x: x as i16, y: y as i16 });
                }
            }
        }
    }

    // ── Introspection (for the status surface and tests) ──────────────────────

    /// The screen currently receiving input.
    pub fn active_screen(&self) -> ActiveScreen {
        self.active
    }

    /// Cursor position in the active screen's space.
    pub fn cursor(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// The enter sequence number.
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Canonical names of clients that completed the info exchange.
    pub fn connected_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients
            .values()
            .filter(|c| c.info.is_some())
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Clients in the closing set.
    pub fn closing_clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.old_clients.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Owner of a clipboard slot.
    pub fn clipboard_owner(&self, id: ClipboardId) -> &str {
        &self.clipboards.slot(id).owner
    }
}

fn abort_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
