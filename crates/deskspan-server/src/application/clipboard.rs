//! Clipboard replication state.
//!
//! Each of the two clipboard slots tracks which screen owns the selection,
//! the sequence number of the grab that took it, and the last marshalled
//! contents.  Sequence numbers come from the enter counter, so a grab from a
//! screen the cursor left long ago can never overwrite a newer one: grabs and
//! updates carrying a sequence number below the stored one are dropped as
//! missequenced.

use deskspan_core::protocol::{ClipboardId, CLIPBOARD_COUNT};

/// One clipboard slot.
#[derive(Debug, Clone)]
pub struct ClipboardSlot {
    /// Canonical name of the owning screen.
    pub owner: String,
    /// Sequence number of the accepted grab.
    pub seq_num: u32,
    /// Last known contents, marshalled.  Cleared on a grab until the owner
    /// pushes data.
    pub data: Vec<u8>,
}

/// Whether a grab was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    Taken,
    /// The grab carried an older sequence number than the stored one.
    Missequenced,
}

/// Result of a contents update from the owning screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New contents were stored.
    Changed,
    /// The contents match what is already cached.
    Unchanged,
    /// Stale sequence number or the sender does not own the slot.
    Rejected,
}

/// Ownership and contents for both clipboard slots.
#[derive(Debug, Clone)]
pub struct ClipboardStore {
    slots: [ClipboardSlot; CLIPBOARD_COUNT],
}

impl ClipboardStore {
    /// Creates the store with every slot owned, empty, by the primary screen.
    pub fn new(primary_name: &str) -> Self {
        let slot = ClipboardSlot {
            owner: primary_name.to_string(),
            seq_num: 0,
            data: Vec::new(),
        };
        Self { slots: [slot.clone(), slot] }
    }

    pub fn slot(&self, id: ClipboardId) -> &ClipboardSlot {
        &self.slots[id.index()]
    }

    /// Records a grab by `owner` with the given sequence number.
    ///
    /// `force` bypasses the sequence check; the primary screen's grabs are
    /// always honored.  An accepted grab clears the cached contents, which
    /// stay unknown until the new owner pushes them.
    pub fn grab(&mut self, id: ClipboardId, owner: &str, seq_num: u32, force: bool) -> GrabOutcome {
        let slot = &mut self.slots[id.index()];
        if !force && seq_num < slot.seq_num {
            return GrabOutcome::Missequenced;
        }
        slot.owner = owner.to_string();
        slot.seq_num = seq_num;
        slot.data.clear();
        GrabOutcome::Taken
    }

    /// Stores contents pushed by `sender` for a slot it grabbed earlier.
    pub fn update(
        &mut self,
        id: ClipboardId,
        sender: &str,
        seq_num: u32,
        data: Vec<u8>,
    ) -> UpdateOutcome {
        let slot = &mut self.slots[id.index()];
        if seq_num < slot.seq_num || !slot.owner.eq_ignore_ascii_case(sender) {
            return UpdateOutcome::Rejected;
        }
        if slot.data == data {
            return UpdateOutcome::Unchanged;
        }
        slot.data = data;
        UpdateOutcome::Changed
    }

    /// Whether `name` owns the slot.
    pub fn owned_by(&self, id: ClipboardId, name: &str) -> bool {
        self.slots[id.index()].owner.eq_ignore_ascii_case(name)
    }

    /// Hands every slot owned by `from` over to `to`, keeping contents.  Used
    /// when the owning screen disconnects so ownership never dangles.
    pub fn reassign(&mut self, from: &str, to: &str) {
        for slot in &mut self.slots {
            if slot.owner.eq_ignore_ascii_case(from) {
                slot.owner = to.to_string();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
