//! The screen map: named screens, aliases, options, and the neighbor links
//! that assemble the virtual desktop.
//!
//! Names are compared case-insensitively.  Each screen has one canonical name
//! and any number of aliases; every lookup resolves through the canonical
//! form.  Links are directional and independent per side: `a` having `b` on
//! its right says nothing about what `b` has on its left.  A screen linked to
//! itself wraps.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use super::geometry::Direction;

/// Errors raised while assembling a [`ScreenMap`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScreenMapError {
    /// The name is empty or contains characters outside `[A-Za-z0-9._-]`.
    #[error("invalid screen name {0:?}")]
    InvalidName(String),

    /// The name (or an alias) is already registered.
    #[error("screen name {0:?} is already in use")]
    DuplicateName(String),

    /// A link or alias references a screen that was never added.
    #[error("unknown screen {0:?}")]
    UnknownScreen(String),
}

/// Well-known option identifiers carried by `DSOP`.
pub mod options {
    /// Milliseconds the cursor must rest in a jump zone before a switch.
    pub const SWITCH_DELAY: u32 = 1;
    /// Milliseconds allowed between the two taps of a double-edge gesture.
    pub const SWITCH_TWO_TAP: u32 = 2;
    /// The screen's caps-lock key is half duplex.
    pub const HALF_DUPLEX_CAPS_LOCK: u32 = 3;
    /// The screen's num-lock key is half duplex.
    pub const HALF_DUPLEX_NUM_LOCK: u32 = 4;
}

/// Option assignments for one screen, ordered for deterministic transmission.
pub type OptionMap = BTreeMap<u32, u32>;

#[derive(Debug, Clone, Default)]
struct ScreenEntry {
    /// The name as first registered, preserved for display.
    display_name: String,
    aliases: Vec<String>,
    options: OptionMap,
}

/// The set of screens and their topology.
#[derive(Debug, Clone, Default)]
pub struct ScreenMap {
    /// Canonical (lowercased) name to entry.
    screens: HashMap<String, ScreenEntry>,
    /// Alias (lowercased) to canonical name.
    aliases: HashMap<String, String>,
    /// (canonical name, side) to canonical neighbor name.
    links: HashMap<(String, Direction), String>,
    /// Options that apply to every screen.
    global_options: OptionMap,
}

impl ScreenMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a screen under its canonical name.
    ///
    /// # Errors
    ///
    /// [`ScreenMapError::InvalidName`] for malformed names and
    /// [`ScreenMapError::DuplicateName`] when the name is taken (as a screen
    /// or as an alias).
    pub fn add_screen(&mut self, name: &str) -> Result<(), ScreenMapError> {
        let key = valid_key(name)?;
        if self.screens.contains_key(&key) || self.aliases.contains_key(&key) {
            return Err(ScreenMapError::DuplicateName(name.to_string()));
        }
        self.screens.insert(
            key,
            ScreenEntry { display_name: name.to_string(), ..ScreenEntry::default() },
        );
        Ok(())
    }

    /// Registers an alias for an existing screen.
    pub fn add_alias(&mut self, screen: &str, alias: &str) -> Result<(), ScreenMapError> {
        let alias_key = valid_key(alias)?;
        if self.screens.contains_key(&alias_key) || self.aliases.contains_key(&alias_key) {
            return Err(ScreenMapError::DuplicateName(alias.to_string()));
        }
        let canonical_key = self
            .canonical_key(screen)
            .ok_or_else(|| ScreenMapError::UnknownScreen(screen.to_string()))?;
        if let Some(entry) = self.screens.get_mut(&canonical_key) {
            entry.aliases.push(alias.to_string());
        }
        self.aliases.insert(alias_key, canonical_key);
        Ok(())
    }

    /// Links `screen`'s given side to `neighbor`.  Both must already exist;
    /// linking a screen to itself makes that side wrap.
    pub fn set_link(
        &mut self,
        screen: &str,
        dir: Direction,
        neighbor: &str,
    ) -> Result<(), ScreenMapError> {
        let from = self
            .canonical_key(screen)
            .ok_or_else(|| ScreenMapError::UnknownScreen(screen.to_string()))?;
        let to = self
            .canonical_key(neighbor)
            .ok_or_else(|| ScreenMapError::UnknownScreen(neighbor.to_string()))?;
        self.links.insert((from, dir), to);
        Ok(())
    }

    /// Sets an option on one screen, or globally when `screen` is `None`.
    pub fn set_option(
        &mut self,
        screen: Option<&str>,
        id: u32,
        value: u32,
    ) -> Result<(), ScreenMapError> {
        match screen {
            None => {
                self.global_options.insert(id, value);
                Ok(())
            }
            Some(name) => {
                let key = self
                    .canonical_key(name)
                    .ok_or_else(|| ScreenMapError::UnknownScreen(name.to_string()))?;
                if let Some(entry) = self.screens.get_mut(&key) {
                    entry.options.insert(id, value);
                }
                Ok(())
            }
        }
    }

    /// Whether `name` refers to any screen, canonically or by alias.
    pub fn is_screen(&self, name: &str) -> bool {
        self.canonical_key(name).is_some()
    }

    /// Whether `name` is a canonical screen name (not merely an alias).
    pub fn is_canonical(&self, name: &str) -> bool {
        self.screens.contains_key(&name.to_lowercase())
    }

    /// Resolves a name or alias to the canonical display name.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.canonical_key(name)
            .and_then(|key| self.screens.get(&key))
            .map(|entry| entry.display_name.as_str())
    }

    /// The configured neighbor on `dir` of `screen`, if any.  Accepts aliases
    /// and returns the neighbor's canonical display name.
    pub fn neighbor(&self, screen: &str, dir: Direction) -> Option<&str> {
        let key = self.canonical_key(screen)?;
        self.links
            .get(&(key, dir))
            .and_then(|n| self.screens.get(n))
            .map(|entry| entry.display_name.as_str())
    }

    /// Options for one screen merged over the globals, per-screen values
    /// winning, in id order.
    pub fn options_for(&self, screen: &str) -> Vec<(u32, u32)> {
        let mut merged = self.global_options.clone();
        if let Some(entry) = self.canonical_key(screen).and_then(|k| self.screens.get(&k)) {
            for (id, value) in &entry.options {
                merged.insert(*id, *value);
            }
        }
        merged.into_iter().collect()
    }

    /// The global option value for `id`, if set.
    pub fn global_option(&self, id: u32) -> Option<u32> {
        self.global_options.get(&id).copied()
    }

    /// Canonical display names of all screens, sorted.
    pub fn screen_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> =
            self.screens.values().map(|e| e.display_name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    fn canonical_key(&self, name: &str) -> Option<String> {
        let key = name.to_lowercase();
        if self.screens.contains_key(&key) {
            Some(key)
        } else {
            self.aliases.get(&key).cloned()
        }
    }
}

fn valid_key(name: &str) -> Result<String, ScreenMapError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(name.to_lowercase())
    } else {
        Err(ScreenMapError::InvalidName(name.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn two_screens() -> ScreenMap {
        let mut map = ScreenMap::new();
        map.add_screen("Apollo").unwrap();
        map.add_screen("hermes").unwrap();
        map
    }

    #[test]
    fn test_add_screen_registers_name() {
        let map = two_screens();
        assert!(map.is_screen("Apollo"));
        assert!(map.is_screen("hermes"));
        assert!(!map.is_screen("zeus"));
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let map = two_screens();
        assert!(map.is_screen("APOLLO"));
        assert_eq!(map.canonical_name("aPoLLo"), Some("Apollo"));
    }

    #[test]
    fn test_duplicate_screen_is_rejected() {
        let mut map = two_screens();
        assert_eq!(
            map.add_screen("APOLLO"),
            Err(ScreenMapError::DuplicateName("APOLLO".to_string()))
        );
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let mut map = ScreenMap::new();
        assert!(matches!(map.add_screen(""), Err(ScreenMapError::InvalidName(_))));
        assert!(matches!(map.add_screen("two words"), Err(ScreenMapError::InvalidName(_))));
        assert!(map.add_screen("host-1.example_net").is_ok());
    }

    #[test]
    fn test_alias_resolves_to_canonical_name() {
        let mut map = two_screens();
        map.add_alias("Apollo", "apollo.local").unwrap();
        assert!(map.is_screen("apollo.local"));
        assert_eq!(map.canonical_name("APOLLO.LOCAL"), Some("Apollo"));
        assert!(!map.is_canonical("apollo.local"));
        assert!(map.is_canonical("apollo"));
    }

    #[test]
    fn test_alias_for_unknown_screen_fails() {
        let mut map = two_screens();
        assert_eq!(
            map.add_alias("zeus", "z"),
            Err(ScreenMapError::UnknownScreen("zeus".to_string()))
        );
    }

    #[test]
    fn test_alias_collision_with_screen_name_fails() {
        let mut map = two_screens();
        assert_eq!(
            map.add_alias("Apollo", "hermes"),
            Err(ScreenMapError::DuplicateName("hermes".to_string()))
        );
    }

    #[test]
    fn test_link_and_neighbor_lookup() {
        let mut map = two_screens();
        map.set_link("Apollo", Direction::Right, "hermes").unwrap();
        assert_eq!(map.neighbor("apollo", Direction::Right), Some("hermes"));
        assert_eq!(map.neighbor("apollo", Direction::Left), None);
        // Directional: nothing was configured for hermes.
        assert_eq!(map.neighbor("hermes", Direction::Left), None);
    }

    #[test]
    fn test_link_accepts_aliases_on_both_sides() {
        let mut map = two_screens();
        map.add_alias("hermes", "hermes.local").unwrap();
        map.set_link("APOLLO", Direction::Left, "hermes.local").unwrap();
        assert_eq!(map.neighbor("Apollo", Direction::Left), Some("hermes"));
    }

    #[test]
    fn test_self_link_wraps() {
        let mut map = two_screens();
        map.set_link("Apollo", Direction::Right, "Apollo").unwrap();
        assert_eq!(map.neighbor("Apollo", Direction::Right), Some("Apollo"));
    }

    #[test]
    fn test_link_to_unknown_screen_fails() {
        let mut map = two_screens();
        assert_eq!(
            map.set_link("Apollo", Direction::Right, "zeus"),
            Err(ScreenMapError::UnknownScreen("zeus".to_string()))
        );
    }

    #[test]
    fn test_options_merge_globals_with_per_screen_overrides() {
        let mut map = two_screens();
        map.set_option(None, options::SWITCH_DELAY, 250).unwrap();
        map.set_option(None, options::SWITCH_TWO_TAP, 0).unwrap();
        map.set_option(Some("hermes"), options::SWITCH_TWO_TAP, 500).unwrap();

        assert_eq!(
            map.options_for("Apollo"),
            vec![(options::SWITCH_DELAY, 250), (options::SWITCH_TWO_TAP, 0)]
        );
        assert_eq!(
            map.options_for("hermes"),
            vec![(options::SWITCH_DELAY, 250), (options::SWITCH_TWO_TAP, 500)]
        );
    }

    #[test]
    fn test_global_option_lookup() {
        let mut map = two_screens();
        assert_eq!(map.global_option(options::SWITCH_DELAY), None);
        map.set_option(None, options::SWITCH_DELAY, 100).unwrap();
        assert_eq!(map.global_option(options::SWITCH_DELAY), Some(100));
    }

    #[test]
    fn test_screen_names_sorted() {
        let map = two_screens();
        assert_eq!(map.screen_names(), vec!["Apollo", "hermes"]);
    }

    #[test]
    fn test_empty_map() {
        let map = ScreenMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }
}
