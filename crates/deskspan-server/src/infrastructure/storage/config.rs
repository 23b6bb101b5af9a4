//! Configuration file loading.
//!
//! The launcher owns the file; the server only reads it, at boot and again on
//! SIGHUP.  Example:
//!
//! ```toml
//! address = "0.0.0.0:24800"
//!
//! [options]
//! switch_delay = 250
//! switch_two_tap = 0
//!
//! [screens.apollo]
//! aliases = ["apollo.local"]
//!
//! [screens.apollo.links]
//! right = "hermes"
//!
//! [screens.hermes]
//! [screens.hermes.links]
//! left = "apollo"
//! ```
//!
//! A file with no `[screens.*]` sections is legal: the local machine is added
//! as the sole screen, with a warning, so a fresh install comes up without
//! editing anything.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use deskspan_core::domain::config::{options, ScreenMapError};
use deskspan_core::{Direction, ScreenMap};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Default listen address when the file and the command line say nothing.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:24800";

/// Errors from reading or interpreting the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("configuration file {path} not found")]
    Missing { path: PathBuf },

    /// A file system error other than "not found".
    #[error("cannot read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A link names an unknown side.
    #[error("unknown direction {0:?} in a screen link")]
    UnknownDirection(String),

    /// A screen, alias, or link is inconsistent.
    #[error(transparent)]
    Screens(#[from] ScreenMapError),

    /// The machine's own screen name is absent from the configured screens.
    #[error("the local screen {0:?} is not in the configuration")]
    LocalScreenMissing(String),
}

// ── File schema ───────────────────────────────────────────────────────────────

/// The parsed file, before topology validation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConfigFile {
    /// Listen address, `host[:port]`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Options applied to every screen.
    #[serde(default)]
    pub options: HashMap<String, u32>,
    /// Screens keyed by canonical name.  Ordered so validation errors are
    /// deterministic.
    #[serde(default)]
    pub screens: BTreeMap<String, ScreenSection>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ScreenSection {
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Side name (`left`, `right`, `up`/`top`, `down`/`bottom`) to neighbor.
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    #[serde(default)]
    pub options: HashMap<String, u32>,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the configuration file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing { path: path.to_path_buf() })
        }
        Err(e) => return Err(ConfigError::Io { path: path.to_path_buf(), source: e }),
    };
    Ok(toml::from_str(&content)?)
}

impl ConfigFile {
    /// Validates the screens and links into a [`ScreenMap`].
    ///
    /// `local_name` is the machine's own screen name; it becomes the sole
    /// screen when the file configures none.
    pub fn build_screen_map(&self, local_name: &str) -> Result<ScreenMap, ConfigError> {
        let mut map = ScreenMap::new();

        if self.screens.is_empty() {
            warn!(
                screen = %local_name,
                "configuration has no screens; using the local screen alone"
            );
            map.add_screen(local_name)?;
        }

        for name in self.screens.keys() {
            map.add_screen(name)?;
        }
        for (name, section) in &self.screens {
            for alias in &section.aliases {
                map.add_alias(name, alias)?;
            }
            for (side, neighbor) in &section.links {
                map.set_link(name, parse_direction(side)?, neighbor)?;
            }
            for (option, value) in &section.options {
                set_named_option(&mut map, Some(name), option, *value)?;
            }
        }
        for (option, value) in &self.options {
            set_named_option(&mut map, None, option, *value)?;
        }

        Ok(map)
    }
}

fn parse_direction(side: &str) -> Result<Direction, ConfigError> {
    match side.to_ascii_lowercase().as_str() {
        "left" => Ok(Direction::Left),
        "right" => Ok(Direction::Right),
        "up" | "top" => Ok(Direction::Top),
        "down" | "bottom" => Ok(Direction::Bottom),
        other => Err(ConfigError::UnknownDirection(other.to_string())),
    }
}

fn set_named_option(
    map: &mut ScreenMap,
    screen: Option<&str>,
    option: &str,
    value: u32,
) -> Result<(), ConfigError> {
    let id = match option {
        "switch_delay" => options::SWITCH_DELAY,
        "switch_two_tap" => options::SWITCH_TWO_TAP,
        "half_duplex_caps_lock" => options::HALF_DUPLEX_CAPS_LOCK,
        "half_duplex_num_lock" => options::HALF_DUPLEX_NUM_LOCK,
        unknown => {
            // Unknown options are likely from a newer launcher; skip them
            // rather than refusing the whole file.
            warn!(option = %unknown, "ignoring unknown option");
            return Ok(());
        }
    };
    map.set_option(screen, id, value)?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
