//! File-system storage: the TOML configuration reader.

pub mod config;
