//! Persistence: the TOML settings store.

pub mod settings;
