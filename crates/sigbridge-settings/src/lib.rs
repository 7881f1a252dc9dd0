//! # sigbridge-settings
//!
//! Configuration for the signal bridge, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **User file**: `~/.sigbridge/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `SIGBRIDGE_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
