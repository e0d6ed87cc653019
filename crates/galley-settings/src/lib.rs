//! # galley-settings
//!
//! Layered configuration for the Galley notifier.
//!
//! Sources, lowest priority first:
//! 1. **Compiled defaults**: [`GalleySettings::default()`]
//! 2. **Settings file**: `$GALLEY_SETTINGS` or `~/.galley/settings.json`, deep-merged
//! 3. **Environment**: `GALLEY_*` overrides
//!
//! The result is validated before it is returned. There is no global
//! cache; the binary loads once and hands the value to the service.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings_from_path, load_with_env, settings_path,
};
pub use types::*;
