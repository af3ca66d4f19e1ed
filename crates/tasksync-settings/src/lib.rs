//! # tasksync-settings
//!
//! Configuration for a tasksync node, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`TaskSyncSettings::default()`]
//! 2. **Settings file**: `~/.tasksync/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `TASKSYNC_*` overrides (highest priority)
//!
//! The node binary applies its CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
