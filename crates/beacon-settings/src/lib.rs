//! # beacon-settings
//!
//! Layered configuration for the system-events service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BeaconSettings::default()`]
//! 2. **Settings file**: `~/.beacon/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `BEACON_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use beacon_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<BeaconSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// The first call loads `~/.beacon/settings.json` with env var overrides,
/// falling back to compiled defaults if loading fails.
pub fn get_settings() -> &'static BeaconSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to load settings, using defaults");
            BeaconSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: BeaconSettings) -> std::result::Result<(), BeaconSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = BeaconSettings::default();
        let _path = settings_path();
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn init_settings_is_set_once() {
        let _ = init_settings(BeaconSettings::default());
        assert!(init_settings(BeaconSettings::default()).is_err());
        assert_eq!(get_settings().name, "beacon");
    }
}
