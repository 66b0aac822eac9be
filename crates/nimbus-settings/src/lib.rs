//! # nimbus-settings
//!
//! Layered configuration for the Nimbus real-time SDK.
//!
//! Settings come from three layers, later ones winning:
//! 1. compiled defaults ([`NimbusSettings::default()`])
//! 2. `~/.nimbus/settings.json`, deep-merged over the defaults
//! 3. `NIMBUS_*` environment variables

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, NimbusSettings, RealtimeSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<NimbusSettings> = OnceLock::new();

/// Process-wide settings, loaded on first access.
///
/// Falls back to compiled defaults when loading fails; the failure is logged.
pub fn get_settings() -> &'static NimbusSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            NimbusSettings::default()
        })
    })
}

/// Install `settings` as the process-wide value.
///
/// # Errors
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: NimbusSettings) -> std::result::Result<(), NimbusSettings> {
    SETTINGS.set(settings)
}
