mod config;
pub mod registrations;
pub mod store;

pub use config::Config;
pub use registrations::{StoredAlarmFacility, StoredRegistration};
pub use store::AlarmStore;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/upnow[-dev]/` based on UPNOW_ENV.
///
/// Set UPNOW_ENV=dev to use the development data directory. UPNOW_HOME
/// replaces the home directory entirely (used by tests and sandboxes).
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = match std::env::var_os("UPNOW_HOME") {
        Some(home) => PathBuf::from(home),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config"),
    };

    let env = std::env::var("UPNOW_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("upnow-dev")
    } else {
        base_dir.join("upnow")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
