//! Core error types for upnow-core.
//!
//! The taxonomy mirrors how the delivery pipeline reacts to failure:
//! permission problems are surfaced to the caller, resource and launch
//! problems degrade the alert locally, and invalid triggers are dropped.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alarm::AlarmId;

/// Core error type for upnow-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A platform right required to deliver alarms is missing.
    #[error("Permission denied: {0}")]
    PermissionDenied(Permission),

    /// Audio, vibration or wake-lock acquisition failed.
    #[error("Resource unavailable ({resource}): {message}")]
    ResourceUnavailable { resource: Resource, message: String },

    /// The platform refused an immediate foreground launch of the alarm surface.
    #[error("Surface launch blocked for alarm '{alarm_id}': {message}")]
    LaunchBlocked { alarm_id: AlarmId, message: String },

    /// Malformed, stale or replayed trigger payload.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(#[from] InvalidTrigger),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Errors reported by a platform port
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Platform rights the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Scheduling exact, wake-capable alarms.
    ExactAlarm,
    /// Presenting a full-screen surface from the background.
    FullScreenPresentation,
    /// Posting notifications at all.
    Notifications,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Permission::ExactAlarm => "exact alarms are disabled, please grant permission",
            Permission::FullScreenPresentation => "full-screen presentation is not allowed",
            Permission::Notifications => "notifications are disabled",
        };
        f.write_str(text)
    }
}

/// Alerting resources owned by a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Audio,
    Vibration,
    WakeLock,
    Notification,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Resource::Audio => "audio",
            Resource::Vibration => "vibration",
            Resource::WakeLock => "wake lock",
            Resource::Notification => "notification",
        };
        f.write_str(text)
    }
}

/// Why a trigger was dropped without alerting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTrigger {
    /// Payload carried no alarm id.
    #[error("missing alarm id")]
    MissingId,

    /// Payload carried the placeholder id used by malformed replays.
    #[error("placeholder alarm id '{0}'")]
    SentinelId(String),

    /// Startup replay of an alarm whose time of day has already passed.
    #[error("alarm time {hour:02}:{minute:02} has already passed")]
    PastReplay { hour: u32, minute: u32 },

    /// A surface was opened for an alarm that is no longer ringing.
    #[error("no active delivery session for alarm '{0}'")]
    NoActiveSession(String),

    /// A payload field could not be interpreted.
    #[error("malformed field '{field}': {message}")]
    Malformed { field: String, message: String },
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open alarm store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Alarm store is locked")]
    Locked,

    /// Stored value could not be decoded
    #[error("Corrupt value for key '{key}': {message}")]
    Corrupt { key: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Home or data directory could not be prepared
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Hour or minute outside the clock range
    #[error("Invalid time of day {hour:02}:{minute:02}")]
    InvalidTimeOfDay { hour: u32, minute: u32 },

    /// Local date/time does not exist in the current time zone
    #[error("Local time {0} cannot be resolved in the current time zone")]
    UnresolvableLocalTime(String),

    /// Empty collection
    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Error reported by a platform port (alarm facility, audio backend, ...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct PlatformError {
    pub operation: String,
    pub message: String,
}

impl PlatformError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
