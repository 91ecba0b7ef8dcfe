//! Ports to the operating-system facilities the pipeline drives.
//!
//! Every OS capability is a trait so the pipeline can run against the real
//! platform, the SQLite-backed desktop facility, or the in-memory fakes in
//! [`memory`]. Handles returned by acquisition calls are owned by exactly one
//! playback session and are released explicitly.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmId, SoundRef};
use crate::channel::{AlertNotification, ChannelSpec};
use crate::error::PlatformError;
use crate::events::EventSink;
use crate::payload::{AlarmPayload, SurfaceIntent};

/// Exact, wake-capable wall-clock alarm registration.
///
/// Registrations are addressed by alarm id. Implementations that need a
/// numeric OS handle use [`AlarmId::slot`] but must keep ids whose slots
/// collide apart.
pub trait ExactAlarmFacility: Send + Sync {
    fn can_schedule_exact(&self) -> bool;

    /// Register `payload` to fire at `at`, replacing the earlier
    /// registration of the same alarm id.
    fn set_exact_and_allow_while_idle(
        &self,
        at: DateTime<Utc>,
        payload: &AlarmPayload,
    ) -> Result<(), PlatformError>;

    /// Remove the registration for `alarm_id`. Returns whether one existed.
    fn cancel(&self, alarm_id: &AlarmId) -> Result<bool, PlatformError>;
}

/// Screen and keyguard state.
pub trait DeviceStateProbe: Send + Sync {
    fn is_interactive(&self) -> bool;
    fn is_locked(&self) -> bool;
    fn is_ignoring_battery_optimizations(&self) -> bool {
        false
    }
}

pub trait WakeLock: Send {
    fn is_held(&self) -> bool;
    fn release(&mut self) -> Result<(), PlatformError>;
}

pub trait WakeLockProvider: Send + Sync {
    /// Acquire a partial wake lock that the platform drops after `timeout`.
    fn acquire(&self, tag: &str, timeout: Duration) -> Result<Box<dyn WakeLock>, PlatformError>;
}

/// A resolved, playable sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundSource {
    pub sound: SoundRef,
    pub uri: String,
}

pub trait AudioLoop: Send {
    fn is_playing(&self) -> bool;
    fn stop(&mut self) -> Result<(), PlatformError>;
    /// Free the player. Safe after `stop` and safe to call twice.
    fn release(&mut self);
}

pub trait AudioBackend: Send + Sync {
    /// Look up a sound; `None` when the resource does not exist.
    fn resolve(&self, sound: &SoundRef) -> Option<SoundSource>;
    fn play_looping(&self, source: &SoundSource) -> Result<Box<dyn AudioLoop>, PlatformError>;
}

pub trait VibrationHandle: Send {
    fn cancel(&mut self) -> Result<(), PlatformError>;
}

pub trait Vibrator: Send + Sync {
    fn has_vibrator(&self) -> bool;
    /// Start `pattern_ms` (off/on alternating) repeating from index 0.
    fn vibrate_repeating(&self, pattern_ms: &[u64]) -> Result<Box<dyn VibrationHandle>, PlatformError>;
}

pub trait NotificationManager: Send + Sync {
    fn notifications_enabled(&self) -> bool;
    fn can_use_full_screen_intent(&self) -> bool;
    fn channel(&self, id: &str) -> Option<ChannelSpec>;
    fn create_channel(&self, spec: &ChannelSpec) -> Result<(), PlatformError>;
    fn delete_channel(&self, id: &str) -> Result<(), PlatformError>;
    /// Post or replace the notification tagged `alarm_id`.
    fn notify(&self, alarm_id: &AlarmId, notification: &AlertNotification) -> Result<(), PlatformError>;
    fn cancel(&self, alarm_id: &AlarmId) -> Result<(), PlatformError>;
}

/// Brings the alarm surface to the foreground.
pub trait SurfaceLauncher: Send + Sync {
    /// Fails when the platform blocks background activity starts.
    fn launch(&self, intent: &SurfaceIntent) -> Result<(), PlatformError>;
}

/// Every port the pipeline needs, bundled for wiring.
#[derive(Clone)]
pub struct Platform {
    pub alarms: Arc<dyn ExactAlarmFacility>,
    pub device: Arc<dyn DeviceStateProbe>,
    pub wake_locks: Arc<dyn WakeLockProvider>,
    pub audio: Arc<dyn AudioBackend>,
    pub vibrator: Arc<dyn Vibrator>,
    pub notifications: Arc<dyn NotificationManager>,
    pub launcher: Arc<dyn SurfaceLauncher>,
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

/// Device classification used for routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub interactive: bool,
    pub locked: bool,
}

impl DeviceState {
    pub fn probe(device: &dyn DeviceStateProbe) -> Self {
        Self {
            interactive: device.is_interactive(),
            locked: device.is_locked(),
        }
    }

    /// Screen off or keyguard showing.
    pub fn is_effectively_locked(&self) -> bool {
        !self.interactive || self.locked
    }
}
