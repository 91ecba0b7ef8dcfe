//! High-visibility alert notification channel.
//!
//! The notification posted here is the reliability floor of delivery: it is
//! posted for every ringing alarm, carries a full-screen intent that targets
//! the presentation surface, and stays until the alarm is torn down or the
//! wake-lock ceiling elapses.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alarm::{AlarmId, Color, SlotKey};
use crate::error::{CoreError, Permission, PlatformError, Resource};
use crate::payload::{AlarmPayload, LaunchReason, SurfaceIntent};
use crate::platform::NotificationManager;

/// Channel identity and notification copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_id")]
    pub id: String,
    #[serde(default = "default_channel_name")]
    pub name: String,
    #[serde(default = "default_channel_description")]
    pub description: String,
    /// Body text of the ringing notification.
    #[serde(default = "default_notification_text")]
    pub notification_text: String,
}

fn default_channel_id() -> String {
    "upnow_alarm_channel_v2".into()
}
fn default_channel_name() -> String {
    "Alarm Alerts".into()
}
fn default_channel_description() -> String {
    "Alerts when an alarm is ringing".into()
}
fn default_notification_text() -> String {
    "Tap to solve and dismiss".into()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: default_channel_id(),
            name: default_channel_name(),
            description: default_channel_description(),
            notification_text: default_notification_text(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Min,
    Low,
    Default,
    High,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockscreenVisibility {
    Secret,
    Private,
    Public,
}

/// Notification channel settings as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
    pub visibility: LockscreenVisibility,
    pub bypass_dnd: bool,
    /// Channel sound; audio is owned by the playback session so this stays `None`.
    pub sound: Option<String>,
    pub show_badge: bool,
    pub vibration: bool,
    pub light_color: Color,
}

impl ChannelSpec {
    /// Settings the alarm channel must have.
    pub fn alarm(config: &ChannelConfig, light_color: Color) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            importance: Importance::Max,
            visibility: LockscreenVisibility::Public,
            bypass_dnd: true,
            sound: None,
            show_badge: false,
            vibration: true,
            light_color,
        }
    }

    /// Whether user or vendor changes have weakened the channel.
    pub fn has_drifted(&self) -> bool {
        self.importance != Importance::Max
            || self.visibility != LockscreenVisibility::Public
            || !self.bypass_dnd
            || self.sound.is_some()
            || self.show_badge
            || !self.vibration
    }
}

/// What [`AlertChannel::ensure_channel`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Existing,
    Created,
    Recreated,
}

/// A ringing-alarm notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub channel_id: String,
    pub title: String,
    pub text: String,
    /// Ongoing notifications cannot be swiped away.
    pub ongoing: bool,
    pub auto_cancel: bool,
    pub color: Color,
    pub content_intent: SurfaceIntent,
    pub full_screen_intent: SurfaceIntent,
    pub timeout_after: Duration,
}

/// Owns the alarm notification channel and the per-alarm notification.
pub struct AlertChannel {
    notifications: Arc<dyn NotificationManager>,
    config: ChannelConfig,
    timeout: Duration,
}

impl AlertChannel {
    /// `timeout` is applied to every posted notification; use the wake-lock ceiling.
    pub fn new(
        notifications: Arc<dyn NotificationManager>,
        config: ChannelConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            notifications,
            config,
            timeout,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Create the channel, or delete and recreate it if it has drifted.
    ///
    /// # Errors
    /// Returns the platform error if the channel cannot be created.
    pub fn ensure_channel(&self, light_color: Color) -> Result<ChannelStatus, PlatformError> {
        let wanted = ChannelSpec::alarm(&self.config, light_color);
        match self.notifications.channel(&self.config.id) {
            None => {
                self.notifications.create_channel(&wanted)?;
                info!(channel = %self.config.id, "created alarm notification channel");
                Ok(ChannelStatus::Created)
            }
            Some(existing) if existing.has_drifted() => {
                warn!(
                    channel = %self.config.id,
                    importance = ?existing.importance,
                    visibility = ?existing.visibility,
                    bypass_dnd = existing.bypass_dnd,
                    "alarm channel drifted, recreating"
                );
                self.notifications.delete_channel(&self.config.id)?;
                self.notifications.create_channel(&wanted)?;
                Ok(ChannelStatus::Recreated)
            }
            Some(_) => Ok(ChannelStatus::Existing),
        }
    }

    /// Post (or replace) the ringing notification for `payload`.
    ///
    /// # Errors
    /// `PermissionDenied(Notifications)` when notifications are off, or
    /// `ResourceUnavailable(Notification)` when the platform rejects the post.
    pub fn post(&self, payload: &AlarmPayload) -> Result<SlotKey, CoreError> {
        if !self.notifications.notifications_enabled() {
            warn!(alarm_id = %payload.alarm_id, "notifications disabled, cannot post alarm notification");
            return Err(CoreError::PermissionDenied(Permission::Notifications));
        }

        let color = payload.theme.map_or(Color::RED, |t| t.primary);
        let unavailable = |e: PlatformError| CoreError::ResourceUnavailable {
            resource: Resource::Notification,
            message: e.to_string(),
        };
        self.ensure_channel(color).map_err(unavailable)?;

        let key = payload.alarm_id.slot();
        let notification = AlertNotification {
            channel_id: self.config.id.clone(),
            title: payload.label.clone(),
            text: self.config.notification_text.clone(),
            ongoing: true,
            auto_cancel: false,
            color,
            content_intent: SurfaceIntent::new(payload.clone(), LaunchReason::NotificationTap),
            full_screen_intent: SurfaceIntent::new(payload.clone(), LaunchReason::FullScreen),
            timeout_after: self.timeout,
        };
        self.notifications
            .notify(&payload.alarm_id, &notification)
            .map_err(unavailable)?;
        debug!(alarm_id = %payload.alarm_id, %key, "alarm notification posted");
        Ok(key)
    }

    /// Cancel the notification for `alarm_id`. Clearing twice is harmless.
    ///
    /// # Errors
    /// Returns the platform error if the cancel call fails.
    pub fn clear(&self, alarm_id: &AlarmId) -> Result<(), PlatformError> {
        self.notifications.cancel(alarm_id)?;
        debug!(alarm_id = %alarm_id, "alarm notification cleared");
        Ok(())
    }
}
