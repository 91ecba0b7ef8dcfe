//! Routes fired triggers into alert delivery.
//!
//! Every valid trigger gets the notification floor and a playback session;
//! a direct surface launch is attempted on top of that. The router keeps no
//! retry loop of its own; retries belong to the playback session.

use std::sync::Arc;

use chrono::{Local, NaiveTime, Timelike};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alarm::AlarmId;
use crate::channel::AlertChannel;
use crate::error::{CoreError, InvalidTrigger};
use crate::payload::{AlarmPayload, LaunchReason, SurfaceIntent, Trigger, TriggerOrigin};
use crate::platform::{DeviceState, Platform};
use crate::playback::{PlaybackController, SessionSnapshot};
use crate::storage::AlarmStore;

/// Result of routing one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Trigger was invalid or stale; nothing was alerted.
    Dropped { reason: InvalidTriggerReason },
    Delivered {
        alarm_id: AlarmId,
        device: DeviceState,
        notification_posted: bool,
        /// Whether the router's own direct launch went through.
        launched: bool,
        session: SessionSnapshot,
    },
}

/// Serializable wrapper around [`InvalidTrigger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidTriggerReason {
    pub message: String,
    #[serde(skip)]
    pub error: InvalidTrigger,
}

impl From<InvalidTrigger> for InvalidTriggerReason {
    fn from(error: InvalidTrigger) -> Self {
        Self {
            message: error.to_string(),
            error,
        }
    }
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn dropped_reason(&self) -> Option<&InvalidTrigger> {
        match self {
            DeliveryOutcome::Dropped { reason } => Some(&reason.error),
            DeliveryOutcome::Delivered { .. } => None,
        }
    }
}

/// Whether a replayed trigger's time of day is already behind `now`.
///
/// Only hour and minute are compared; an alarm for the current minute is
/// still delivered.
pub fn is_past_replay(hour: u32, minute: u32, now: NaiveTime) -> bool {
    now.hour() > hour || (now.hour() == hour && now.minute() > minute)
}

pub struct DeliveryRouter {
    platform: Platform,
    store: Arc<AlarmStore>,
    channel: Arc<AlertChannel>,
    controller: Arc<PlaybackController>,
}

impl DeliveryRouter {
    pub fn new(
        platform: Platform,
        store: Arc<AlarmStore>,
        channel: Arc<AlertChannel>,
        controller: Arc<PlaybackController>,
    ) -> Self {
        Self {
            platform,
            store,
            channel,
            controller,
        }
    }

    /// Route one delivered fire using the local wall clock.
    pub async fn on_trigger(&self, trigger: Trigger) -> DeliveryOutcome {
        self.on_trigger_at(trigger, Local::now().time()).await
    }

    /// Route one delivered fire as if the local time were `now`.
    pub async fn on_trigger_at(&self, trigger: Trigger, now: NaiveTime) -> DeliveryOutcome {
        let origin = trigger.origin;
        let payload = match self.validate(trigger, now) {
            Ok(payload) => payload,
            Err(reason) => {
                info!(?origin, reason = %reason, "dropping trigger");
                return DeliveryOutcome::Dropped {
                    reason: reason.into(),
                };
            }
        };
        let alarm_id = payload.alarm_id.clone();

        let device = DeviceState::probe(self.platform.device.as_ref());
        debug!(
            alarm_id = %alarm_id,
            ?origin,
            interactive = device.interactive,
            locked = device.locked,
            "routing alarm trigger"
        );

        let notification_posted = match self.channel.post(&payload) {
            Ok(_) => true,
            Err(e) => {
                warn!(alarm_id = %alarm_id, error = %e, "alert notification could not be posted");
                false
            }
        };

        let session = self.controller.start(payload.clone()).await;

        let intent = SurfaceIntent::new(payload, LaunchReason::Routed);
        let launched = match self.platform.launcher.launch(&intent) {
            Ok(()) => {
                self.controller.mark_presenting(&alarm_id);
                true
            }
            Err(e) => {
                let blocked = CoreError::LaunchBlocked {
                    alarm_id: alarm_id.clone(),
                    message: e.message,
                };
                warn!(
                    alarm_id = %alarm_id,
                    locked = device.is_effectively_locked(),
                    error = %blocked,
                    "direct surface launch failed, relying on session retries and notification"
                );
                false
            }
        };

        DeliveryOutcome::Delivered {
            alarm_id,
            device,
            notification_posted,
            launched,
            session,
        }
    }

    fn validate(&self, trigger: Trigger, now: NaiveTime) -> Result<AlarmPayload, InvalidTrigger> {
        let mut payload = AlarmPayload::try_from(trigger.raw)?;

        if trigger.origin == TriggerOrigin::StartupReplay {
            if let Some((hour, minute)) = payload.time_of_day() {
                if is_past_replay(hour, minute, now) {
                    return Err(InvalidTrigger::PastReplay { hour, minute });
                }
            }
        }

        if payload.theme.is_none() {
            match self.store.theme_fallback() {
                Ok(theme) => payload.theme = theme,
                Err(e) => {
                    warn!(alarm_id = %payload.alarm_id, error = %e, "theme fallback unreadable")
                }
            }
        }
        Ok(payload)
    }
}
