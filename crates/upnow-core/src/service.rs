//! Inbound command surface of the pipeline.
//!
//! [`AlarmService`] wires the scheduler, router, playback controller and
//! alert channel together and exposes the commands the host application
//! sends (schedule, cancel, stop, fire, open surface, boot).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alarm::{
    Alarm, AlarmId, ChallengeType, Color, RepeatMode, SoundRef, Theme, WeekdayMask,
};
use crate::challenge::ChallengeEngine;
use crate::channel::AlertChannel;
use crate::error::{CoreError, Result, ValidationError};
use crate::payload::{SurfaceIntent, Trigger};
use crate::platform::Platform;
use crate::playback::{ActiveSessionRegistry, PlaybackController, SessionSnapshot, StopReason, TeardownReport};
use crate::router::{DeliveryOutcome, DeliveryRouter};
use crate::scheduler::{BootAction, BootRecovery, Registration, TriggerScheduler};
use crate::storage::{AlarmStore, Config};
use crate::surface::{CongratulationsHandoff, PresentationSurface, SurfaceDeps};

/// A schedule command as sent by the scheduling collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub sound_name: Option<String>,
    pub hour: u32,
    pub minute: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub weekdays: WeekdayMask,
    #[serde(default)]
    pub challenge: ChallengeType,
    #[serde(default)]
    pub primary_color: Option<Color>,
    #[serde(default)]
    pub primary_color_light: Option<Color>,
}

impl TryFrom<ScheduleRequest> for Alarm {
    type Error = CoreError;

    fn try_from(request: ScheduleRequest) -> Result<Self> {
        let id = AlarmId::parse(request.id)?;
        if request.hour > 23 || request.minute > 59 {
            return Err(ValidationError::InvalidTimeOfDay {
                hour: request.hour,
                minute: request.minute,
            }
            .into());
        }
        let mut alarm = Alarm::new(id, request.hour, request.minute)
            .with_sound(SoundRef::from_name(request.sound_name.as_deref().unwrap_or_default()))
            .with_challenge(request.challenge)
            .with_repeat(request.repeat, request.weekdays);
        if let Some(label) = request.label.filter(|l| !l.trim().is_empty()) {
            alarm = alarm.with_label(label);
        }
        if let Some(date) = request.date {
            alarm = alarm.with_date(date);
        }
        if let Some(primary) = request.primary_color {
            alarm = alarm.with_theme(Theme {
                primary,
                primary_light: request.primary_color_light.unwrap_or(primary),
            });
        }
        Ok(alarm)
    }
}

/// Platform rights relevant to reliable delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionReport {
    pub can_schedule_exact: bool,
    pub notifications_enabled: bool,
    pub ignoring_battery_optimizations: bool,
    pub can_present_full_screen: bool,
}

impl PermissionReport {
    pub fn all_granted(&self) -> bool {
        self.can_schedule_exact
            && self.notifications_enabled
            && self.ignoring_battery_optimizations
            && self.can_present_full_screen
    }
}

pub struct AlarmService {
    platform: Platform,
    config: Config,
    store: Arc<AlarmStore>,
    channel: Arc<AlertChannel>,
    controller: Arc<PlaybackController>,
    router: DeliveryRouter,
    scheduler: Arc<TriggerScheduler>,
    boot: BootRecovery,
    congratulations: Option<Arc<dyn CongratulationsHandoff>>,
    challenge_seed: Option<u64>,
    surfaces_opened: AtomicU64,
}

impl AlarmService {
    pub fn new(platform: Platform, store: Arc<AlarmStore>, config: Config) -> Self {
        let channel = Arc::new(AlertChannel::new(
            platform.notifications.clone(),
            config.channel.clone(),
            config.playback.ceiling(),
        ));
        let controller = PlaybackController::new(
            platform.clone(),
            channel.clone(),
            config.playback.clone(),
            config.launch.clone(),
        );
        let router = DeliveryRouter::new(
            platform.clone(),
            store.clone(),
            channel.clone(),
            controller.clone(),
        );
        let scheduler = Arc::new(TriggerScheduler::new(platform.alarms.clone(), store.clone()));
        let boot = BootRecovery::new(store.clone());
        Self {
            platform,
            config,
            store,
            channel,
            controller,
            router,
            scheduler,
            boot,
            congratulations: None,
            challenge_seed: None,
            surfaces_opened: AtomicU64::new(0),
        }
    }

    pub fn with_congratulations(mut self, handoff: Arc<dyn CongratulationsHandoff>) -> Self {
        self.congratulations = Some(handoff);
        self
    }

    /// Make generated challenges reproducible.
    pub fn with_challenge_seed(mut self, seed: u64) -> Self {
        self.challenge_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    pub fn registry(&self) -> &ActiveSessionRegistry {
        self.controller.registry()
    }

    /// # Errors
    /// Invalid requests, missing exact-alarm permission, platform and storage errors.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Registration> {
        let alarm = Alarm::try_from(request)?;
        let registration = self.scheduler.schedule(&alarm)?;
        if let Some(theme) = &alarm.theme {
            if let Err(e) = self.store.set_theme_fallback(theme) {
                warn!(alarm_id = %alarm.id, error = %e, "could not persist theme fallback");
            }
        }
        Ok(registration)
    }

    /// # Errors
    /// Invalid ids, platform and storage errors.
    pub fn cancel(&self, alarm_id: &str) -> Result<bool> {
        let id = AlarmId::parse(alarm_id)?;
        self.scheduler.cancel(&id)
    }

    /// # Errors
    /// Platform and storage errors.
    pub fn cancel_all(&self) -> Result<usize> {
        self.scheduler.cancel_all()
    }

    /// # Errors
    /// Storage errors.
    pub fn update_pending_flag(&self, pending: bool) -> Result<()> {
        self.scheduler.update_pending_flag(pending)
    }

    pub fn check_permissions(&self) -> PermissionReport {
        PermissionReport {
            can_schedule_exact: self.platform.alarms.can_schedule_exact(),
            notifications_enabled: self.platform.notifications.notifications_enabled(),
            ignoring_battery_optimizations: self.platform.device.is_ignoring_battery_optimizations(),
            can_present_full_screen: self.platform.notifications.can_use_full_screen_intent(),
        }
    }

    /// Stop a ringing alarm from outside the surface.
    ///
    /// # Errors
    /// Invalid ids.
    pub async fn stop_alarm(&self, alarm_id: &str) -> Result<TeardownReport> {
        let id = AlarmId::parse(alarm_id)?;
        Ok(self.controller.stop(&id, StopReason::External).await)
    }

    /// Deliver a fired trigger.
    pub async fn fire(&self, trigger: Trigger) -> DeliveryOutcome {
        self.router.on_trigger(trigger).await
    }

    /// Deliver a fired trigger as if the local time were `now`.
    pub async fn fire_at(&self, trigger: Trigger, now: chrono::NaiveTime) -> DeliveryOutcome {
        self.router.on_trigger_at(trigger, now).await
    }

    /// Open the dismissal surface for a launch or notification intent.
    ///
    /// # Errors
    /// `InvalidTrigger::NoActiveSession` when the alarm is not ringing.
    pub fn open_surface(&self, intent: SurfaceIntent) -> Result<PresentationSurface> {
        let opened = self.surfaces_opened.fetch_add(1, Ordering::SeqCst);
        let engine = match self.challenge_seed {
            Some(seed) => {
                ChallengeEngine::seeded(self.config.challenge.clone(), seed.wrapping_add(opened))
            }
            None => ChallengeEngine::new(self.config.challenge.clone()),
        };
        let deps = SurfaceDeps {
            controller: self.controller.clone(),
            channel: self.channel.clone(),
            events: self.platform.events.clone(),
            scheduler: Some(self.scheduler.clone()),
            congratulations: self.congratulations.clone(),
            max_answer_digits: self.config.challenge.max_answer_digits,
        };
        Ok(PresentationSurface::open(intent, deps, engine)?)
    }

    /// Decide what to do after a reboot. Unreadable state errs on the side
    /// of asking for a reschedule.
    pub fn on_boot(&self) -> BootAction {
        match self.boot.check() {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "pending flag unreadable at boot, requesting reschedule");
                BootAction::RequestReschedule
            }
        }
    }

    /// # Errors
    /// Invalid ids.
    pub fn active_session(&self, alarm_id: &str) -> Result<Option<SessionSnapshot>> {
        let id = AlarmId::parse(alarm_id)?;
        Ok(self.controller.registry().get(&id))
    }

    /// Stop every ringing alarm.
    pub async fn shutdown(&self) -> Vec<TeardownReport> {
        let reports = self.controller.shutdown().await;
        info!(stopped = reports.len(), "alarm service shut down");
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_converts_to_alarm() {
        let request = ScheduleRequest {
            id: "A1".into(),
            label: Some("Gym".into()),
            sound_name: Some("alarm_sound".into()),
            hour: 6,
            minute: 15,
            primary_color: Some(Color(0xFF00_FF00)),
            ..Default::default()
        };
        let alarm = Alarm::try_from(request).unwrap();
        assert_eq!(alarm.label, "Gym");
        assert!(alarm.sound.is_default());
        assert_eq!(
            alarm.theme,
            Some(Theme {
                primary: Color(0xFF00_FF00),
                primary_light: Color(0xFF00_FF00),
            })
        );
    }

    #[test]
    fn request_rejects_bad_time_and_sentinel() {
        let bad_time = ScheduleRequest {
            id: "A1".into(),
            hour: 25,
            ..Default::default()
        };
        assert!(matches!(
            Alarm::try_from(bad_time),
            Err(CoreError::Validation(_))
        ));
        let sentinel = ScheduleRequest {
            id: "unknown".into(),
            ..Default::default()
        };
        assert!(matches!(
            Alarm::try_from(sentinel),
            Err(CoreError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn request_parses_camel_case_json() {
        let request: ScheduleRequest = serde_json::from_str(
            r#"{"id":"A1","hour":7,"minute":0,"soundName":"birds","challenge":"typing"}"#,
        )
        .unwrap();
        assert_eq!(request.sound_name.as_deref(), Some("birds"));
        assert_eq!(request.challenge, ChallengeType::Typing);
    }
}
