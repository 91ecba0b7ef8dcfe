//! Alerting resources for ringing alarms.
//!
//! A playback session owns the wake lock, the audio loop, the vibration and
//! the alert notification of one alarm. Sessions are keyed by alarm id; each
//! id has its own async lock so start and stop for one alarm are serialized
//! while different alarms proceed independently. Deferred work (surface
//! launch retries, auto-expiry) is bound to the session's cancellation token
//! and generation number, so nothing acts on a session after teardown.

mod registry;

pub use registry::{ActiveSessionRegistry, AudioStatus, SessionSnapshot};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alarm::{AlarmId, DeliveryState, SoundRef, DEFAULT_SOUND_NAME};
use crate::channel::AlertChannel;
use crate::error::{CoreError, PlatformError, Resource, ValidationError};
use crate::payload::{AlarmPayload, LaunchReason, SurfaceIntent};
use crate::platform::{AudioLoop, Platform, VibrationHandle, WakeLock};
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy};

/// Playback tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Upper bound for the wake lock, the notification and the session itself.
    #[serde(default = "default_wake_lock_ceiling_secs")]
    pub wake_lock_ceiling_secs: u64,
    /// Off/on durations in milliseconds, repeated from the start.
    #[serde(default = "default_vibration_pattern_ms")]
    pub vibration_pattern_ms: Vec<u64>,
    /// Sound used when the requested one is missing or broken.
    #[serde(default = "default_sound")]
    pub default_sound: String,
    #[serde(default = "default_wake_lock_tag")]
    pub wake_lock_tag: String,
}

fn default_wake_lock_ceiling_secs() -> u64 {
    600
}
fn default_vibration_pattern_ms() -> Vec<u64> {
    vec![0, 1000, 1000]
}
fn default_sound() -> String {
    DEFAULT_SOUND_NAME.into()
}
fn default_wake_lock_tag() -> String {
    "upnow:alarm".into()
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            wake_lock_ceiling_secs: default_wake_lock_ceiling_secs(),
            vibration_pattern_ms: default_vibration_pattern_ms(),
            default_sound: default_sound(),
            wake_lock_tag: default_wake_lock_tag(),
        }
    }
}

impl PlaybackConfig {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.wake_lock_ceiling_secs)
    }

    pub fn fallback_sound(&self) -> SoundRef {
        SoundRef::from_name(&self.default_sound)
    }

    /// # Errors
    /// Rejects a zero ceiling and a silent vibration pattern.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.wake_lock_ceiling_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "playback.wake_lock_ceiling_secs".into(),
                message: "must be positive".into(),
            });
        }
        if self.vibration_pattern_ms.iter().all(|ms| *ms == 0) {
            return Err(ValidationError::InvalidValue {
                field: "playback.vibration_pattern_ms".into(),
                message: "pattern never vibrates".into(),
            });
        }
        Ok(())
    }
}

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Challenge solved.
    Dismissed,
    /// Explicit stop from outside the pipeline.
    External,
    /// Wake-lock ceiling reached.
    Expired,
    /// A newer trigger for the same alarm took over.
    Replaced,
    /// Service teardown.
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Dismissed => "dismissed",
            StopReason::External => "external",
            StopReason::Expired => "expired",
            StopReason::Replaced => "replaced",
            StopReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Outcome of [`PlaybackController::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub alarm_id: AlarmId,
    pub reason: StopReason,
    /// False when there was nothing to stop.
    pub had_session: bool,
    pub released: Vec<Resource>,
    pub failures: Vec<(Resource, PlatformError)>,
}

impl TeardownReport {
    fn new(alarm_id: AlarmId, reason: StopReason) -> Self {
        Self {
            alarm_id,
            reason,
            had_session: false,
            released: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, resource: Resource, result: Result<(), PlatformError>) {
        match result {
            Ok(()) => self.released.push(resource),
            Err(e) => {
                error!(alarm_id = %self.alarm_id, %resource, error = %e, "failed to release resource");
                self.failures.push((resource, e));
            }
        }
    }
}

struct PlaybackSession {
    generation: u64,
    payload: AlarmPayload,
    cancel: CancellationToken,
    wake_lock: Option<Box<dyn WakeLock>>,
    audio: Option<Box<dyn AudioLoop>>,
    vibration: Option<Box<dyn VibrationHandle>>,
    audio_retry_used: bool,
}

type SessionSlot = Arc<tokio::sync::Mutex<Option<PlaybackSession>>>;

/// Starts and stops playback sessions.
pub struct PlaybackController {
    platform: Platform,
    channel: Arc<AlertChannel>,
    config: PlaybackConfig,
    launch_policy: RetryPolicy,
    registry: ActiveSessionRegistry,
    slots: Mutex<HashMap<AlarmId, SessionSlot>>,
    generation: AtomicU64,
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("config", &self.config)
            .field("active", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    pub fn new(
        platform: Platform,
        channel: Arc<AlertChannel>,
        config: PlaybackConfig,
        launch_policy: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            channel,
            config,
            launch_policy,
            registry: ActiveSessionRegistry::new(),
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    /// Read-only view of the ringing sessions.
    pub fn registry(&self) -> &ActiveSessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    fn slot(&self, alarm_id: &AlarmId) -> SessionSlot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(alarm_id.clone()).or_default().clone()
    }

    fn existing_slot(&self, alarm_id: &AlarmId) -> Option<SessionSlot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(alarm_id).cloned()
    }

    /// Forget the slot for `alarm_id` once it is empty and only the map and
    /// `slot` still reference it.
    fn release_slot(&self, alarm_id: &AlarmId, slot: SessionSlot) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let idle = slots.get(alarm_id).is_some_and(|held| Arc::ptr_eq(held, &slot))
            && Arc::strong_count(&slot) == 2
            && slot.try_lock().is_ok_and(|guard| guard.is_none());
        if idle {
            slots.remove(alarm_id);
        }
    }

    #[cfg(test)]
    fn tracked_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Start ringing for `payload`, replacing any session for the same id.
    ///
    /// Resource failures degrade the session instead of failing the call.
    pub async fn start(self: &Arc<Self>, payload: AlarmPayload) -> SessionSnapshot {
        let alarm_id = payload.alarm_id.clone();
        let slot = self.slot(&alarm_id);
        let mut guard = slot.lock().await;

        if let Some(previous) = guard.take() {
            info!(alarm_id = %alarm_id, generation = previous.generation, "replacing active session");
            self.teardown(previous, StopReason::Replaced);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let mut degraded = Vec::new();
        info!(alarm_id = %alarm_id, generation, sound = %payload.sound, "starting alarm playback");

        let wake_lock = match self
            .platform
            .wake_locks
            .acquire(&self.config.wake_lock_tag, self.config.ceiling())
        {
            Ok(lock) => Some(lock),
            Err(e) => {
                self.log_unavailable(&alarm_id, Resource::WakeLock, &e);
                degraded.push(Resource::WakeLock);
                None
            }
        };

        let (audio, audio_status) = self.start_audio(&alarm_id, &payload.sound);
        if audio.is_none() {
            degraded.push(Resource::Audio);
        }

        let vibration = self.start_vibration(&alarm_id);
        if vibration.is_none() {
            degraded.push(Resource::Vibration);
        }

        if let Err(e) = self.channel.post(&payload) {
            warn!(alarm_id = %alarm_id, error = %e, "could not post alert notification");
            degraded.push(Resource::Notification);
        }

        let snapshot = SessionSnapshot {
            alarm_id: alarm_id.clone(),
            session_id: Uuid::new_v4(),
            generation,
            state: DeliveryState::Triggered,
            payload: payload.clone(),
            started_at: Utc::now(),
            audio: audio_status,
            vibrating: vibration.is_some(),
            wake_lock_held: wake_lock.as_ref().is_some_and(|l| l.is_held()),
            degraded,
        };
        self.registry.insert(snapshot.clone(), cancel.clone());
        *guard = Some(PlaybackSession {
            generation,
            payload: payload.clone(),
            cancel: cancel.clone(),
            wake_lock,
            audio,
            vibration,
            audio_retry_used: false,
        });
        drop(guard);

        self.spawn_launch(
            SurfaceIntent::new(payload, LaunchReason::SessionStart),
            generation,
            cancel.clone(),
        );
        self.spawn_expiry(alarm_id, generation, cancel);
        snapshot
    }

    /// Tear down the session for `alarm_id`. Stopping twice, or stopping an
    /// alarm that never started, is harmless.
    pub async fn stop(&self, alarm_id: &AlarmId, reason: StopReason) -> TeardownReport {
        let mut report = match self.existing_slot(alarm_id) {
            Some(slot) => {
                let session = slot.lock().await.take();
                let report = match session {
                    Some(session) => self.teardown(session, reason),
                    None => TeardownReport::new(alarm_id.clone(), reason),
                };
                self.release_slot(alarm_id, slot);
                report
            }
            None => TeardownReport::new(alarm_id.clone(), reason),
        };
        if !report.had_session {
            debug!(alarm_id = %alarm_id, %reason, "stop requested with no active session");
            // The router may have posted the notification before any session existed.
            let cleared = self.channel.clear(alarm_id);
            report.record(Resource::Notification, cleared);
        }
        report
    }

    /// Stop only if `generation` is still the live session.
    async fn stop_generation(&self, alarm_id: &AlarmId, generation: u64, reason: StopReason) {
        let Some(slot) = self.existing_slot(alarm_id) else {
            return;
        };
        let mut guard = slot.lock().await;
        if guard.as_ref().is_some_and(|s| s.generation == generation) {
            if let Some(session) = guard.take() {
                self.teardown(session, reason);
            }
        }
        drop(guard);
        self.release_slot(alarm_id, slot);
    }

    /// Stop every active session.
    pub async fn shutdown(&self) -> Vec<TeardownReport> {
        let mut reports = Vec::new();
        for alarm_id in self.registry.active_ids() {
            reports.push(self.stop(&alarm_id, StopReason::Shutdown).await);
        }
        reports
    }

    fn teardown(&self, mut session: PlaybackSession, reason: StopReason) -> TeardownReport {
        let alarm_id = session.payload.alarm_id.clone();
        let mut report = TeardownReport::new(alarm_id.clone(), reason);
        report.had_session = true;

        session.cancel.cancel();
        self.registry.remove(&alarm_id, session.generation);

        if let Some(mut lock) = session.wake_lock.take() {
            if lock.is_held() {
                report.record(Resource::WakeLock, lock.release());
            }
        }
        if let Some(mut audio) = session.audio.take() {
            let stopped = audio.stop();
            audio.release();
            report.record(Resource::Audio, stopped);
        }
        if let Some(mut vibration) = session.vibration.take() {
            report.record(Resource::Vibration, vibration.cancel());
        }
        if reason != StopReason::Replaced {
            report.record(Resource::Notification, self.channel.clear(&alarm_id));
        }

        info!(
            alarm_id = %alarm_id,
            generation = session.generation,
            %reason,
            released = report.released.len(),
            failures = report.failures.len(),
            "alarm playback stopped"
        );
        report
    }

    /// Handle an asynchronous error from the audio backend.
    ///
    /// The first error releases the player and retries with the fallback
    /// sound; after that the session continues with vibration only.
    pub async fn on_audio_error(&self, alarm_id: &AlarmId) -> Option<AudioStatus> {
        let slot = self.existing_slot(alarm_id)?;
        let mut guard = slot.lock().await;
        let session = guard.as_mut()?;

        if let Some(mut audio) = session.audio.take() {
            let _ = audio.stop();
            audio.release();
        }

        let status = if session.audio_retry_used {
            warn!(alarm_id = %alarm_id, "audio failed again, continuing with vibration only");
            AudioStatus::VibrationOnly
        } else {
            session.audio_retry_used = true;
            let fallback = self.config.fallback_sound();
            warn!(alarm_id = %alarm_id, sound = %fallback, "audio backend error, retrying with fallback sound");
            match self.play(&fallback) {
                Ok(audio) => {
                    session.audio = Some(audio);
                    AudioStatus::Playing {
                        sound: fallback,
                        fallback: true,
                    }
                }
                Err(e) => {
                    self.log_unavailable(alarm_id, Resource::Audio, &e);
                    AudioStatus::VibrationOnly
                }
            }
        };

        let generation = session.generation;
        let updated = status.clone();
        self.registry.update(alarm_id, generation, |snapshot| {
            snapshot.audio = updated;
            if !snapshot.degraded.contains(&Resource::Audio)
                && snapshot.audio == AudioStatus::VibrationOnly
            {
                snapshot.degraded.push(Resource::Audio);
            }
        });
        Some(status)
    }

    /// Record that the surface is on screen for `alarm_id`.
    pub fn mark_presenting(&self, alarm_id: &AlarmId) -> bool {
        let Some(generation) = self.registry.generation(alarm_id) else {
            return false;
        };
        self.registry.update(alarm_id, generation, |snapshot| {
            if snapshot.state.is_ringing() {
                snapshot.state = DeliveryState::Presenting;
            }
        })
    }

    /// Ask for the surface to be (re)presented with bounded retries.
    ///
    /// Returns `None` when `intent` names an alarm that is not ringing. The
    /// retries stop as soon as the session is torn down.
    pub fn request_surface(
        self: &Arc<Self>,
        intent: SurfaceIntent,
    ) -> Option<JoinHandle<RetryOutcome<(), PlatformError>>> {
        let (generation, cancel) = self.registry.token(intent.alarm_id())?;
        Some(self.spawn_launch(intent, generation, cancel))
    }

    fn spawn_launch(
        self: &Arc<Self>,
        intent: SurfaceIntent,
        generation: u64,
        cancel: CancellationToken,
    ) -> JoinHandle<RetryOutcome<(), PlatformError>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let alarm_id = intent.alarm_id().clone();
            let relaunch = intent.reason == LaunchReason::Relaunch;
            let registry = controller.registry.clone();
            let launcher = controller.platform.launcher.clone();

            let is_live = || match registry.get(&alarm_id) {
                Some(s) if s.generation == generation => {
                    if relaunch {
                        s.state.is_ringing()
                    } else {
                        s.state == DeliveryState::Triggered
                    }
                }
                _ => false,
            };

            let outcome = retry_with_backoff(&controller.launch_policy, &cancel, is_live, |attempt| {
                let reason = if attempt == 1 || relaunch {
                    intent.reason
                } else {
                    LaunchReason::Retry
                };
                let result = launcher.launch(&intent.with_reason(reason));
                if let Err(e) = &result {
                    let blocked = CoreError::LaunchBlocked {
                        alarm_id: alarm_id.clone(),
                        message: e.message.clone(),
                    };
                    debug!(alarm_id = %alarm_id, attempt, error = %blocked, "surface launch attempt failed");
                }
                std::future::ready(result)
            })
            .await;

            match &outcome {
                RetryOutcome::Succeeded { attempts, .. } => {
                    info!(alarm_id = %alarm_id, attempts, reason = ?intent.reason, "alarm surface presented");
                    controller.registry.update(&alarm_id, generation, |s| {
                        if s.state.is_ringing() {
                            s.state = DeliveryState::Presenting;
                        }
                    });
                }
                RetryOutcome::Exhausted { last_error, attempts } => {
                    warn!(
                        alarm_id = %alarm_id,
                        attempts,
                        error = %last_error,
                        "surface launch retries exhausted, notification is the only path"
                    );
                    if !relaunch {
                        controller.registry.update(&alarm_id, generation, |s| {
                            if s.state == DeliveryState::Triggered {
                                s.state = DeliveryState::NotifiedOnly;
                            }
                        });
                    }
                }
                RetryOutcome::Cancelled { attempts } | RetryOutcome::Abandoned { attempts } => {
                    debug!(alarm_id = %alarm_id, attempts, "surface launch retries stopped");
                }
            }
            outcome
        })
    }

    fn spawn_expiry(self: &Arc<Self>, alarm_id: AlarmId, generation: u64, cancel: CancellationToken) {
        let controller = Arc::clone(self);
        let ceiling = self.config.ceiling();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(ceiling) => {
                    if controller.registry.is_current(&alarm_id, generation) {
                        info!(alarm_id = %alarm_id, generation, "alarm reached ringing ceiling, stopping");
                        controller
                            .stop_generation(&alarm_id, generation, StopReason::Expired)
                            .await;
                    }
                }
            }
        });
    }

    fn play(&self, sound: &SoundRef) -> Result<Box<dyn AudioLoop>, PlatformError> {
        let source = self.platform.audio.resolve(sound).ok_or_else(|| {
            PlatformError::new("resolve_sound", format!("sound '{sound}' not found"))
        })?;
        self.platform.audio.play_looping(&source)
    }

    fn start_audio(
        &self,
        alarm_id: &AlarmId,
        sound: &SoundRef,
    ) -> (Option<Box<dyn AudioLoop>>, AudioStatus) {
        match self.play(sound) {
            Ok(audio) => {
                return (
                    Some(audio),
                    AudioStatus::Playing {
                        sound: sound.clone(),
                        fallback: false,
                    },
                )
            }
            Err(e) => {
                warn!(alarm_id = %alarm_id, sound = %sound, error = %e, "requested sound unavailable, falling back");
            }
        }

        let fallback = self.config.fallback_sound();
        match self.play(&fallback) {
            Ok(audio) => (
                Some(audio),
                AudioStatus::Playing {
                    sound: fallback,
                    fallback: true,
                },
            ),
            Err(e) => {
                self.log_unavailable(alarm_id, Resource::Audio, &e);
                (None, AudioStatus::VibrationOnly)
            }
        }
    }

    fn start_vibration(&self, alarm_id: &AlarmId) -> Option<Box<dyn VibrationHandle>> {
        if !self.platform.vibrator.has_vibrator() {
            debug!(alarm_id = %alarm_id, "device has no vibrator");
            return None;
        }
        match self
            .platform
            .vibrator
            .vibrate_repeating(&self.config.vibration_pattern_ms)
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.log_unavailable(alarm_id, Resource::Vibration, &e);
                None
            }
        }
    }

    fn log_unavailable(&self, alarm_id: &AlarmId, resource: Resource, cause: &PlatformError) {
        let err = CoreError::ResourceUnavailable {
            resource,
            message: cause.to_string(),
        };
        error!(alarm_id = %alarm_id, error = %err, "alarm resource unavailable");
    }
}
