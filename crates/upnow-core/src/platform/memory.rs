//! In-memory implementation of every platform port.
//!
//! Used by the test suites and by `upnow-cli simulate`. All ports share one
//! state table so a test can inspect which resources are still held after a
//! teardown and inject failures (blocked launches, broken sounds).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{
    AudioBackend, AudioLoop, DeviceStateProbe, ExactAlarmFacility, NotificationManager, Platform,
    SoundSource, SurfaceLauncher, VibrationHandle, Vibrator, WakeLock, WakeLockProvider,
};
use crate::alarm::{AlarmId, SoundRef, DEFAULT_SOUND_NAME};
use crate::channel::{AlertNotification, ChannelSpec};
use crate::error::PlatformError;
use crate::events::{Event, EventSink};
use crate::payload::{AlarmPayload, SurfaceIntent};

#[derive(Debug)]
struct MemoryState {
    exact_allowed: bool,
    registrations: BTreeMap<AlarmId, (DateTime<Utc>, AlarmPayload)>,

    interactive: bool,
    locked: bool,
    ignoring_battery_optimizations: bool,

    wake_lock_fails: bool,
    wake_locks_held: usize,
    wake_lock_acquisitions: usize,

    available_sounds: HashSet<String>,
    failing_sounds: HashSet<String>,
    default_sound_fails: bool,
    audio_active: usize,
    audio_peak: usize,
    audio_started: Vec<SoundRef>,

    has_vibrator: bool,
    vibrations_active: usize,
    vibrations_started: usize,

    notifications_enabled: bool,
    full_screen_allowed: bool,
    channels: HashMap<String, ChannelSpec>,
    channel_creations: usize,
    notifications: BTreeMap<AlarmId, AlertNotification>,

    launch_blocked: bool,
    launch_blocks_remaining: u32,
    launch_attempts: Vec<SurfaceIntent>,
    launched: Vec<SurfaceIntent>,

    events: Vec<Event>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            exact_allowed: true,
            registrations: BTreeMap::new(),
            interactive: true,
            locked: false,
            ignoring_battery_optimizations: false,
            wake_lock_fails: false,
            wake_locks_held: 0,
            wake_lock_acquisitions: 0,
            available_sounds: HashSet::new(),
            failing_sounds: HashSet::new(),
            default_sound_fails: false,
            audio_active: 0,
            audio_peak: 0,
            audio_started: Vec::new(),
            has_vibrator: true,
            vibrations_active: 0,
            vibrations_started: 0,
            notifications_enabled: true,
            full_screen_allowed: true,
            channels: HashMap::new(),
            channel_creations: 0,
            notifications: BTreeMap::new(),
            launch_blocked: false,
            launch_blocks_remaining: 0,
            launch_attempts: Vec::new(),
            launched: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Shared in-memory platform. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }

    /// Bundle this platform behind every port.
    pub fn platform(&self) -> Platform {
        Platform {
            alarms: Arc::new(self.clone()),
            device: Arc::new(self.clone()),
            wake_locks: Arc::new(self.clone()),
            audio: Arc::new(self.clone()),
            vibrator: Arc::new(self.clone()),
            notifications: Arc::new(self.clone()),
            launcher: Arc::new(self.clone()),
            events: Arc::new(self.clone()),
        }
    }

    // -- configuration --------------------------------------------------

    pub fn set_device_state(&self, interactive: bool, locked: bool) {
        let mut state = self.state();
        state.interactive = interactive;
        state.locked = locked;
    }

    pub fn set_exact_allowed(&self, allowed: bool) {
        self.state().exact_allowed = allowed;
    }

    pub fn set_ignoring_battery_optimizations(&self, ignoring: bool) {
        self.state().ignoring_battery_optimizations = ignoring;
    }

    pub fn set_wake_lock_fails(&self, fails: bool) {
        self.state().wake_lock_fails = fails;
    }

    /// Make a named sound resolvable.
    pub fn add_sound(&self, name: &str) {
        self.state().available_sounds.insert(name.to_string());
    }

    /// Make a named sound resolvable but fail when played.
    pub fn add_broken_sound(&self, name: &str) {
        let mut state = self.state();
        state.available_sounds.insert(name.to_string());
        state.failing_sounds.insert(name.to_string());
    }

    pub fn set_default_sound_fails(&self, fails: bool) {
        self.state().default_sound_fails = fails;
    }

    pub fn set_has_vibrator(&self, has: bool) {
        self.state().has_vibrator = has;
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.state().notifications_enabled = enabled;
    }

    pub fn set_full_screen_allowed(&self, allowed: bool) {
        self.state().full_screen_allowed = allowed;
    }

    /// Block every surface launch until unblocked.
    pub fn set_launch_blocked(&self, blocked: bool) {
        self.state().launch_blocked = blocked;
    }

    /// Block only the next `count` surface launches.
    pub fn block_next_launches(&self, count: u32) {
        self.state().launch_blocks_remaining = count;
    }

    /// Edit a channel behind the pipeline's back, as a user or vendor skin would.
    pub fn tamper_channel(&self, id: &str, edit: impl FnOnce(&mut ChannelSpec)) {
        if let Some(spec) = self.state().channels.get_mut(id) {
            edit(spec);
        }
    }

    // -- inspection -----------------------------------------------------

    pub fn registrations(&self) -> Vec<(AlarmId, DateTime<Utc>, AlarmPayload)> {
        self.state()
            .registrations
            .iter()
            .map(|(id, (at, payload))| (id.clone(), *at, payload.clone()))
            .collect()
    }

    pub fn wake_locks_held(&self) -> usize {
        self.state().wake_locks_held
    }

    pub fn wake_lock_acquisitions(&self) -> usize {
        self.state().wake_lock_acquisitions
    }

    pub fn audio_loops_active(&self) -> usize {
        self.state().audio_active
    }

    /// Highest number of simultaneously playing loops ever observed.
    pub fn audio_loops_peak(&self) -> usize {
        self.state().audio_peak
    }

    pub fn audio_started(&self) -> Vec<SoundRef> {
        self.state().audio_started.clone()
    }

    pub fn vibrations_active(&self) -> usize {
        self.state().vibrations_active
    }

    pub fn vibrations_started(&self) -> usize {
        self.state().vibrations_started
    }

    pub fn channel_spec(&self, id: &str) -> Option<ChannelSpec> {
        self.state().channels.get(id).cloned()
    }

    pub fn channel_creations(&self) -> usize {
        self.state().channel_creations
    }

    pub fn notification(&self, alarm_id: &AlarmId) -> Option<AlertNotification> {
        self.state().notifications.get(alarm_id).cloned()
    }

    pub fn posted_notifications(&self) -> usize {
        self.state().notifications.len()
    }

    pub fn launch_attempts(&self) -> Vec<SurfaceIntent> {
        self.state().launch_attempts.clone()
    }

    pub fn launched(&self) -> Vec<SurfaceIntent> {
        self.state().launched.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// True when no audio, vibration, wake lock or notification is outstanding.
    pub fn is_quiet(&self) -> bool {
        let state = self.state();
        state.audio_active == 0
            && state.vibrations_active == 0
            && state.wake_locks_held == 0
            && state.notifications.is_empty()
    }
}

impl ExactAlarmFacility for MemoryPlatform {
    fn can_schedule_exact(&self) -> bool {
        self.state().exact_allowed
    }

    fn set_exact_and_allow_while_idle(
        &self,
        at: DateTime<Utc>,
        payload: &AlarmPayload,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        if !state.exact_allowed {
            return Err(PlatformError::new("set_exact", "exact alarms not permitted"));
        }
        state
            .registrations
            .insert(payload.alarm_id.clone(), (at, payload.clone()));
        Ok(())
    }

    fn cancel(&self, alarm_id: &AlarmId) -> Result<bool, PlatformError> {
        Ok(self.state().registrations.remove(alarm_id).is_some())
    }
}

impl DeviceStateProbe for MemoryPlatform {
    fn is_interactive(&self) -> bool {
        self.state().interactive
    }

    fn is_locked(&self) -> bool {
        self.state().locked
    }

    fn is_ignoring_battery_optimizations(&self) -> bool {
        self.state().ignoring_battery_optimizations
    }
}

struct MemoryWakeLock {
    state: Arc<Mutex<MemoryState>>,
    held: bool,
}

impl WakeLock for MemoryWakeLock {
    fn is_held(&self) -> bool {
        self.held
    }

    fn release(&mut self) -> Result<(), PlatformError> {
        if self.held {
            self.held = false;
            let mut state = lock(&self.state);
            state.wake_locks_held = state.wake_locks_held.saturating_sub(1);
        }
        Ok(())
    }
}

impl WakeLockProvider for MemoryPlatform {
    fn acquire(&self, _tag: &str, _timeout: Duration) -> Result<Box<dyn WakeLock>, PlatformError> {
        let mut state = self.state();
        if state.wake_lock_fails {
            return Err(PlatformError::new("wake_lock", "power service unavailable"));
        }
        state.wake_locks_held += 1;
        state.wake_lock_acquisitions += 1;
        Ok(Box::new(MemoryWakeLock {
            state: self.state.clone(),
            held: true,
        }))
    }
}

struct MemoryAudioLoop {
    state: Arc<Mutex<MemoryState>>,
    playing: bool,
}

impl AudioLoop for MemoryAudioLoop {
    fn is_playing(&self) -> bool {
        self.playing
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        if self.playing {
            self.playing = false;
            let mut state = lock(&self.state);
            state.audio_active = state.audio_active.saturating_sub(1);
        }
        Ok(())
    }

    fn release(&mut self) {
        let _ = self.stop();
    }
}

impl AudioBackend for MemoryPlatform {
    fn resolve(&self, sound: &SoundRef) -> Option<SoundSource> {
        match sound {
            SoundRef::Default => Some(SoundSource {
                sound: SoundRef::Default,
                uri: format!("memory://{DEFAULT_SOUND_NAME}"),
            }),
            SoundRef::Named(name) if self.state().available_sounds.contains(name) => {
                Some(SoundSource {
                    sound: sound.clone(),
                    uri: format!("memory://{name}"),
                })
            }
            SoundRef::Named(_) => None,
        }
    }

    fn play_looping(&self, source: &SoundSource) -> Result<Box<dyn AudioLoop>, PlatformError> {
        let mut state = self.state();
        let fails = match &source.sound {
            SoundRef::Default => state.default_sound_fails,
            SoundRef::Named(name) => state.failing_sounds.contains(name),
        };
        if fails {
            return Err(PlatformError::new(
                "play_looping",
                format!("cannot prepare {}", source.uri),
            ));
        }
        state.audio_active += 1;
        state.audio_peak = state.audio_peak.max(state.audio_active);
        state.audio_started.push(source.sound.clone());
        Ok(Box::new(MemoryAudioLoop {
            state: self.state.clone(),
            playing: true,
        }))
    }
}

struct MemoryVibration {
    state: Arc<Mutex<MemoryState>>,
    active: bool,
}

impl VibrationHandle for MemoryVibration {
    fn cancel(&mut self) -> Result<(), PlatformError> {
        if self.active {
            self.active = false;
            let mut state = lock(&self.state);
            state.vibrations_active = state.vibrations_active.saturating_sub(1);
        }
        Ok(())
    }
}

impl Vibrator for MemoryPlatform {
    fn has_vibrator(&self) -> bool {
        self.state().has_vibrator
    }

    fn vibrate_repeating(
        &self,
        pattern_ms: &[u64],
    ) -> Result<Box<dyn VibrationHandle>, PlatformError> {
        let mut state = self.state();
        if !state.has_vibrator {
            return Err(PlatformError::new("vibrate", "no vibrator present"));
        }
        if pattern_ms.is_empty() {
            return Err(PlatformError::new("vibrate", "empty pattern"));
        }
        state.vibrations_active += 1;
        state.vibrations_started += 1;
        Ok(Box::new(MemoryVibration {
            state: self.state.clone(),
            active: true,
        }))
    }
}

impl NotificationManager for MemoryPlatform {
    fn notifications_enabled(&self) -> bool {
        self.state().notifications_enabled
    }

    fn can_use_full_screen_intent(&self) -> bool {
        self.state().full_screen_allowed
    }

    fn channel(&self, id: &str) -> Option<ChannelSpec> {
        self.state().channels.get(id).cloned()
    }

    fn create_channel(&self, spec: &ChannelSpec) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.channels.insert(spec.id.clone(), spec.clone());
        state.channel_creations += 1;
        Ok(())
    }

    fn delete_channel(&self, id: &str) -> Result<(), PlatformError> {
        self.state().channels.remove(id);
        Ok(())
    }

    fn notify(&self, alarm_id: &AlarmId, notification: &AlertNotification) -> Result<(), PlatformError> {
        let mut state = self.state();
        if !state.channels.contains_key(&notification.channel_id) {
            return Err(PlatformError::new(
                "notify",
                format!("channel '{}' does not exist", notification.channel_id),
            ));
        }
        state.notifications.insert(alarm_id.clone(), notification.clone());
        Ok(())
    }

    fn cancel(&self, alarm_id: &AlarmId) -> Result<(), PlatformError> {
        self.state().notifications.remove(alarm_id);
        Ok(())
    }
}

impl SurfaceLauncher for MemoryPlatform {
    fn launch(&self, intent: &SurfaceIntent) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.launch_attempts.push(intent.clone());
        if state.launch_blocked {
            return Err(PlatformError::new(
                "launch",
                "background activity start blocked",
            ));
        }
        if state.launch_blocks_remaining > 0 {
            state.launch_blocks_remaining -= 1;
            return Err(PlatformError::new(
                "launch",
                "background activity start blocked",
            ));
        }
        state.launched.push(intent.clone());
        Ok(())
    }
}

impl EventSink for MemoryPlatform {
    fn emit(&self, event: Event) {
        self.state().events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Alarm;
    use crate::payload::LaunchReason;

    #[test]
    fn handles_release_counters_once() {
        let platform = MemoryPlatform::new();
        let mut wake = platform.acquire("t", Duration::from_secs(1)).unwrap();
        let source = platform.resolve(&SoundRef::Default).unwrap();
        let mut audio = platform.play_looping(&source).unwrap();
        assert_eq!(platform.wake_locks_held(), 1);
        assert_eq!(platform.audio_loops_active(), 1);

        wake.release().unwrap();
        wake.release().unwrap();
        audio.stop().unwrap();
        audio.release();
        assert_eq!(platform.wake_locks_held(), 0);
        assert_eq!(platform.audio_loops_active(), 0);
        assert!(platform.is_quiet());
    }

    #[test]
    fn unknown_named_sound_does_not_resolve() {
        let platform = MemoryPlatform::new();
        assert!(platform.resolve(&SoundRef::Named("birds".into())).is_none());
        platform.add_sound("birds");
        assert!(platform.resolve(&SoundRef::Named("birds".into())).is_some());
    }

    #[test]
    fn blocked_launch_counts_down() {
        let platform = MemoryPlatform::new();
        platform.block_next_launches(1);
        let payload = AlarmPayload::from_alarm(&Alarm::new("A1".parse().unwrap(), 7, 0));
        let intent = SurfaceIntent::new(payload, LaunchReason::Routed);
        assert!(platform.launch(&intent).is_err());
        assert!(platform.launch(&intent).is_ok());
        assert_eq!(platform.launch_attempts().len(), 2);
        assert_eq!(platform.launched().len(), 1);
    }
}
