use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alarm::{AlarmId, DeliveryState, SoundRef};
use crate::error::Resource;
use crate::payload::AlarmPayload;

/// What the session is currently sounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudioStatus {
    Playing {
        sound: SoundRef,
        /// The requested sound could not be used.
        fallback: bool,
    },
    VibrationOnly,
}

/// Read-only view of one active playback session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub alarm_id: AlarmId,
    pub session_id: Uuid,
    pub generation: u64,
    pub state: DeliveryState,
    pub payload: AlarmPayload,
    pub started_at: DateTime<Utc>,
    pub audio: AudioStatus,
    pub vibrating: bool,
    pub wake_lock_held: bool,
    /// Resources that could not be acquired when the session started.
    pub degraded: Vec<Resource>,
}

#[derive(Debug)]
struct Entry {
    snapshot: SessionSnapshot,
    cancel: CancellationToken,
}

/// Which alarms are ringing right now.
///
/// Written only by the playback controller; everyone else reads.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessionRegistry {
    inner: Arc<RwLock<HashMap<AlarmId, Entry>>>,
}

impl ActiveSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AlarmId, Entry>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AlarmId, Entry>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, alarm_id: &AlarmId) -> Option<SessionSnapshot> {
        self.read().get(alarm_id).map(|e| e.snapshot.clone())
    }

    pub fn is_active(&self, alarm_id: &AlarmId) -> bool {
        self.read().contains_key(alarm_id)
    }

    pub fn state(&self, alarm_id: &AlarmId) -> Option<DeliveryState> {
        self.read().get(alarm_id).map(|e| e.snapshot.state)
    }

    pub fn generation(&self, alarm_id: &AlarmId) -> Option<u64> {
        self.read().get(alarm_id).map(|e| e.snapshot.generation)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn active_ids(&self) -> Vec<AlarmId> {
        let mut ids: Vec<AlarmId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `generation` is still the live session for `alarm_id`.
    pub fn is_current(&self, alarm_id: &AlarmId, generation: u64) -> bool {
        self.generation(alarm_id) == Some(generation)
    }

    pub(crate) fn insert(&self, snapshot: SessionSnapshot, cancel: CancellationToken) {
        self.write()
            .insert(snapshot.alarm_id.clone(), Entry { snapshot, cancel });
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub(crate) fn remove(&self, alarm_id: &AlarmId, generation: u64) -> bool {
        let mut map = self.write();
        match map.get(alarm_id) {
            Some(entry) if entry.snapshot.generation == generation => {
                map.remove(alarm_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn token(&self, alarm_id: &AlarmId) -> Option<(u64, CancellationToken)> {
        self.read()
            .get(alarm_id)
            .map(|e| (e.snapshot.generation, e.cancel.clone()))
    }

    /// Apply `edit` to the entry for `alarm_id` if it belongs to `generation`.
    pub(crate) fn update(
        &self,
        alarm_id: &AlarmId,
        generation: u64,
        edit: impl FnOnce(&mut SessionSnapshot),
    ) -> bool {
        match self.write().get_mut(alarm_id) {
            Some(entry) if entry.snapshot.generation == generation => {
                edit(&mut entry.snapshot);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Alarm;

    fn snapshot(id: &str, generation: u64) -> SessionSnapshot {
        let alarm = Alarm::new(id.parse().unwrap(), 6, 0);
        SessionSnapshot {
            alarm_id: alarm.id.clone(),
            session_id: Uuid::new_v4(),
            generation,
            state: DeliveryState::Triggered,
            payload: AlarmPayload::from_alarm(&alarm),
            started_at: Utc::now(),
            audio: AudioStatus::VibrationOnly,
            vibrating: true,
            wake_lock_held: true,
            degraded: Vec::new(),
        }
    }

    #[test]
    fn stale_generation_cannot_remove_or_update() {
        let registry = ActiveSessionRegistry::new();
        let id: AlarmId = "A1".parse().unwrap();
        registry.insert(snapshot("A1", 1), CancellationToken::new());
        registry.insert(snapshot("A1", 2), CancellationToken::new());

        assert!(!registry.remove(&id, 1));
        assert!(!registry.update(&id, 1, |s| s.state = DeliveryState::Presenting));
        assert_eq!(registry.state(&id), Some(DeliveryState::Triggered));
        assert!(registry.is_current(&id, 2));

        assert!(registry.remove(&id, 2));
        assert!(registry.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let registry = ActiveSessionRegistry::new();
        let reader = registry.clone();
        registry.insert(snapshot("B", 1), CancellationToken::new());
        registry.insert(snapshot("A", 2), CancellationToken::new());
        assert_eq!(reader.len(), 2);
        assert_eq!(
            reader
                .active_ids()
                .iter()
                .map(AlarmId::as_str)
                .collect::<Vec<_>>(),
            vec!["A", "B"]
        );
    }
}
