//! Wall-clock trigger registration and boot recovery.
//!
//! The scheduler turns an alarm's hour/minute (plus optional date) into an
//! absolute instant, registers it with the exact-alarm facility under the
//! alarm's slot key, and is the only writer of the persisted
//! "has pending alarms" flag that boot recovery reads.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alarm::{Alarm, AlarmId, RepeatMode, SlotKey};
use crate::error::{CoreError, Permission, Result, ValidationError};
use crate::payload::AlarmPayload;
use crate::platform::ExactAlarmFacility;
use crate::storage::{AlarmStore, StoredRegistration};

/// Longest DST gap searched when a local time does not exist.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// A trigger registered with the exact-alarm facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub alarm_id: AlarmId,
    pub slot: SlotKey,
    pub fire_at: DateTime<Utc>,
    pub payload: AlarmPayload,
}

impl Registration {
    pub fn is_one_shot(&self) -> bool {
        self.payload.repeat == RepeatMode::Once
    }
}

impl From<StoredRegistration> for Registration {
    fn from(stored: StoredRegistration) -> Self {
        Self {
            alarm_id: stored.payload.alarm_id.clone(),
            slot: stored.slot,
            fire_at: stored.fire_at,
            payload: stored.payload,
        }
    }
}

fn resolve_local<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    time: NaiveTime,
) -> std::result::Result<DateTime<Tz>, ValidationError> {
    let requested = date.and_time(time);
    // A local time inside a DST gap resolves to the first minute that exists.
    for offset in 0..=MAX_GAP_MINUTES {
        let candidate = requested + Duration::minutes(offset);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Ok(dt),
            LocalResult::Ambiguous(earliest, _) => return Ok(earliest),
            LocalResult::None => continue,
        }
    }
    Err(ValidationError::UnresolvableLocalTime(requested.to_string()))
}

/// Compute the next absolute fire instant.
///
/// Without an explicit `date`, an instant that is not strictly after `now`
/// rolls forward one day. With an explicit date the instant is returned as
/// is, even when it lies in the past.
///
/// # Errors
/// Returns an error for an out-of-range hour/minute or an unresolvable local time.
pub fn next_fire_instant<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
    date: Option<NaiveDate>,
) -> std::result::Result<DateTime<Tz>, ValidationError> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or(ValidationError::InvalidTimeOfDay { hour, minute })?;
    let tz = now.timezone();

    match date {
        Some(date) => {
            let at = resolve_local(&tz, date, time)?;
            if at <= *now {
                warn!(%date, hour, minute, "explicit alarm date is in the past");
            }
            Ok(at)
        }
        None => {
            let today = now.date_naive();
            let at = resolve_local(&tz, today, time)?;
            if at > *now {
                return Ok(at);
            }
            let tomorrow = today
                .succ_opt()
                .ok_or_else(|| ValidationError::UnresolvableLocalTime(today.to_string()))?;
            resolve_local(&tz, tomorrow, time)
        }
    }
}

/// Registers alarms with the exact-alarm facility.
pub struct TriggerScheduler {
    alarms: Arc<dyn ExactAlarmFacility>,
    store: Arc<AlarmStore>,
    ledger: Mutex<BTreeMap<AlarmId, Registration>>,
}

impl TriggerScheduler {
    pub fn new(alarms: Arc<dyn ExactAlarmFacility>, store: Arc<AlarmStore>) -> Self {
        Self {
            alarms,
            store,
            ledger: Mutex::new(BTreeMap::new()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, BTreeMap<AlarmId, Registration>> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take over registrations made by an earlier process.
    pub fn adopt(&self, registrations: impl IntoIterator<Item = Registration>) {
        let mut ledger = self.ledger();
        for registration in registrations {
            ledger.insert(registration.alarm_id.clone(), registration);
        }
    }

    pub fn registrations(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> = self.ledger().values().cloned().collect();
        all.sort_by_key(|r| r.fire_at);
        all
    }

    pub fn registration(&self, alarm_id: &AlarmId) -> Option<Registration> {
        self.ledger().get(alarm_id).cloned()
    }

    pub fn can_schedule_exact(&self) -> bool {
        self.alarms.can_schedule_exact()
    }

    /// Schedule relative to the local clock.
    ///
    /// # Errors
    /// See [`TriggerScheduler::schedule_at`].
    pub fn schedule(&self, alarm: &Alarm) -> Result<Registration> {
        self.schedule_at(alarm, &chrono::Local::now())
    }

    /// Register `alarm` to fire at its next instant after `now`.
    ///
    /// Re-scheduling an id replaces its earlier registration.
    ///
    /// # Errors
    /// `PermissionDenied(ExactAlarm)` when exact alarms are not allowed,
    /// validation errors for bad times, platform and storage errors.
    pub fn schedule_at<Tz: TimeZone>(&self, alarm: &Alarm, now: &DateTime<Tz>) -> Result<Registration> {
        if !self.alarms.can_schedule_exact() {
            warn!(alarm_id = %alarm.id, "exact alarm permission missing");
            return Err(CoreError::PermissionDenied(Permission::ExactAlarm));
        }

        let fire_at = next_fire_instant(now, alarm.hour, alarm.minute, alarm.date)?
            .with_timezone(&Utc);
        let slot = alarm.id.slot();
        let payload = AlarmPayload::from_alarm(alarm);

        self.alarms.set_exact_and_allow_while_idle(fire_at, &payload)?;
        let registration = Registration {
            alarm_id: alarm.id.clone(),
            slot,
            fire_at,
            payload,
        };
        self.ledger()
            .insert(alarm.id.clone(), registration.clone());
        self.store.set_pending_alarms(true)?;

        info!(alarm_id = %alarm.id, %slot, %fire_at, "alarm scheduled");
        Ok(registration)
    }

    /// Cancel one alarm. Returns whether a registration existed.
    ///
    /// # Errors
    /// Platform and storage errors.
    pub fn cancel(&self, alarm_id: &AlarmId) -> Result<bool> {
        let existed = self.alarms.cancel(alarm_id)?;
        let remaining = {
            let mut ledger = self.ledger();
            ledger.remove(alarm_id);
            ledger.len()
        };
        if remaining == 0 {
            self.store.set_pending_alarms(false)?;
        }
        info!(alarm_id = %alarm_id, existed, "alarm cancelled");
        Ok(existed)
    }

    /// Cancel every known registration and clear the pending flag.
    ///
    /// # Errors
    /// The first platform or storage error; registrations cancelled before
    /// the failure stay cancelled.
    pub fn cancel_all(&self) -> Result<usize> {
        let ids: Vec<AlarmId> = self.ledger().keys().cloned().collect();

        let mut cancelled = 0;
        for alarm_id in ids {
            if self.alarms.cancel(&alarm_id)? {
                cancelled += 1;
            }
            self.ledger().remove(&alarm_id);
        }
        self.store.set_pending_alarms(false)?;
        info!(cancelled, "all alarms cancelled");
        Ok(cancelled)
    }

    /// Forget a one-shot alarm once it has been dismissed.
    ///
    /// Repeating alarms are left for the scheduling collaborator to move
    /// to their next occurrence.
    ///
    /// # Errors
    /// Platform and storage errors.
    pub fn complete(&self, alarm_id: &AlarmId) -> Result<()> {
        let Some(registration) = self.registration(alarm_id) else {
            debug!(alarm_id = %alarm_id, "completed alarm has no registration");
            return Ok(());
        };
        if !registration.is_one_shot() {
            return Ok(());
        }
        self.alarms.cancel(&registration.alarm_id)?;
        let remaining = {
            let mut ledger = self.ledger();
            ledger.remove(alarm_id);
            ledger.len()
        };
        if remaining == 0 {
            self.store.set_pending_alarms(false)?;
        }
        debug!(alarm_id = %alarm_id, remaining, "one-shot alarm completed");
        Ok(())
    }

    /// Override the pending flag on behalf of the scheduling collaborator.
    ///
    /// # Errors
    /// Storage errors.
    pub fn update_pending_flag(&self, pending: bool) -> Result<()> {
        self.store.set_pending_alarms(pending)?;
        debug!(pending, "pending alarms flag updated");
        Ok(())
    }

    pub fn has_pending_alarms(&self) -> Result<bool> {
        Ok(self.store.has_pending_alarms()?)
    }
}

/// What to do after the device boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootAction {
    NoAction,
    /// Ask the scheduling collaborator to re-register its alarms.
    RequestReschedule,
}

/// Reads the pending flag at boot.
pub struct BootRecovery {
    store: Arc<AlarmStore>,
}

impl BootRecovery {
    pub fn new(store: Arc<AlarmStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Storage errors while reading the flag.
    pub fn check(&self) -> Result<BootAction> {
        if self.store.has_pending_alarms()? {
            info!("boot completed with pending alarms, requesting reschedule");
            Ok(BootAction::RequestReschedule)
        } else {
            debug!("boot completed with no pending alarms");
            Ok(BootAction::NoAction)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryPlatform;
    use chrono::FixedOffset;

    fn scheduler(platform: &MemoryPlatform) -> (TriggerScheduler, Arc<AlarmStore>) {
        let store = Arc::new(AlarmStore::open_memory().unwrap());
        (
            TriggerScheduler::new(Arc::new(platform.clone()), store.clone()),
            store,
        )
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, h, m, s).unwrap()
    }

    #[test]
    fn later_today_stays_today() {
        let next = next_fire_instant(&at(6, 0, 0), 7, 30, None).unwrap();
        assert_eq!(next, at(7, 30, 0));
    }

    #[test]
    fn same_minute_rolls_to_tomorrow() {
        let next = next_fire_instant(&at(7, 30, 0), 7, 30, None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 11, 7, 30, 0).unwrap());
    }

    #[test]
    fn earlier_today_rolls_to_tomorrow() {
        let next = next_fire_instant(&at(9, 0, 0), 7, 30, None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 11, 7, 30, 0).unwrap());
    }

    #[test]
    fn explicit_past_date_is_kept() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let next = next_fire_instant(&at(9, 0, 0), 7, 30, Some(date)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 1, 7, 30, 0).unwrap());
    }

    #[test]
    fn fixed_offset_zone_is_respected() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 4, 10, 23, 0, 0).unwrap();
        let next = next_fire_instant(&now, 6, 0, None).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 4, 11, 6, 0, 0).unwrap());
    }

    #[test]
    fn invalid_time_is_rejected() {
        assert_eq!(
            next_fire_instant(&at(6, 0, 0), 24, 0, None),
            Err(ValidationError::InvalidTimeOfDay {
                hour: 24,
                minute: 0
            })
        );
    }

    #[test]
    fn schedule_registers_slot_and_sets_flag() {
        let platform = MemoryPlatform::new();
        let (scheduler, store) = scheduler(&platform);
        let alarm = Alarm::new("A1".parse().unwrap(), 7, 0);
        let reg = scheduler.schedule_at(&alarm, &at(6, 0, 0)).unwrap();

        assert_eq!(reg.slot, SlotKey::for_id("A1"));
        assert_eq!(reg.fire_at, at(7, 0, 0));
        assert!(store.has_pending_alarms().unwrap());
        assert_eq!(platform.registrations().len(), 1);
    }

    #[test]
    fn rescheduling_replaces_registration() {
        let platform = MemoryPlatform::new();
        let (scheduler, _) = scheduler(&platform);
        let alarm = Alarm::new("A1".parse().unwrap(), 7, 0);
        scheduler.schedule_at(&alarm, &at(6, 0, 0)).unwrap();
        scheduler
            .schedule_at(&Alarm::new("A1".parse().unwrap(), 8, 0), &at(6, 0, 0))
            .unwrap();
        let regs = platform.registrations();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].1, at(8, 0, 0));
    }

    #[test]
    fn colliding_slots_are_registered_separately() {
        let platform = MemoryPlatform::new();
        let (scheduler, store) = scheduler(&platform);
        let aa: AlarmId = "Aa".parse().unwrap();
        let bb: AlarmId = "BB".parse().unwrap();
        assert_eq!(aa.slot(), bb.slot());

        scheduler
            .schedule_at(&Alarm::new(aa.clone(), 7, 0), &at(6, 0, 0))
            .unwrap();
        scheduler
            .schedule_at(&Alarm::new(bb.clone(), 8, 0), &at(6, 0, 0))
            .unwrap();
        assert_eq!(platform.registrations().len(), 2);

        assert!(scheduler.cancel(&aa).unwrap());
        let regs = platform.registrations();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].0, bb);
        assert_eq!(regs[0].1, at(8, 0, 0));
        assert!(store.has_pending_alarms().unwrap());
    }

    #[test]
    fn denied_permission_never_registers() {
        let platform = MemoryPlatform::new();
        platform.set_exact_allowed(false);
        let (scheduler, store) = scheduler(&platform);
        let err = scheduler
            .schedule_at(&Alarm::new("A1".parse().unwrap(), 7, 0), &at(6, 0, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::PermissionDenied(Permission::ExactAlarm)
        ));
        assert!(platform.registrations().is_empty());
        assert!(!store.has_pending_alarms().unwrap());
    }

    #[test]
    fn complete_forgets_one_shot_and_clears_flag() {
        let platform = MemoryPlatform::new();
        let (scheduler, store) = scheduler(&platform);
        let id: AlarmId = "A1".parse().unwrap();
        scheduler
            .schedule_at(&Alarm::new(id.clone(), 7, 0), &at(6, 0, 0))
            .unwrap();
        scheduler.complete(&id).unwrap();
        assert!(scheduler.registrations().is_empty());
        assert!(!store.has_pending_alarms().unwrap());
    }

    #[test]
    fn complete_keeps_repeating_alarm() {
        let platform = MemoryPlatform::new();
        let (scheduler, store) = scheduler(&platform);
        let id: AlarmId = "D".parse().unwrap();
        let alarm = Alarm::new(id.clone(), 7, 0).with_repeat(RepeatMode::Daily, Default::default());
        scheduler.schedule_at(&alarm, &at(6, 0, 0)).unwrap();
        scheduler.complete(&id).unwrap();
        assert_eq!(scheduler.registrations().len(), 1);
        assert!(store.has_pending_alarms().unwrap());
    }

    #[test]
    fn boot_recovery_follows_flag() {
        let platform = MemoryPlatform::new();
        let (scheduler, store) = scheduler(&platform);
        let boot = BootRecovery::new(store);
        assert_eq!(boot.check().unwrap(), BootAction::NoAction);
        scheduler.update_pending_flag(true).unwrap();
        assert_eq!(boot.check().unwrap(), BootAction::RequestReschedule);
    }
}
