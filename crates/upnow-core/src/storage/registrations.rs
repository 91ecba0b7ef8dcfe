//! Exact-alarm registrations persisted in SQLite.
//!
//! The desktop CLI has no OS alarm service, so registrations live in the
//! `registrations` table and `upnow-cli pending` / `simulate --due` read
//! them back. Alarm ids are primary keys, so registering the same id twice
//! replaces the earlier row; ids sharing a slot key keep separate rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::store::AlarmStore;
use crate::alarm::{AlarmId, SlotKey};
use crate::error::{PlatformError, StorageError};
use crate::payload::AlarmPayload;
use crate::platform::ExactAlarmFacility;

/// One stored registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRegistration {
    pub slot: SlotKey,
    pub fire_at: DateTime<Utc>,
    pub payload: AlarmPayload,
    pub created_at: DateTime<Utc>,
}

/// [`ExactAlarmFacility`] backed by the alarm store.
#[derive(Debug, Clone)]
pub struct StoredAlarmFacility {
    store: Arc<AlarmStore>,
}

impl StoredAlarmFacility {
    pub fn new(store: Arc<AlarmStore>) -> Self {
        Self { store }
    }

    /// All registrations ordered by fire time.
    pub fn list(&self) -> Result<Vec<StoredRegistration>, StorageError> {
        self.query(
            "SELECT slot, fire_at, payload, created_at FROM registrations ORDER BY fire_at",
            None,
        )
    }

    /// Registrations whose fire time is at or before `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<StoredRegistration>, StorageError> {
        self.query(
            "SELECT slot, fire_at, payload, created_at FROM registrations
             WHERE fire_at <= ?1 ORDER BY fire_at",
            Some(now),
        )
    }

    fn query(
        &self,
        sql: &str,
        at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredRegistration>, StorageError> {
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(i32, String, String, String)> {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        };
        let rows = match at_or_before {
            Some(now) => stmt
                .query_map(params![now.to_rfc3339()], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };

        rows.into_iter()
            .map(|(slot, fire_at, payload, created_at)| {
                Ok(StoredRegistration {
                    slot: SlotKey(slot),
                    fire_at: parse_timestamp(&fire_at)?,
                    payload: serde_json::from_str(&payload).map_err(|e| StorageError::Corrupt {
                        key: format!("registrations[{slot}].payload"),
                        message: e.to_string(),
                    })?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    fn insert(&self, at: DateTime<Utc>, payload: &AlarmPayload) -> Result<(), StorageError> {
        let json = payload.to_json().map_err(|e| StorageError::Corrupt {
            key: format!("registrations[{}].payload", payload.alarm_id),
            message: e.to_string(),
        })?;
        self.store.conn()?.execute(
            "INSERT OR REPLACE INTO registrations (alarm_id, slot, fire_at, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payload.alarm_id.as_str(),
                payload.alarm_id.slot().0,
                at.to_rfc3339(),
                json,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn remove(&self, alarm_id: &AlarmId) -> Result<bool, StorageError> {
        let removed = self.store.conn()?.execute(
            "DELETE FROM registrations WHERE alarm_id = ?1",
            params![alarm_id.as_str()],
        )?;
        Ok(removed > 0)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            key: "registrations.timestamp".into(),
            message: format!("{s}: {e}"),
        })
}

impl ExactAlarmFacility for StoredAlarmFacility {
    fn can_schedule_exact(&self) -> bool {
        true
    }

    fn set_exact_and_allow_while_idle(
        &self,
        at: DateTime<Utc>,
        payload: &AlarmPayload,
    ) -> Result<(), PlatformError> {
        self.insert(at, payload)
            .map_err(|e| PlatformError::new("set_exact", e.to_string()))
    }

    fn cancel(&self, alarm_id: &AlarmId) -> Result<bool, PlatformError> {
        self.remove(alarm_id)
            .map_err(|e| PlatformError::new("cancel", e.to_string()))
    }
}
