//! Typed hand-off payload for alarm delivery.
//!
//! Everything that crosses an asynchronous boundary (OS trigger, notification
//! intent, surface relaunch) carries one [`AlarmPayload`]. Loosely typed
//! input arrives as a [`RawTrigger`] and is validated once, at the edge.

use serde::{Deserialize, Serialize};

use crate::alarm::{
    Alarm, AlarmId, ChallengeType, Color, RepeatMode, SoundRef, Theme, WeekdayMask,
};
use crate::error::InvalidTrigger;

/// Validated payload describing one ringing alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub alarm_id: AlarmId,
    pub label: String,
    pub sound: SoundRef,
    pub challenge: ChallengeType,
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub weekdays: WeekdayMask,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: Option<u32>,
}

impl AlarmPayload {
    pub fn from_alarm(alarm: &Alarm) -> Self {
        Self {
            alarm_id: alarm.id.clone(),
            label: alarm.label.clone(),
            sound: alarm.sound.clone(),
            challenge: alarm.challenge,
            theme: alarm.theme,
            repeat: alarm.repeat,
            weekdays: alarm.weekdays,
            hour: Some(alarm.hour),
            minute: Some(alarm.minute),
        }
    }

    /// Hour and minute when both are present.
    pub fn time_of_day(&self) -> Option<(u32, u32)> {
        self.hour.zip(self.minute)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Loosely typed trigger as delivered by the platform or the command channel.
///
/// Field names follow the extras historically attached to alarm intents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrigger {
    #[serde(default, alias = "alarm_id", alias = "id")]
    pub alarm_id: Option<String>,
    #[serde(default, alias = "alarm_label", alias = "label")]
    pub alarm_label: Option<String>,
    #[serde(default, alias = "alarm_sound", alias = "soundName")]
    pub alarm_sound: Option<String>,
    #[serde(default)]
    pub hour: Option<i64>,
    #[serde(default)]
    pub minute: Option<i64>,
    #[serde(default)]
    pub repeat_type: Option<String>,
    #[serde(default)]
    pub weekdays: Option<Vec<bool>>,
    #[serde(default)]
    pub dismiss_type: Option<String>,
    #[serde(default)]
    pub primary_color: Option<i64>,
    #[serde(default)]
    pub primary_color_light: Option<i64>,
}

impl RawTrigger {
    pub fn from_json(json: &str) -> Result<Self, InvalidTrigger> {
        serde_json::from_str(json).map_err(|e| InvalidTrigger::Malformed {
            field: "payload".into(),
            message: e.to_string(),
        })
    }
}

/// Negative values were used as "absent" markers by older senders.
fn non_negative(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v >= 0)
}

fn clock_field(field: &str, value: Option<i64>, max: i64) -> Result<Option<u32>, InvalidTrigger> {
    match non_negative(value) {
        None => Ok(None),
        Some(v) if v < max => Ok(Some(v as u32)),
        Some(v) => Err(InvalidTrigger::Malformed {
            field: field.into(),
            message: format!("{v} is out of range"),
        }),
    }
}

fn color_field(value: Option<i64>) -> Option<Color> {
    non_negative(value).map(|v| Color(v as u32))
}

impl TryFrom<RawTrigger> for AlarmPayload {
    type Error = InvalidTrigger;

    fn try_from(raw: RawTrigger) -> Result<Self, Self::Error> {
        let alarm_id = AlarmId::parse(raw.alarm_id.unwrap_or_default())?;

        let hour = clock_field("hour", raw.hour, 24)?;
        let minute = clock_field("minute", raw.minute, 60)?;

        let repeat = match raw.repeat_type.as_deref() {
            None => RepeatMode::Once,
            Some(s) => s.parse().map_err(|e: crate::error::ValidationError| {
                InvalidTrigger::Malformed {
                    field: "repeatType".into(),
                    message: e.to_string(),
                }
            })?,
        };

        let weekdays = match raw.weekdays {
            None => WeekdayMask::default(),
            Some(days) => {
                let days: [bool; 7] =
                    days.try_into().map_err(|v: Vec<bool>| InvalidTrigger::Malformed {
                        field: "weekdays".into(),
                        message: format!("expected 7 flags, got {}", v.len()),
                    })?;
                WeekdayMask(days)
            }
        };

        // Unknown challenge names fall back to math rather than dropping the alarm.
        let challenge = raw
            .dismiss_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let theme = match (
            color_field(raw.primary_color),
            color_field(raw.primary_color_light),
        ) {
            (Some(primary), Some(primary_light)) => Some(Theme {
                primary,
                primary_light,
            }),
            (Some(primary), None) => Some(Theme {
                primary,
                primary_light: primary,
            }),
            _ => None,
        };

        let label = raw
            .alarm_label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "Alarm".to_string());

        Ok(Self {
            alarm_id,
            label,
            sound: SoundRef::from_name(raw.alarm_sound.as_deref().unwrap_or_default()),
            challenge,
            theme,
            repeat,
            weekdays,
            hour,
            minute,
        })
    }
}

/// Where a trigger came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    /// Genuine fire from the exact-alarm facility.
    OsAlarm,
    /// Re-delivery while the app cold-starts; may be stale.
    StartupReplay,
}

/// A fired trigger awaiting routing.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub raw: RawTrigger,
    pub origin: TriggerOrigin,
}

impl Trigger {
    pub fn os(raw: RawTrigger) -> Self {
        Self {
            raw,
            origin: TriggerOrigin::OsAlarm,
        }
    }

    pub fn replay(raw: RawTrigger) -> Self {
        Self {
            raw,
            origin: TriggerOrigin::StartupReplay,
        }
    }

    /// Build an OS trigger from an already validated payload.
    pub fn from_payload(payload: &AlarmPayload) -> Self {
        Self::os(RawTrigger::from(payload))
    }
}

impl From<&AlarmPayload> for RawTrigger {
    fn from(payload: &AlarmPayload) -> Self {
        let sound = match &payload.sound {
            SoundRef::Default => None,
            SoundRef::Named(name) => Some(name.clone()),
        };
        Self {
            alarm_id: Some(payload.alarm_id.to_string()),
            alarm_label: Some(payload.label.clone()),
            alarm_sound: sound,
            hour: payload.hour.map(i64::from),
            minute: payload.minute.map(i64::from),
            repeat_type: Some(
                match payload.repeat {
                    RepeatMode::Once => "once",
                    RepeatMode::Daily => "daily",
                    RepeatMode::Weekly => "weekly",
                }
                .to_string(),
            ),
            weekdays: Some(payload.weekdays.0.to_vec()),
            dismiss_type: Some(payload.challenge.to_string()),
            primary_color: payload.theme.map(|t| i64::from(t.primary.0)),
            primary_color_light: payload.theme.map(|t| i64::from(t.primary_light.0)),
        }
    }
}

/// Why a surface presentation is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchReason {
    /// Direct attempt by the router.
    Routed,
    /// Attempt made by the playback session after it started.
    SessionStart,
    /// Deferred retry after a blocked attempt.
    Retry,
    /// Surface was backgrounded while unresolved.
    Relaunch,
    /// Content intent of the notification.
    NotificationTap,
    /// Full-screen intent of the notification.
    FullScreen,
}

/// Request to present the alarm surface for one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceIntent {
    pub payload: AlarmPayload,
    pub reason: LaunchReason,
    /// Bring an existing surface to the front instead of stacking a new one.
    pub reorder_to_front: bool,
}

impl SurfaceIntent {
    pub fn new(payload: AlarmPayload, reason: LaunchReason) -> Self {
        Self {
            reorder_to_front: matches!(reason, LaunchReason::Relaunch),
            payload,
            reason,
        }
    }

    pub fn alarm_id(&self) -> &AlarmId {
        &self.payload.alarm_id
    }

    pub fn with_reason(&self, reason: LaunchReason) -> Self {
        Self::new(self.payload.clone(), reason)
    }
}
