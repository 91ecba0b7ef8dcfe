//! Alarm data model shared by every pipeline component.
//!
//! An [`Alarm`] is created by the external scheduling collaborator and is
//! read-only inside the pipeline. Everything keyed per alarm (OS alarm
//! slot, notification, playback session) derives from [`AlarmId`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{InvalidTrigger, ValidationError};

/// Placeholder id produced by malformed or replayed payloads.
pub const SENTINEL_ALARM_ID: &str = "unknown";

/// Sound name meaning "use the platform default alarm sound".
pub const DEFAULT_SOUND_NAME: &str = "alarm_sound";

/// Opaque, validated alarm identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlarmId(String);

impl AlarmId {
    /// Validate a raw id. Empty ids and the `"unknown"` sentinel are rejected.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidTrigger> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidTrigger::MissingId);
        }
        if trimmed == SENTINEL_ALARM_ID {
            return Err(InvalidTrigger::SentinelId(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic slot key for this id.
    pub fn slot(&self) -> SlotKey {
        SlotKey::for_id(&self.0)
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AlarmId {
    type Error = InvalidTrigger;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AlarmId> for String {
    fn from(id: AlarmId) -> Self {
        id.0
    }
}

impl FromStr for AlarmId {
    type Err = InvalidTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Request/notification key derived from an alarm id.
///
/// Uses the 31-multiplier hash over UTF-16 code units so keys stay stable
/// across process restarts and match keys posted by earlier app versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey(pub i32);

impl SlotKey {
    pub fn for_id(id: &str) -> Self {
        let hash = id
            .encode_utf16()
            .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(i32::from(unit)));
        Self(hash)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sound reference: a named resource or the platform default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum SoundRef {
    Default,
    Named(String),
}

impl SoundRef {
    /// Interpret a raw sound name; empty, `"default"` and `"alarm_sound"` mean default.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("default") || name == DEFAULT_SOUND_NAME {
            SoundRef::Default
        } else {
            SoundRef::Named(name.to_string())
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, SoundRef::Default)
    }
}

impl fmt::Display for SoundRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundRef::Default => f.write_str("default"),
            SoundRef::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Once,
    Daily,
    Weekly,
}

impl RepeatMode {
    pub fn is_repeating(self) -> bool {
        !matches!(self, RepeatMode::Once)
    }
}

impl FromStr for RepeatMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(RepeatMode::Once),
            "daily" => Ok(RepeatMode::Daily),
            "weekly" | "weekly-mask" | "weekdays" => Ok(RepeatMode::Weekly),
            other => Err(ValidationError::InvalidValue {
                field: "repeat".into(),
                message: format!("unknown repeat mode '{other}'"),
            }),
        }
    }
}

/// Seven weekday flags, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekdayMask(pub [bool; 7]);

impl WeekdayMask {
    const NAMES: [&'static str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|d| *d)
    }

    /// Parse a comma separated list such as `mon,wed,fri`.
    pub fn parse_list(list: &str) -> Result<Self, ValidationError> {
        let mut days = [false; 7];
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let lower = part.to_ascii_lowercase();
            let idx = Self::NAMES
                .iter()
                .position(|name| lower.starts_with(name))
                .ok_or_else(|| ValidationError::InvalidValue {
                    field: "weekdays".into(),
                    message: format!("unknown weekday '{part}'"),
                })?;
            days[idx] = true;
        }
        Ok(Self(days))
    }
}

impl fmt::Display for WeekdayMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .0
            .iter()
            .zip(Self::NAMES)
            .filter(|(on, _)| **on)
            .map(|(_, name)| name)
            .collect();
        f.write_str(&names.join(","))
    }
}

/// Dismiss challenge kind configured for an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    #[default]
    Math,
    Typing,
}

impl FromStr for ChallengeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "math" => Ok(ChallengeType::Math),
            "typing" | "text" => Ok(ChallengeType::Typing),
            other => Err(ValidationError::InvalidValue {
                field: "challenge".into(),
                message: format!("unknown challenge type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeType::Math => f.write_str("math"),
            ChallengeType::Typing => f.write_str("typing"),
        }
    }
}

/// ARGB color value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const RED: Color = Color(0xFFFF_0000);

    /// Parse `#RRGGBB` or `#AARRGGBB` (the leading `#` is optional).
    pub fn parse_hex(s: &str) -> Result<Self, ValidationError> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || ValidationError::InvalidValue {
            field: "color".into(),
            message: format!("'{s}' is not #RRGGBB or #AARRGGBB"),
        };
        let value = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
        match hex.len() {
            6 => Ok(Color(0xFF00_0000 | value)),
            8 => Ok(Color(value)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

/// Accent colors used by the surface and the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub primary: Color,
    pub primary_light: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: Color(0xFF3B_82F6),
            primary_light: Color(0xFF93_C5FD),
        }
    }
}

/// An alarm as handed over by the scheduling collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub label: String,
    pub sound: SoundRef,
    pub hour: u32,
    pub minute: u32,
    /// Explicit date for one-shot alarms.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub weekdays: WeekdayMask,
    #[serde(default)]
    pub challenge: ChallengeType,
    #[serde(default)]
    pub theme: Option<Theme>,
}

impl Alarm {
    pub fn new(id: AlarmId, hour: u32, minute: u32) -> Self {
        Self {
            id,
            label: "Alarm".to_string(),
            sound: SoundRef::Default,
            hour,
            minute,
            date: None,
            repeat: RepeatMode::Once,
            weekdays: WeekdayMask::default(),
            challenge: ChallengeType::Math,
            theme: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_sound(mut self, sound: SoundRef) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_challenge(mut self, challenge: ChallengeType) -> Self {
        self.challenge = challenge;
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatMode, weekdays: WeekdayMask) -> Self {
        self.repeat = repeat;
        self.weekdays = weekdays;
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }
}

/// Lifecycle of one alarm instance inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Scheduled,
    Triggered,
    Presenting,
    /// Every presentation attempt failed; the notification is the only path left.
    NotifiedOnly,
    Dismissed,
}

impl DeliveryState {
    /// States in which a playback session owns alerting resources.
    pub fn is_ringing(self) -> bool {
        matches!(
            self,
            DeliveryState::Triggered | DeliveryState::Presenting | DeliveryState::NotifiedOnly
        )
    }
}
