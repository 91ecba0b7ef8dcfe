//! # UpNow Core Library
//!
//! This library provides the alarm delivery and dismissal pipeline for UpNow.
//! A scheduled alarm fires at an exact wall-clock instant, is routed into an
//! alert notification plus a ringing playback session, and keeps ringing
//! until the user solves a challenge on the presentation surface.
//!
//! ## Architecture
//!
//! - **Scheduler**: Exact-alarm registrations, pending flag and boot recovery
//! - **Router**: Validates fired triggers and fans them out to the alert
//!   channel, playback and a direct surface launch
//! - **Playback**: Per-alarm sessions owning wake lock, audio loop, vibration
//!   and the notification, with bounded launch retries and auto-expiry
//! - **Surface**: Challenge presentation and dismissal
//! - **Platform**: Trait ports for every OS facility, with an in-memory fake
//! - **Storage**: SQLite-backed flags and registrations, TOML configuration
//!
//! ## Key Components
//!
//! - [`AlarmService`]: Inbound command surface wiring everything together
//! - [`PlaybackController`]: Session lifecycle for ringing alarms
//! - [`ChallengeEngine`]: Math and typing challenge generation
//! - [`Config`]: Application configuration management

pub mod alarm;
pub mod challenge;
pub mod channel;
pub mod error;
pub mod events;
pub mod payload;
pub mod platform;
pub mod playback;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod surface;

pub use alarm::{Alarm, AlarmId, ChallengeType, Color, DeliveryState, RepeatMode, SlotKey, SoundRef, Theme, WeekdayMask};
pub use challenge::{Challenge, ChallengeConfig, ChallengeEngine, ChallengeKind, Verdict};
pub use channel::{AlertChannel, ChannelConfig};
pub use error::{CoreError, ConfigError, InvalidTrigger, Permission, PlatformError, Resource, StorageError, ValidationError};
pub use events::{Event, EventSink};
pub use payload::{AlarmPayload, LaunchReason, RawTrigger, SurfaceIntent, Trigger, TriggerOrigin};
pub use platform::memory::MemoryPlatform;
pub use platform::Platform;
pub use playback::{PlaybackConfig, PlaybackController, SessionSnapshot, StopReason, TeardownReport};
pub use retry::RetryPolicy;
pub use router::{DeliveryOutcome, DeliveryRouter};
pub use scheduler::{next_fire_instant, BootAction, BootRecovery, Registration, TriggerScheduler};
pub use service::{AlarmService, PermissionReport, ScheduleRequest};
pub use storage::{AlarmStore, Config, StoredAlarmFacility};
pub use surface::{KeyInput, KeyResponse, PresentationSurface, SubmitOutcome, SurfaceState};
