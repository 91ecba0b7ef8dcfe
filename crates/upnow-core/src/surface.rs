//! The full-screen dismissal surface.
//!
//! A surface exists only while its alarm has an active playback session.
//! It swallows escape keys, re-asserts itself when backgrounded, and only a
//! correct challenge answer leads to teardown.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmId, ChallengeType, Theme};
use crate::challenge::{Challenge, ChallengeEngine, Judgement};
use crate::channel::AlertChannel;
use crate::error::{InvalidTrigger, PlatformError};
use crate::events::{Event, EventSink};
use crate::payload::{AlarmPayload, LaunchReason, SurfaceIntent};
use crate::playback::{PlaybackController, StopReason, TeardownReport};
use crate::retry::RetryOutcome;
use crate::scheduler::TriggerScheduler;

/// Shown when the user tries to back out of an unresolved alarm.
pub const DISMISS_HINT: &str = "Please complete the task to dismiss";

/// Receives control after a successful dismissal.
pub trait CongratulationsHandoff: Send + Sync {
    fn hand_off(&self, payload: &AlarmPayload);
}

/// Window flags the host must apply to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    pub show_when_locked: bool,
    pub turn_screen_on: bool,
    pub keep_screen_on: bool,
    pub exclude_from_recents: bool,
}

impl WindowPolicy {
    pub const ALARM: WindowPolicy = WindowPolicy {
        show_when_locked: true,
        turn_screen_on: true,
        keep_screen_on: true,
        exclude_from_recents: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Back,
    VolumeUp,
    VolumeDown,
    Home,
    Power,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResponse {
    /// The surface swallowed the key, optionally showing a hint.
    Consumed { hint: Option<&'static str> },
    /// Default platform handling applies.
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    Active,
    Solved,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    NotNumeric,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => f.write_str("Please enter an answer"),
            RejectReason::NotNumeric => f.write_str("Please enter a valid number"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Input was not judged; the challenge is unchanged.
    Rejected(RejectReason),
    /// Wrong answer; a new challenge is showing.
    Incorrect { attempts: u32 },
    Solved { teardown: TeardownReport },
    /// The surface is no longer accepting answers.
    Inactive,
}

impl SubmitOutcome {
    /// Short feedback line for the user.
    pub fn message(&self) -> String {
        match self {
            SubmitOutcome::Rejected(reason) => reason.to_string(),
            SubmitOutcome::Incorrect { .. } => "Wrong answer, try again!".into(),
            SubmitOutcome::Solved { .. } => "Correct! Alarm dismissed.".into(),
            SubmitOutcome::Inactive => "Alarm is no longer active".into(),
        }
    }
}

/// Collaborators a surface talks to.
#[derive(Clone)]
pub struct SurfaceDeps {
    pub controller: Arc<PlaybackController>,
    pub channel: Arc<AlertChannel>,
    pub events: Arc<dyn EventSink>,
    pub scheduler: Option<Arc<TriggerScheduler>>,
    pub congratulations: Option<Arc<dyn CongratulationsHandoff>>,
    /// Keypad limit for numeric answers.
    pub max_answer_digits: usize,
}

/// Format a wall-clock time as `h:mm AM`.
pub fn clock_text(now: NaiveTime) -> String {
    now.format("%-I:%M %p").to_string()
}

pub struct PresentationSurface {
    payload: AlarmPayload,
    deps: SurfaceDeps,
    engine: ChallengeEngine,
    challenge: Option<Challenge>,
    input: String,
    state: SurfaceState,
    failed_attempts: u32,
    dismissed_emitted: bool,
    relaunch: Option<JoinHandle<RetryOutcome<(), PlatformError>>>,
}

impl fmt::Debug for PresentationSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationSurface")
            .field("alarm_id", &self.payload.alarm_id)
            .field("state", &self.state)
            .field("failed_attempts", &self.failed_attempts)
            .finish_non_exhaustive()
    }
}

impl PresentationSurface {
    /// Open the surface for `intent`.
    ///
    /// # Errors
    /// `NoActiveSession` when the alarm is not ringing, e.g. a stale
    /// notification tapped after the alarm expired.
    pub fn open(
        intent: SurfaceIntent,
        deps: SurfaceDeps,
        mut engine: ChallengeEngine,
    ) -> Result<Self, InvalidTrigger> {
        let alarm_id = intent.alarm_id().clone();
        if !deps.controller.registry().is_active(&alarm_id) {
            warn!(alarm_id = %alarm_id, reason = ?intent.reason, "surface opened without an active session");
            return Err(InvalidTrigger::NoActiveSession(alarm_id.to_string()));
        }
        deps.controller.mark_presenting(&alarm_id);

        let challenge = engine.generate(intent.payload.challenge);
        info!(
            alarm_id = %alarm_id,
            reason = ?intent.reason,
            challenge = %challenge.challenge_type(),
            "alarm surface opened"
        );
        Ok(Self {
            payload: intent.payload,
            deps,
            engine,
            challenge: Some(challenge),
            input: String::new(),
            state: SurfaceState::Active,
            failed_attempts: 0,
            dismissed_emitted: false,
            relaunch: None,
        })
    }

    pub fn alarm_id(&self) -> &AlarmId {
        &self.payload.alarm_id
    }

    pub fn label(&self) -> &str {
        &self.payload.label
    }

    pub fn theme(&self) -> Theme {
        self.payload.theme.unwrap_or_default()
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy::ALARM
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn prompt(&self) -> Option<String> {
        self.challenge.as_ref().map(Challenge::prompt)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    fn is_active(&self) -> bool {
        self.state == SurfaceState::Active
    }

    fn is_math(&self) -> bool {
        self.challenge
            .as_ref()
            .is_some_and(|c| c.challenge_type() == ChallengeType::Math)
    }

    pub fn handle_key(&mut self, key: KeyInput) -> KeyResponse {
        if !self.is_active() {
            return KeyResponse::PassThrough;
        }
        match key {
            KeyInput::Back => {
                debug!(alarm_id = %self.payload.alarm_id, "back pressed on unresolved alarm");
                KeyResponse::Consumed {
                    hint: Some(DISMISS_HINT),
                }
            }
            KeyInput::VolumeUp | KeyInput::VolumeDown | KeyInput::Home | KeyInput::Power => {
                KeyResponse::Consumed { hint: None }
            }
            KeyInput::Other => KeyResponse::PassThrough,
        }
    }

    /// Append a keypad digit. Returns false when the digit was ignored.
    pub fn input_digit(&mut self, digit: char) -> bool {
        if !self.is_active()
            || !digit.is_ascii_digit()
            || self.input.len() >= self.deps.max_answer_digits
        {
            return false;
        }
        self.input.push(digit);
        true
    }

    pub fn backspace(&mut self) {
        self.input.pop();
    }

    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Replace the answer text (typing challenges, or pasted numbers).
    pub fn set_text(&mut self, text: &str) {
        if self.is_active() {
            self.input = text.to_string();
        }
    }

    /// Submit the current input.
    pub async fn submit(&mut self) -> SubmitOutcome {
        if !self.is_active() {
            return SubmitOutcome::Inactive;
        }
        let answer = self.input.trim().to_string();
        if answer.is_empty() {
            return SubmitOutcome::Rejected(RejectReason::Empty);
        }
        if self.is_math() && answer.parse::<u64>().is_err() {
            return SubmitOutcome::Rejected(RejectReason::NotNumeric);
        }
        let Some(challenge) = self.challenge.take() else {
            return SubmitOutcome::Inactive;
        };

        match self.engine.judge(challenge, &answer) {
            Judgement::Incorrect { next } => {
                self.failed_attempts += 1;
                self.input.clear();
                self.challenge = Some(next);
                info!(
                    alarm_id = %self.payload.alarm_id,
                    attempts = self.failed_attempts,
                    "wrong answer, new challenge issued"
                );
                self.deps.events.emit(Event::ChallengeFailed {
                    alarm_id: self.payload.alarm_id.clone(),
                    attempts: self.failed_attempts,
                    at: Utc::now(),
                });
                SubmitOutcome::Incorrect {
                    attempts: self.failed_attempts,
                }
            }
            Judgement::Correct => {
                let teardown = self.dismiss().await;
                SubmitOutcome::Solved { teardown }
            }
        }
    }

    async fn dismiss(&mut self) -> TeardownReport {
        self.state = SurfaceState::Solved;
        let alarm_id = self.payload.alarm_id.clone();
        info!(alarm_id = %alarm_id, attempts = self.failed_attempts, "challenge solved");

        let teardown = self
            .deps
            .controller
            .stop(&alarm_id, StopReason::Dismissed)
            .await;
        if let Err(e) = self.deps.channel.clear(&alarm_id) {
            warn!(alarm_id = %alarm_id, error = %e, "could not clear alert notification");
        }

        if !self.dismissed_emitted {
            self.dismissed_emitted = true;
            self.deps.events.emit(Event::Dismissed {
                alarm_id: alarm_id.clone(),
                at: Utc::now(),
            });
        }

        if let Some(scheduler) = &self.deps.scheduler {
            if let Err(e) = scheduler.complete(&alarm_id) {
                warn!(alarm_id = %alarm_id, error = %e, "could not complete alarm registration");
            }
        }
        if let Some(handoff) = &self.deps.congratulations {
            handoff.hand_off(&self.payload);
        }

        self.tear_down();
        teardown
    }

    fn tear_down(&mut self) {
        if let Some(handle) = self.relaunch.take() {
            handle.abort();
        }
        self.challenge = None;
        self.input.clear();
        self.state = SurfaceState::TornDown;
    }

    /// The host moved the surface to the background.
    ///
    /// While unresolved, the surface asks to be presented again through the
    /// playback session's bounded retries. Returns whether a relaunch was
    /// requested.
    pub fn on_backgrounded(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        if let Some(previous) = self.relaunch.take() {
            previous.abort();
        }
        let intent = SurfaceIntent::new(self.payload.clone(), LaunchReason::Relaunch);
        match self.deps.controller.request_surface(intent) {
            Some(handle) => {
                info!(alarm_id = %self.payload.alarm_id, "surface backgrounded while unresolved, relaunching");
                self.relaunch = Some(handle);
                true
            }
            None => {
                self.refresh();
                false
            }
        }
    }

    /// The host brought the surface back to the foreground.
    pub fn on_foregrounded(&mut self) {
        if let Some(handle) = self.relaunch.take() {
            handle.abort();
        }
        if self.is_active() {
            self.deps.controller.mark_presenting(&self.payload.alarm_id);
        }
    }

    /// Re-check the playback session; tear down if it was stopped elsewhere.
    ///
    /// An externally stopped alarm does not count as dismissed, so no
    /// `Dismissed` event is emitted here.
    pub fn refresh(&mut self) -> SurfaceState {
        if self.is_active() && !self.deps.controller.registry().is_active(&self.payload.alarm_id) {
            info!(alarm_id = %self.payload.alarm_id, "session ended elsewhere, closing surface");
            self.tear_down();
        }
        self.state
    }
}
