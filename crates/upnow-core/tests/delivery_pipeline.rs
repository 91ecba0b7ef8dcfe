//! End-to-end tests for the alarm delivery pipeline.
//!
//! Every scenario drives [`AlarmService`] against the in-memory platform
//! with a paused tokio clock, so retry backoff and the ringing ceiling can
//! be stepped through deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveTime;
use upnow_core::challenge::ChallengeKind;
use upnow_core::payload::AlarmPayload;
use upnow_core::playback::SessionSnapshot;
use upnow_core::surface::{CongratulationsHandoff, DISMISS_HINT};
use upnow_core::{
    Alarm, AlarmId, AlarmService, AlarmStore, BootAction, Config, CoreError, DeliveryOutcome,
    DeliveryState, Event, InvalidTrigger, KeyInput, KeyResponse, LaunchReason, MemoryPlatform,
    PresentationSurface, RawTrigger, RetryPolicy, ScheduleRequest, StoredAlarmFacility,
    SubmitOutcome, SurfaceState, Trigger, TriggerScheduler,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn service(platform: &MemoryPlatform) -> AlarmService {
    let store = Arc::new(AlarmStore::open_memory().unwrap());
    AlarmService::new(platform.platform(), store, Config::default()).with_challenge_seed(7)
}

fn payload(id: &str) -> AlarmPayload {
    AlarmPayload::from_alarm(&Alarm::new(id.parse().unwrap(), 6, 30).with_label("Wake up"))
}

fn trigger(id: &str) -> Trigger {
    Trigger::from_payload(&payload(id))
}

fn morning() -> NaiveTime {
    NaiveTime::from_hms_opt(6, 30, 0).unwrap()
}

fn delivered(outcome: DeliveryOutcome) -> SessionSnapshot {
    match outcome {
        DeliveryOutcome::Delivered { session, .. } => session,
        DeliveryOutcome::Dropped { reason } => panic!("trigger dropped: {}", reason.message),
    }
}

fn correct_answer(surface: &PresentationSurface) -> String {
    match surface.challenge().unwrap().kind() {
        ChallengeKind::Math(problem) => problem.answer.to_string(),
        ChallengeKind::Typing { phrase } => phrase.clone(),
    }
}

fn wrong_answer(surface: &PresentationSurface) -> String {
    match surface.challenge().unwrap().kind() {
        ChallengeKind::Math(problem) => (problem.answer + 1).to_string(),
        ChallengeKind::Typing { .. } => "definitely not the phrase".to_string(),
    }
}

fn dismissed_events(platform: &MemoryPlatform, id: &str) -> usize {
    platform
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Dismissed { alarm_id, .. } if alarm_id.as_str() == id))
        .count()
}

async fn open_ringing(service: &AlarmService, id: &str) -> PresentationSurface {
    delivered(service.fire_at(trigger(id), morning()).await);
    let intent = upnow_core::SurfaceIntent::new(payload(id), LaunchReason::NotificationTap);
    service.open_surface(intent).unwrap()
}

#[derive(Default)]
struct RecordingHandoff {
    received: Mutex<Vec<AlarmId>>,
}

impl CongratulationsHandoff for RecordingHandoff {
    fn hand_off(&self, payload: &AlarmPayload) {
        self.received.lock().unwrap().push(payload.alarm_id.clone());
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn locked_device_gets_full_screen_notification_and_ringing_session() {
    let platform = MemoryPlatform::new();
    platform.set_device_state(false, true);
    let service = service(&platform);

    let outcome = service.fire_at(trigger("A1"), morning()).await;
    let DeliveryOutcome::Delivered {
        device,
        notification_posted,
        session,
        ..
    } = outcome
    else {
        panic!("locked device trigger was dropped");
    };

    assert!(device.is_effectively_locked());
    assert!(notification_posted);
    assert!(session.wake_lock_held);
    assert!(session.vibrating);

    let id: AlarmId = "A1".parse().unwrap();
    let notification = platform.notification(&id).unwrap();
    assert!(notification.ongoing);
    assert!(!notification.auto_cancel);
    assert_eq!(notification.full_screen_intent.alarm_id(), &id);
    assert_eq!(notification.title, "Wake up");
    assert_eq!(platform.audio_loops_active(), 1);
    assert!(service.registry().is_active(&id));
}

#[tokio::test(start_paused = true)]
async fn blocked_launches_fall_back_to_notification_and_tap_still_presents() {
    let platform = MemoryPlatform::new();
    platform.set_device_state(false, true);
    platform.set_launch_blocked(true);
    let service = service(&platform);
    let id: AlarmId = "A1".parse().unwrap();

    let outcome = service.fire_at(trigger("A1"), morning()).await;
    assert!(matches!(
        outcome,
        DeliveryOutcome::Delivered { launched: false, notification_posted: true, .. }
    ));

    tokio::time::sleep(RetryPolicy::default().total_delay() + Duration::from_millis(50)).await;
    assert_eq!(service.registry().state(&id), Some(DeliveryState::NotifiedOnly));
    // One direct attempt from the router plus the session's bounded retries.
    assert_eq!(platform.launch_attempts().len(), 6);
    assert_eq!(platform.audio_loops_active(), 1);

    let tap = platform.notification(&id).unwrap().content_intent;
    let surface = service.open_surface(tap).unwrap();
    assert_eq!(surface.state(), SurfaceState::Active);
    assert_eq!(service.registry().state(&id), Some(DeliveryState::Presenting));
}

#[tokio::test(start_paused = true)]
async fn startup_replay_of_past_alarm_is_dropped() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let raw = RawTrigger {
        alarm_id: Some("A1".into()),
        hour: Some(6),
        minute: Some(0),
        ..Default::default()
    };

    let outcome = service
        .fire_at(Trigger::replay(raw), NaiveTime::from_hms_opt(7, 0, 0).unwrap())
        .await;
    assert_eq!(
        outcome.dropped_reason(),
        Some(&InvalidTrigger::PastReplay { hour: 6, minute: 0 })
    );
    assert_eq!(platform.posted_notifications(), 0);
    assert!(service.registry().is_empty());
    assert!(platform.is_quiet());
}

#[tokio::test(start_paused = true)]
async fn sentinel_and_missing_ids_are_dropped() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);

    let sentinel = RawTrigger {
        alarm_id: Some("unknown".into()),
        ..Default::default()
    };
    let outcome = service.fire_at(Trigger::os(sentinel), morning()).await;
    assert!(matches!(
        outcome.dropped_reason(),
        Some(InvalidTrigger::SentinelId(_))
    ));

    let outcome = service
        .fire_at(Trigger::os(RawTrigger::default()), morning())
        .await;
    assert_eq!(outcome.dropped_reason(), Some(&InvalidTrigger::MissingId));
    assert!(platform.launch_attempts().is_empty());
    assert!(platform.is_quiet());
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_for_one_alarm_keep_a_single_owner() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let id: AlarmId = "A1".parse().unwrap();

    let (first, second) = tokio::join!(
        service.fire_at(trigger("A1"), morning()),
        service.fire_at(trigger("A1"), morning()),
    );
    let latest = delivered(first).generation.max(delivered(second).generation);

    assert_eq!(service.registry().len(), 1);
    assert_eq!(service.registry().generation(&id), Some(latest));
    assert_eq!(platform.audio_loops_peak(), 1);
    assert_eq!(platform.audio_loops_active(), 1);
    assert_eq!(platform.wake_locks_held(), 1);
}

#[tokio::test(start_paused = true)]
async fn different_alarms_ring_independently() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);

    delivered(service.fire_at(trigger("A1"), morning()).await);
    delivered(service.fire_at(trigger("A2"), morning()).await);
    assert_eq!(platform.audio_loops_active(), 2);

    service.stop_alarm("A1").await.unwrap();
    let remaining: Vec<AlarmId> = vec!["A2".parse().unwrap()];
    assert_eq!(service.registry().active_ids(), remaining);
    assert_eq!(platform.audio_loops_active(), 1);
    assert!(platform.notification(&"A2".parse::<AlarmId>().unwrap()).is_some());
}

#[tokio::test(start_paused = true)]
async fn alarms_sharing_a_slot_keep_their_own_notification() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let aa: AlarmId = "Aa".parse().unwrap();
    let bb: AlarmId = "BB".parse().unwrap();
    assert_eq!(aa.slot(), bb.slot());

    delivered(service.fire_at(trigger("Aa"), morning()).await);
    delivered(service.fire_at(trigger("BB"), morning()).await);
    assert_eq!(service.registry().len(), 2);
    assert_eq!(platform.posted_notifications(), 2);

    service.stop_alarm("Aa").await.unwrap();
    assert!(service.registry().is_active(&bb));
    assert!(platform.notification(&aa).is_none());
    assert!(platform.notification(&bb).is_some());
}

#[test]
fn alarms_sharing_a_slot_keep_their_own_stored_registration() {
    let store = Arc::new(AlarmStore::open_memory().unwrap());
    let facility = Arc::new(StoredAlarmFacility::new(store.clone()));
    let scheduler = TriggerScheduler::new(facility.clone(), store);

    scheduler.schedule(&Alarm::new("Aa".parse().unwrap(), 7, 0)).unwrap();
    scheduler.schedule(&Alarm::new("BB".parse().unwrap(), 8, 0)).unwrap();
    assert_eq!(facility.list().unwrap().len(), 2);

    assert!(scheduler.cancel(&"Aa".parse().unwrap()).unwrap());
    let stored = facility.list().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload.alarm_id.as_str(), "BB");
    assert_eq!(scheduler.registrations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_alarm_expires_at_ceiling() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let mut surface = open_ringing(&service, "A1").await;

    tokio::time::sleep(Duration::from_secs(601)).await;
    assert!(service.active_session("A1").unwrap().is_none());
    assert!(platform.is_quiet());
    assert_eq!(surface.refresh(), SurfaceState::TornDown);
    assert_eq!(dismissed_events(&platform, "A1"), 0);
}

// ============================================================================
// Dismissal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn correct_answer_dismisses_exactly_once() {
    let platform = MemoryPlatform::new();
    let handoff = Arc::new(RecordingHandoff::default());
    let service = service(&platform).with_congratulations(handoff.clone());
    let mut surface = open_ringing(&service, "A1").await;

    let answer = correct_answer(&surface);
    surface.set_text(&answer);
    let outcome = surface.submit().await;
    let SubmitOutcome::Solved { teardown } = outcome else {
        panic!("correct answer was not accepted: {outcome:?}");
    };
    assert!(teardown.had_session);
    assert!(teardown.is_clean());

    assert_eq!(surface.state(), SurfaceState::TornDown);
    assert!(service.active_session("A1").unwrap().is_none());
    assert!(platform.is_quiet());
    assert_eq!(dismissed_events(&platform, "A1"), 1);
    assert_eq!(handoff.received.lock().unwrap().len(), 1);

    surface.set_text(&answer);
    assert_eq!(surface.submit().await, SubmitOutcome::Inactive);
    assert_eq!(dismissed_events(&platform, "A1"), 1);
}

#[tokio::test(start_paused = true)]
async fn wrong_answer_issues_fresh_challenge_and_keeps_ringing() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let mut surface = open_ringing(&service, "A1").await;
    let first_id = surface.challenge().unwrap().id();

    let wrong = wrong_answer(&surface);
    surface.set_text(&wrong);
    assert_eq!(surface.submit().await, SubmitOutcome::Incorrect { attempts: 1 });

    assert_ne!(surface.challenge().unwrap().id(), first_id);
    assert!(surface.input().is_empty());
    assert_eq!(platform.audio_loops_active(), 1);
    assert!(service.registry().is_active(&"A1".parse().unwrap()));
    assert!(platform
        .events()
        .iter()
        .any(|e| matches!(e, Event::ChallengeFailed { attempts: 1, .. })));
    assert_eq!(dismissed_events(&platform, "A1"), 0);

    let answer = correct_answer(&surface);
    surface.set_text(&answer);
    assert!(matches!(surface.submit().await, SubmitOutcome::Solved { .. }));
    assert_eq!(surface.failed_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_and_non_numeric_input_is_rejected_without_judging() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let mut surface = open_ringing(&service, "A1").await;
    let challenge_id = surface.challenge().unwrap().id();

    assert!(matches!(surface.submit().await, SubmitOutcome::Rejected(_)));
    surface.set_text("seven");
    assert!(matches!(surface.submit().await, SubmitOutcome::Rejected(_)));

    assert_eq!(surface.challenge().unwrap().id(), challenge_id);
    assert_eq!(surface.failed_attempts(), 0);
    assert!(platform.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn back_is_swallowed_and_background_relaunches() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let mut surface = open_ringing(&service, "A1").await;

    assert_eq!(
        surface.handle_key(KeyInput::Back),
        KeyResponse::Consumed {
            hint: Some(DISMISS_HINT)
        }
    );
    assert_eq!(
        surface.handle_key(KeyInput::VolumeDown),
        KeyResponse::Consumed { hint: None }
    );

    assert!(surface.on_backgrounded());
    tokio::time::sleep(Duration::from_millis(10)).await;
    let last = platform.launched().last().cloned().unwrap();
    assert_eq!(last.reason, LaunchReason::Relaunch);
    assert!(last.reorder_to_front);
    assert_eq!(surface.state(), SurfaceState::Active);
}

#[tokio::test(start_paused = true)]
async fn external_stop_closes_surface_without_dismissal() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let mut surface = open_ringing(&service, "A1").await;

    let report = service.stop_alarm("A1").await.unwrap();
    assert!(report.had_session);
    assert_eq!(surface.refresh(), SurfaceState::TornDown);
    assert!(!surface.on_backgrounded());
    assert_eq!(dismissed_events(&platform, "A1"), 0);
    assert!(platform.is_quiet());
}

#[tokio::test(start_paused = true)]
async fn stopping_twice_is_harmless() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    delivered(service.fire_at(trigger("A1"), morning()).await);

    let first = service.stop_alarm("A1").await.unwrap();
    let second = service.stop_alarm("A1").await.unwrap();
    assert!(first.had_session);
    assert!(!second.had_session);
    assert!(second.is_clean());
    assert!(platform.is_quiet());
}

#[tokio::test(start_paused = true)]
async fn stale_notification_tap_is_refused() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let intent = upnow_core::SurfaceIntent::new(payload("A1"), LaunchReason::NotificationTap);

    let err = service.open_surface(intent).unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidTrigger(InvalidTrigger::NoActiveSession(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_ringing_alarm() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    delivered(service.fire_at(trigger("A1"), morning()).await);
    delivered(service.fire_at(trigger("A2"), morning()).await);

    let reports = service.shutdown().await;
    assert_eq!(reports.len(), 2);
    assert!(service.registry().is_empty());
    assert!(platform.is_quiet());
}

// ============================================================================
// Scheduling and boot
// ============================================================================

fn request(id: &str, hour: u32) -> ScheduleRequest {
    ScheduleRequest {
        id: id.into(),
        hour,
        minute: 15,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_all_clears_registrations_and_boot_flag() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);

    service.schedule(request("A1", 6)).unwrap();
    service.schedule(request("A2", 7)).unwrap();
    assert_eq!(platform.registrations().len(), 2);
    assert_eq!(service.on_boot(), BootAction::RequestReschedule);

    assert_eq!(service.cancel_all().unwrap(), 2);
    assert!(platform.registrations().is_empty());
    assert_eq!(service.on_boot(), BootAction::NoAction);
}

#[tokio::test(start_paused = true)]
async fn schedule_without_exact_permission_fails_loudly() {
    let platform = MemoryPlatform::new();
    platform.set_exact_allowed(false);
    let service = service(&platform);

    let err = service.schedule(request("A1", 6)).unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied(_)));
    assert!(platform.registrations().is_empty());
    assert_eq!(service.on_boot(), BootAction::NoAction);
    assert!(!service.check_permissions().can_schedule_exact);
}

#[tokio::test(start_paused = true)]
async fn dismissing_one_shot_alarm_forgets_its_registration() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    service.schedule(request("A1", 6)).unwrap();

    let mut surface = open_ringing(&service, "A1").await;
    let answer = correct_answer(&surface);
    surface.set_text(&answer);
    assert!(matches!(surface.submit().await, SubmitOutcome::Solved { .. }));

    assert!(service.scheduler().registrations().is_empty());
    assert_eq!(service.on_boot(), BootAction::NoAction);
}

#[tokio::test(start_paused = true)]
async fn scheduled_theme_becomes_fallback_for_bare_triggers() {
    let platform = MemoryPlatform::new();
    let service = service(&platform);
    let mut themed = request("A1", 6);
    themed.primary_color = Some(upnow_core::Color(0xFF12_3456));
    service.schedule(themed).unwrap();

    let raw = RawTrigger {
        alarm_id: Some("A2".into()),
        ..Default::default()
    };
    let session = delivered(service.fire_at(Trigger::os(raw), morning()).await);
    assert_eq!(
        session.payload.theme.map(|t| t.primary),
        Some(upnow_core::Color(0xFF12_3456))
    );
}
