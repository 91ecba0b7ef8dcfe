use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use clap::Args;
use tracing::debug;
use upnow_core::{
    Alarm, AlarmPayload, AlarmService, AlarmStore, ChallengeType, Config, DeliveryOutcome,
    LaunchReason, MemoryPlatform, SoundRef, SubmitOutcome, SurfaceIntent, Trigger,
};

use super::CliResult;

#[derive(Args)]
pub struct SimulateArgs {
    /// Alarm ID
    #[arg(default_value = "sim")]
    id: String,
    /// Label shown on the alarm surface
    #[arg(long, default_value = "Alarm")]
    label: String,
    /// Sound name
    #[arg(long)]
    sound: Option<String>,
    /// Dismiss challenge: math or typing
    #[arg(long, default_value = "math")]
    challenge: ChallengeType,
    /// Device keyguard is showing
    #[arg(long)]
    locked: bool,
    /// Screen is off
    #[arg(long)]
    screen_off: bool,
    /// Every foreground launch is refused
    #[arg(long)]
    launch_blocked: bool,
    /// Every sound fails to play
    #[arg(long)]
    audio_fail: bool,
    /// RNG seed for the challenge
    #[arg(long)]
    seed: Option<u64>,
    /// Answers to submit in order; stdin is read when none are given
    #[arg(long = "answer")]
    answers: Vec<String>,
    /// Print the emitted events as JSON at the end
    #[arg(long)]
    json: bool,
}

async fn read_answer() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_string()),
        }
    })
    .await
    .ok()
    .flatten()
}

pub fn run(args: SimulateArgs) -> CliResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(simulate(args))
}

async fn simulate(args: SimulateArgs) -> CliResult {
    let memory = MemoryPlatform::new();
    memory.set_device_state(!args.screen_off, args.locked);
    memory.set_launch_blocked(args.launch_blocked);
    if let Some(name) = &args.sound {
        if args.audio_fail {
            memory.add_broken_sound(name);
        } else {
            memory.add_sound(name);
        }
    }
    memory.set_default_sound_fails(args.audio_fail);

    let config = Config::load_or_default();
    let retry_window = config.launch.total_delay();
    let store = Arc::new(AlarmStore::open_memory()?);
    let mut service = AlarmService::new(memory.platform(), store, config);
    if let Some(seed) = args.seed {
        service = service.with_challenge_seed(seed);
    }

    let now = Local::now();
    let alarm = Alarm::new(args.id.parse()?, now.hour(), now.minute())
        .with_label(args.label)
        .with_sound(SoundRef::from_name(args.sound.as_deref().unwrap_or_default()))
        .with_challenge(args.challenge);
    let payload = AlarmPayload::from_alarm(&alarm);

    let session = match service.fire(Trigger::from_payload(&payload)).await {
        DeliveryOutcome::Dropped { reason } => {
            return Err(format!("trigger dropped: {}", reason.message).into())
        }
        DeliveryOutcome::Delivered {
            device,
            notification_posted,
            launched,
            session,
            ..
        } => {
            println!(
                "Delivered: {} (locked: {}, notification: {}, launched: {})",
                session.alarm_id,
                device.is_effectively_locked(),
                notification_posted,
                launched
            );
            session
        }
    };
    println!("Audio: {:?}", session.audio);
    if !session.degraded.is_empty() {
        let degraded: Vec<String> = session.degraded.iter().map(ToString::to_string).collect();
        println!("Degraded: {}", degraded.join(", "));
    }

    if args.launch_blocked {
        debug!(?retry_window, "waiting for surface launch retries");
        tokio::time::sleep(retry_window + Duration::from_millis(50)).await;
    }
    if let Some(state) = service.registry().state(&session.alarm_id) {
        println!("State: {state:?}");
    }

    let intent = SurfaceIntent::new(session.payload.clone(), LaunchReason::NotificationTap);
    let mut surface = service.open_surface(intent)?;
    if let Some(prompt) = surface.prompt() {
        println!("{prompt}");
    }

    let scripted_mode = !args.answers.is_empty();
    let mut scripted = args.answers.into_iter();
    loop {
        let answer = if scripted_mode {
            scripted.next()
        } else {
            read_answer().await
        };
        let Some(answer) = answer else {
            service.stop_alarm(surface.alarm_id().as_str()).await?;
            surface.refresh();
            println!("Alarm stopped without dismissal");
            break;
        };

        surface.set_text(&answer);
        let outcome = surface.submit().await;
        println!("{}", outcome.message());
        match outcome {
            SubmitOutcome::Solved { .. } | SubmitOutcome::Inactive => break,
            SubmitOutcome::Incorrect { .. } => {
                if let Some(prompt) = surface.prompt() {
                    println!("{prompt}");
                }
            }
            SubmitOutcome::Rejected(_) => {}
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&memory.events())?);
    }
    Ok(())
}
