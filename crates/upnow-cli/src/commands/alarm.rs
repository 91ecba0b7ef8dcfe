use chrono::{Local, NaiveDate, NaiveTime, Timelike, Utc};
use clap::Subcommand;
use upnow_core::{next_fire_instant, ChallengeType, Color, RepeatMode, ScheduleRequest, WeekdayMask};

use super::{open_desktop, CliResult};

#[derive(Subcommand)]
pub enum AlarmAction {
    /// Schedule (or reschedule) an alarm
    Schedule {
        /// Alarm ID
        id: String,
        /// Time of day (HH:MM, 24h)
        #[arg(long)]
        at: String,
        /// Label shown on the alarm surface
        #[arg(long)]
        label: Option<String>,
        /// Sound name (default: platform alarm sound)
        #[arg(long)]
        sound: Option<String>,
        /// Explicit date for one-shot alarms (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Repeat mode: once, daily, weekly
        #[arg(long, default_value = "once")]
        repeat: RepeatMode,
        /// Weekdays for weekly alarms (e.g. "mon,wed,fri")
        #[arg(long)]
        weekdays: Option<String>,
        /// Dismiss challenge: math or typing
        #[arg(long, default_value = "math")]
        challenge: ChallengeType,
        /// Accent color (#RRGGBB or #AARRGGBB)
        #[arg(long)]
        color: Option<String>,
        /// Light accent color
        #[arg(long)]
        color_light: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel one alarm
    Cancel {
        /// Alarm ID
        id: String,
    },
    /// Cancel every alarm
    CancelAll,
    /// List registrations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registrations whose fire time has passed
    Due {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or override the pending-alarms flag
    Pending {
        /// New value (true/false)
        #[arg(long)]
        set: Option<bool>,
    },
    /// Compute the next fire instant for a time of day
    NextFire {
        /// Time of day (HH:MM, 24h)
        #[arg(long)]
        at: String,
        /// Explicit date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn parse_time(s: &str) -> Result<NaiveTime, Box<dyn std::error::Error>> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| format!("invalid time '{s}' (expected HH:MM): {e}").into())
}

fn parse_color(s: Option<String>) -> Result<Option<Color>, Box<dyn std::error::Error>> {
    Ok(s.as_deref().map(Color::parse_hex).transpose()?)
}

pub fn run(action: AlarmAction) -> CliResult {
    match action {
        AlarmAction::Schedule {
            id,
            at,
            label,
            sound,
            date,
            repeat,
            weekdays,
            challenge,
            color,
            color_light,
            json,
        } => {
            let time = parse_time(&at)?;
            let weekdays = match weekdays {
                Some(list) => WeekdayMask::parse_list(&list)?,
                None => WeekdayMask::default(),
            };
            let request = ScheduleRequest {
                id,
                label,
                sound_name: sound,
                hour: time.hour(),
                minute: time.minute(),
                date,
                repeat,
                weekdays,
                challenge,
                primary_color: parse_color(color)?,
                primary_color_light: parse_color(color_light)?,
            };

            let desktop = open_desktop()?;
            let registration = desktop.service.schedule(request)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&registration)?);
            } else {
                println!(
                    "Alarm scheduled: {} at {} (slot {})",
                    registration.alarm_id,
                    registration.fire_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    registration.slot
                );
            }
        }
        AlarmAction::Cancel { id } => {
            let desktop = open_desktop()?;
            if desktop.service.cancel(&id)? {
                println!("Alarm cancelled: {id}");
            } else {
                println!("No registration for alarm: {id}");
            }
        }
        AlarmAction::CancelAll => {
            let desktop = open_desktop()?;
            let cancelled = desktop.service.cancel_all()?;
            println!("Cancelled {cancelled} alarm(s)");
        }
        AlarmAction::List { json } => {
            let desktop = open_desktop()?;
            let registrations = desktop.service.scheduler().registrations();
            if json {
                println!("{}", serde_json::to_string_pretty(&registrations)?);
            } else if registrations.is_empty() {
                println!("No alarms scheduled");
            } else {
                for r in registrations {
                    println!(
                        "{}  {}  {}  {}",
                        r.alarm_id,
                        r.fire_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                        r.payload.label,
                        r.payload.challenge
                    );
                }
            }
        }
        AlarmAction::Due { json } => {
            let desktop = open_desktop()?;
            let due = desktop.facility.due(Utc::now())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&due)?);
            } else if due.is_empty() {
                println!("No alarms due");
            } else {
                for r in due {
                    println!("{}  {}", r.payload.alarm_id, r.fire_at.with_timezone(&Local));
                }
            }
        }
        AlarmAction::Pending { set } => {
            let desktop = open_desktop()?;
            if let Some(pending) = set {
                desktop.service.update_pending_flag(pending)?;
            }
            println!("{}", desktop.service.scheduler().has_pending_alarms()?);
        }
        AlarmAction::NextFire { at, date } => {
            let time = parse_time(&at)?;
            let next = next_fire_instant(&Local::now(), time.hour(), time.minute(), date)?;
            println!("{}", next.to_rfc3339());
        }
    }
    Ok(())
}
