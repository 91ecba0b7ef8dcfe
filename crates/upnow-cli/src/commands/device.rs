use clap::Subcommand;
use upnow_core::BootAction;

use super::{open_desktop, CliResult};

#[derive(Subcommand)]
pub enum DeviceAction {
    /// Report platform rights needed for reliable delivery
    Permissions,
    /// Decide whether alarms must be rescheduled after a reboot
    BootCheck,
}

pub fn run(action: DeviceAction) -> CliResult {
    let desktop = open_desktop()?;
    match action {
        DeviceAction::Permissions => {
            let report = desktop.service.check_permissions();
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.all_granted() {
                eprintln!("warning: some permissions are missing, alarms may not ring reliably");
            }
        }
        DeviceAction::BootCheck => match desktop.service.on_boot() {
            BootAction::NoAction => println!("no_action"),
            BootAction::RequestReschedule => println!("request_reschedule"),
        },
    }
    Ok(())
}
