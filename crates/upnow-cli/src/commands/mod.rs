pub mod alarm;
pub mod challenge;
pub mod config;
pub mod device;
pub mod simulate;

use std::sync::Arc;

use upnow_core::{AlarmService, AlarmStore, Config, MemoryPlatform, Registration, StoredAlarmFacility};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Service wired for the desktop: registrations persist in the alarm store,
/// every other port is in-memory.
pub struct Desktop {
    pub service: AlarmService,
    pub facility: StoredAlarmFacility,
}

pub fn open_desktop() -> Result<Desktop, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = Arc::new(AlarmStore::open_default()?);
    let facility = StoredAlarmFacility::new(store.clone());

    let mut platform = MemoryPlatform::new().platform();
    platform.alarms = Arc::new(facility.clone());
    let service = AlarmService::new(platform, store, config);
    service
        .scheduler()
        .adopt(facility.list()?.into_iter().map(Registration::from));

    Ok(Desktop { service, facility })
}
