use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::AlarmId;

/// Outbound notifications to the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The user solved the challenge; emitted exactly once per ringing alarm.
    Dismissed {
        alarm_id: AlarmId,
        at: DateTime<Utc>,
    },
    /// A submitted answer was wrong and a fresh challenge was issued.
    ChallengeFailed {
        alarm_id: AlarmId,
        /// Wrong answers so far for this alarm instance.
        attempts: u32,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn alarm_id(&self) -> &AlarmId {
        match self {
            Event::Dismissed { alarm_id, .. } | Event::ChallengeFailed { alarm_id, .. } => alarm_id,
        }
    }
}

/// Receiver for [`Event`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn dismissed_count(&self, alarm_id: &AlarmId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Dismissed { alarm_id: id, .. } if id == alarm_id))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        tracing::debug!(alarm_id = %event.alarm_id(), ?event, "event emitted");
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = Event::Dismissed {
            alarm_id: AlarmId::parse("A1").unwrap(),
            at: DateTime::parse_from_rfc3339("2026-01-01T06:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Dismissed");
        assert_eq!(json["alarm_id"], "A1");
    }

    #[test]
    fn recording_sink_counts_dismissals() {
        let sink = RecordingSink::new();
        let id = AlarmId::parse("A1").unwrap();
        sink.emit(Event::ChallengeFailed {
            alarm_id: id.clone(),
            attempts: 1,
            at: Utc::now(),
        });
        sink.emit(Event::Dismissed {
            alarm_id: id.clone(),
            at: Utc::now(),
        });
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.dismissed_count(&id), 1);
    }
}
