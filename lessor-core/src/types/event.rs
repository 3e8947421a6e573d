use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an event does when it fires.
///
/// `start_lease` and `end_lease` are created with every lease; any other name
/// refers to a named lifecycle phase or an explicitly registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    StartLease,
    EndLease,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::StartLease => "start_lease",
            EventType::EndLease => "end_lease",
            EventType::Custom(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "start_lease" => EventType::StartLease,
            "end_lease" => EventType::EndLease,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event states. Transitions only move forward:
/// `Undone -> InProgress -> {Done | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Waiting for its scheduled time
    Undone,
    /// Picked by the scheduler, action running
    InProgress,
    /// Action completed
    Done,
    /// Action failed or could not be dispatched
    Error,
}

impl EventStatus {
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Undone, EventStatus::InProgress)
                | (EventStatus::InProgress, EventStatus::Done)
                | (EventStatus::InProgress, EventStatus::Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Undone => "UNDONE",
            EventStatus::InProgress => "IN_PROGRESS",
            EventStatus::Done => "DONE",
            EventStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNDONE" => Some(EventStatus::Undone),
            "IN_PROGRESS" => Some(EventStatus::InProgress),
            "DONE" => Some(EventStatus::Done),
            "ERROR" => Some(EventStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled, at-most-once lifecycle trigger tied to a lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub lease_id: String,
    pub event_type: EventType,
    /// When the event becomes due
    pub time: DateTime<Utc>,
    pub status: EventStatus,
}

impl Event {
    pub fn new(lease_id: impl Into<String>, event_type: EventType, time: DateTime<Utc>) -> Self {
        Self {
            id: nanoid::nanoid!(),
            lease_id: lease_id.into(),
            event_type,
            time,
            status: EventStatus::Undone,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.time <= now
    }
}
