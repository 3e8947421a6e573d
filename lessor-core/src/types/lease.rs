use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Event, EventType};

/// Reservation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Created, start action not yet run
    Pending,
    /// Start action succeeded
    Active,
    /// Teardown succeeded (or the resource was already gone)
    Deleted,
    /// The last lifecycle action failed
    Error,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Active => "active",
            ReservationStatus::Deleted => "deleted",
            ReservationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReservationStatus::Pending),
            "active" => Some(ReservationStatus::Active),
            "deleted" => Some(ReservationStatus::Deleted),
            "error" => Some(ReservationStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks to reserve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Plugin key, e.g. `virtual:instance`
    pub resource_type: String,
    /// Provider-side id of the resource
    pub resource_id: String,
}

/// One resource bound to a lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub lease_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub status: ReservationStatus,
}

/// A time-bounded reservation of resources on behalf of a requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub name: String,
    /// Requester that created the lease
    pub user_id: String,
    /// Project (tenant) that owns the lease
    pub project_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Delegated trust redeemed whenever the scheduler acts for this lease
    pub trust_id: String,
    pub reservations: Vec<Reservation>,
    pub events: Vec<Event>,
}

impl Lease {
    /// Builds a lease with pending reservations and its `start_lease` /
    /// `end_lease` events. Callers validate `start_date < end_date`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        user_id: String,
        project_id: String,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        trust_id: String,
        reservations: Vec<ReservationRequest>,
    ) -> Self {
        let id = nanoid::nanoid!();
        let reservations = reservations
            .into_iter()
            .map(|r| Reservation {
                id: nanoid::nanoid!(),
                lease_id: id.clone(),
                resource_type: r.resource_type,
                resource_id: r.resource_id,
                status: ReservationStatus::Pending,
            })
            .collect();
        let events = vec![
            Event::new(id.clone(), EventType::StartLease, start_date),
            Event::new(id.clone(), EventType::EndLease, end_date),
        ];

        Self {
            id,
            name,
            user_id,
            project_id,
            start_date,
            end_date,
            trust_id,
            reservations,
            events,
        }
    }

    pub fn event(&self, event_type: &EventType) -> Option<&Event> {
        self.events.iter().find(|e| &e.event_type == event_type)
    }
}

/// Mutable lease fields. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseUpdate {
    pub name: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
}
